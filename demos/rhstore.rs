use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rhstore::{HeapOptions, RobinStore, SpillHeap, SpillOptions};

fn main() -> rhstore::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Command::GroupBy(args) => run_group_by(args),
        Command::ExtSort(args) => run_ext_sort(args),
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "rhstore utility for spilling aggregations and sorts to disk",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count duplicate lines through a spillable hashmap
    #[command(name = "groupby")]
    GroupBy(GroupByArgs),
    /// Sort the lines of a file through a spillable min-heap
    #[command(name = "extsort")]
    ExtSort(ExtSortArgs),
}

#[derive(clap::Args)]
struct GroupByArgs {
    /// Path to the input text file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Directory for spill files; defaults to a scratch dir in TMPDIR
    #[arg(short, long)]
    spill_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ExtSortArgs {
    /// Path to the input text file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Directory for spill files; defaults to a scratch dir in TMPDIR
    #[arg(short, long)]
    spill_dir: Option<PathBuf>,
}

struct Scratch {
    dir: PathBuf,
    ephemeral: bool,
}

impl Scratch {
    fn new(requested: Option<PathBuf>) -> rhstore::Result<Scratch> {
        match requested {
            Some(dir) => Ok(Scratch {
                dir,
                ephemeral: false,
            }),
            None => {
                let dir =
                    std::env::temp_dir().join(format!("rhstore-demo-{}", std::process::id()));
                std::fs::create_dir_all(&dir)?;
                Ok(Scratch {
                    dir,
                    ephemeral: true,
                })
            }
        }
    }

    fn prefix(&self, name: &str) -> String {
        self.dir.join(name).to_string_lossy().into_owned()
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if self.ephemeral {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}

fn run_group_by(args: GroupByArgs) -> rhstore::Result<()> {
    let scratch = Scratch::new(args.spill_dir)?;
    let mut counts =
        RobinStore::create_spill(&scratch.prefix("groupby"), SpillOptions::default())?;

    let reader = BufReader::new(File::open(&args.input)?);
    let mut lines = 0u64;
    for line in reader.lines() {
        let line = line?;
        let next = match counts.get(line.as_bytes()) {
            Some(previous) => u64::from_le_bytes(previous.try_into().unwrap()) + 1,
            None => 1,
        };
        counts.set(line.as_bytes(), &next.to_le_bytes())?;
        lines += 1;
    }

    counts.visit(|key, value| {
        let count = u64::from_le_bytes(value.try_into().unwrap());
        println!("{:>8}  {}", count, String::from_utf8_lossy(key));
        true
    })?;

    eprintln!(
        "{} lines, {} distinct, table capacity {}, generation {}",
        lines,
        counts.count(),
        counts.capacity(),
        counts.generation()
    );

    counts.close()
}

fn run_ext_sort(args: ExtSortArgs) -> rhstore::Result<()> {
    let scratch = Scratch::new(args.spill_dir)?;
    let mut heap = SpillHeap::create(
        |a: &[u8], b: &[u8]| a < b,
        &scratch.prefix("extsort"),
        HeapOptions::default(),
    );

    let reader = BufReader::new(File::open(&args.input)?);
    for line in reader.lines() {
        heap.push(line?.as_bytes())?;
    }

    let total = heap.len();
    heap.sort(0)?;
    for index in 0..total {
        let line = heap.get(index)?;
        println!("{}", String::from_utf8_lossy(line));
    }

    heap.close()
}
