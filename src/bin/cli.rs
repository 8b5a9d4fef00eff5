//! ShardCask CLI
//!
//! Command-line interface for inspecting and editing a data directory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

use shardcask::{CaskError, Config, Engine, IndexType, IteratorOptions};

/// ShardCask CLI
#[derive(Parser, Debug)]
#[command(name = "shardcask")]
#[command(about = "CLI for the ShardCask storage engine")]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./shardcask-data")]
    dir: PathBuf,

    /// Index backend
    #[arg(long, value_enum, default_value_t = IndexArg::Btree)]
    index: IndexArg,

    /// Number of index shards
    #[arg(long, default_value_t = 4)]
    shards: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum IndexArg {
    Btree,
    Art,
    Bptree,
}

impl From<IndexArg> for IndexType {
    fn from(arg: IndexArg) -> Self {
        match arg {
            IndexArg::Btree => IndexType::BTree,
            IndexArg::Art => IndexType::Art,
            IndexArg::Bptree => IndexType::BPlusTree,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List keys in order
    List {
        /// Only keys starting with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Descending order
        #[arg(long)]
        reverse: bool,
    },

    /// Print engine statistics
    Stat,

    /// Compact sealed segments
    Merge {
        /// Swap merged segments in now instead of at next open
        #[arg(long)]
        reload: bool,
    },

    /// Copy the data directory
    Backup {
        /// Destination directory
        dest: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,shardcask=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CaskError::KeyNotFound) => {
            eprintln!("(not found)");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> shardcask::Result<()> {
    let config = Config::builder()
        .dir_path(&args.dir)
        .index_type(args.index.into())
        .index_shards(args.shards)
        .build();
    let engine = Engine::open(config)?;

    match args.command {
        Commands::Get { key } => {
            let value = engine.get(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::List { prefix, reverse } => {
            let options = IteratorOptions {
                prefix: prefix.map(String::into_bytes).unwrap_or_default(),
                reverse,
            };
            for key in engine.list_keys(options)? {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Commands::Stat => {
            let stat = engine.stat()?;
            println!("keys:        {}", stat.key_num);
            println!("data files:  {}", stat.data_file_num);
            println!("reclaimable: {} bytes", stat.reclaimable_size);
            println!("disk size:   {} bytes", stat.disk_size);
        }
        Commands::Merge { reload } => {
            engine.merge(reload)?;
            println!("OK");
        }
        Commands::Backup { dest } => {
            engine.backup(&dest)?;
            println!("OK");
        }
    }

    engine.close()
}
