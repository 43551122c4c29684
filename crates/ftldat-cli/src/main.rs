//! ftldat - A tool for packing and unpacking FTL .dat resource archives
//!
//! Usage:
//!   ftldat unpack <dat_file> [folder]          - Unpack to folder (default: <dat_file>-unpacked)
//!   ftldat pack <dat_file> [folder]            - Create a .dat from a folder
//!   ftldat info <dat_file>                     - Show archive information
//!   ftldat list <dat_file> [filter]            - List entry names
//!   ftldat extract <dat_file> <name> [target]  - Extract a single entry

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use ftldat::dat_utils::{
    add_file, append_file, extract_file, list_files, pack_directory, remove_file, repack,
    replace_file, show_hashes, show_info, unpack_archive,
};
use ftldat::DatWriteOptions;

#[derive(Parser)]
#[command(name = "ftldat")]
#[command(version)]
#[command(about = "Pack and unpack FTL: Faster Than Light .dat archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack a .dat file to a folder
    Unpack {
        /// The .dat file to unpack
        dat_file: PathBuf,
        /// Folder to extract to (default: <dat_file>-unpacked)
        folder: Option<PathBuf>,
        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },
    /// Create a .dat file from a folder
    Pack {
        /// The .dat file to create
        dat_file: PathBuf,
        /// Folder to pack (default: <dat_file>-unpacked)
        folder: Option<PathBuf>,
        /// Minimum number of index slots
        #[arg(short = 'I', long)]
        index_size: Option<u32>,
        /// Overwrite an existing .dat file
        #[arg(short, long)]
        force: bool,
    },
    /// Show detailed information about a .dat file
    Info {
        /// The .dat file to examine
        dat_file: PathBuf,
        /// Show SHA-256 of every entry
        #[arg(short = 'H', long)]
        hashes: bool,
        /// Show sizes in bytes
        #[arg(short = 'B', long)]
        bytes: bool,
    },
    /// List the entry names of a .dat file
    List {
        /// The .dat file to examine
        dat_file: PathBuf,
        /// Filter pattern (e.g. *.xml, img/ship)
        filter: Option<String>,
    },
    /// Show entry names with their SHA-256, sorted by name
    Hashes {
        /// The .dat file to examine
        dat_file: PathBuf,
    },
    /// Extract a single entry
    Extract {
        /// The .dat file to extract from
        dat_file: PathBuf,
        /// Name of the entry to extract
        name: String,
        /// File to extract to (default: stdout)
        target: Option<PathBuf>,
        /// Overwrite target if it exists
        #[arg(short, long)]
        force: bool,
    },
    /// Add a single file
    Add {
        /// The .dat file to add the file to
        dat_file: PathBuf,
        /// The file to add
        file: PathBuf,
        /// Name of the entry in the .dat (default: the path as given, / separated)
        name: Option<String>,
        /// Replace the entry if it already exists
        #[arg(short, long)]
        force: bool,
    },
    /// Replace a single entry
    Replace {
        /// The .dat file
        dat_file: PathBuf,
        /// The file to replace the entry with
        file: PathBuf,
        /// Name of the entry to replace
        name: String,
        /// Add the entry even if it does not exist
        #[arg(short, long)]
        force: bool,
    },
    /// Append a file to an existing entry
    Append {
        /// The .dat file
        dat_file: PathBuf,
        /// Name of the entry to append to
        name: String,
        /// The file to append
        file: PathBuf,
        /// Create the entry if it does not exist
        #[arg(short, long)]
        force: bool,
    },
    /// Remove an entry
    Remove {
        /// The .dat file
        dat_file: PathBuf,
        /// Name of the entry to remove
        name: String,
        /// Do not fail when the entry does not exist
        #[arg(short, long)]
        force: bool,
    },
    /// Rewrite a .dat file without unused space
    Repack {
        /// The .dat file to repack
        dat_file: PathBuf,
    },
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Unpack {
            dat_file,
            folder,
            force,
        } => {
            unpack_archive(&dat_file, folder.as_deref(), force)?;
        }
        Commands::Pack {
            dat_file,
            folder,
            index_size,
            force,
        } => {
            let options = DatWriteOptions {
                index_size: index_size.unwrap_or(0),
            };
            pack_directory(&dat_file, folder.as_deref(), options, force)?;
        }
        Commands::Info {
            dat_file,
            hashes,
            bytes,
        } => {
            show_info(&dat_file, bytes, hashes)?;
        }
        Commands::List { dat_file, filter } => {
            list_files(&dat_file, filter.as_deref())?;
        }
        Commands::Hashes { dat_file } => {
            show_hashes(&dat_file)?;
        }
        Commands::Extract {
            dat_file,
            name,
            target,
            force,
        } => {
            extract_file(&dat_file, &name, target.as_deref(), force)?;
        }
        Commands::Add {
            dat_file,
            file,
            name,
            force,
        } => {
            add_file(&dat_file, &file, name.as_deref(), force)?;
        }
        Commands::Replace {
            dat_file,
            file,
            name,
            force,
        } => {
            replace_file(&dat_file, &file, &name, force)?;
        }
        Commands::Append {
            dat_file,
            name,
            file,
            force,
        } => {
            append_file(&dat_file, &name, &file, force)?;
        }
        Commands::Remove {
            dat_file,
            name,
            force,
        } => {
            remove_file(&dat_file, &name, force)?;
        }
        Commands::Repack { dat_file } => {
            repack(&dat_file)?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR {:#}", err);
            let code = err
                .downcast_ref::<ftldat::Error>()
                .map(ftldat::Error::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
