use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use libfs::{cmd, Image};

mod logger;

#[derive(Parser)]
#[command(name = "opfs", about = "Inspect and edit xv6 filesystem images")]
struct Args {
    /// The filesystem image to operate on
    img_file: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the disk layout and usage counters
    Diskinfo,
    /// Print inode details for a path
    Info { path: String },
    /// List a directory, or a single file
    Ls { path: String },
    /// Write a file's bytes to standard output
    Get { path: String },
    /// Create or overwrite a file from standard input
    Put { path: String },
    /// Remove a file
    Rm { path: String },
    /// Copy a file
    Cp { spath: String, dpath: String },
    /// Move or rename a file or directory
    Mv { spath: String, dpath: String },
    /// Create a hard link to a file
    Ln { spath: String, dpath: String },
    /// Create a directory
    Mkdir { path: String },
    /// Remove an empty directory
    Rmdir { path: String },
}

fn main() -> ExitCode {
    logger::init();
    let args = Args::parse();

    // The mapping is released by drop on every exit path below.
    let mut img = match Image::open(&args.img_file) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("{}: {}", args.img_file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = match &args.command {
        Cmd::Diskinfo => cmd::diskinfo(&img),
        Cmd::Info { path } => cmd::info(&mut img, path),
        Cmd::Ls { path } => cmd::ls(&mut img, path),
        Cmd::Get { path } => cmd::get(&mut img, path, &mut io::stdout().lock()),
        Cmd::Put { path } => cmd::put(&mut img, path, &mut io::stdin().lock()),
        Cmd::Rm { path } => cmd::rm(&mut img, path),
        Cmd::Cp { spath, dpath } => cmd::cp(&mut img, spath, dpath),
        Cmd::Mv { spath, dpath } => cmd::mv(&mut img, spath, dpath),
        Cmd::Ln { spath, dpath } => cmd::ln(&mut img, spath, dpath),
        Cmd::Mkdir { path } => cmd::mkdir(&mut img, path),
        Cmd::Rmdir { path } => cmd::rmdir(&mut img, path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_fatal() => {
            eprintln!("FATAL: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
