//! `fatsh`: inspect and edit FAT32 disk images with the `fat32` driver.

mod commands;
mod image;
mod logger;
mod mkimage;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fat32::{Fat32, FsError};

use crate::image::ImageDisk;
use crate::mkimage::ImageOptions;

#[derive(Debug, Parser)]
#[command(name = "fatsh", version, about = "Shell for raw FAT32 disk images")]
struct Cli {
    /// Raw FAT32 image (volume at sector 0, no partition table).
    image: PathBuf,

    /// More log output on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(flatten)]
    Shell(ShellCommand),
    /// Create a new FAT32 image.
    Mkimage(MkimageArgs),
}

/// Commands that run against a mounted image.
#[derive(Debug, Subcommand)]
enum ShellCommand {
    /// List the root directory.
    Ls,
    /// Print a file's contents.
    Cat { name: String },
    /// Create or overwrite a file with the given text and a trailing newline.
    Write {
        name: String,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Show volume geometry and label.
    Fsinfo,
}

#[derive(Debug, Args)]
struct MkimageArgs {
    #[arg(long, default_value_t = 64)]
    size_mib: u32,
    #[arg(long)]
    label: Option<String>,
    /// Host file to copy into the root directory; repeatable.
    #[arg(long = "add")]
    add: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logger::init(logger::level_for(cli.verbose)) {
        eprintln!("warning: logger unavailable: {err}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err.downcast_ref::<FsError>().map_or(1, |e| u8::from(*e));
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Mkimage(args) => {
            let opts = ImageOptions { size_mib: args.size_mib, label: args.label, files: args.add };
            mkimage::create_image(&cli.image, &opts)
        }
        Command::Shell(command) => shell(&cli.image, &command),
    }
}

fn shell(image: &Path, command: &ShellCommand) -> Result<()> {
    let writable = matches!(command, ShellCommand::Write { .. });
    let disk = ImageDisk::open(image, writable)?;
    let mut fs: Fat32<ImageDisk> = Fat32::mounted(disk)
        .with_context(|| format!("mounting {}", image.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = match command {
        ShellCommand::Ls => commands::ls(&mut fs, &mut out),
        ShellCommand::Cat { name } => commands::cat(&mut fs, name, &mut out).map(drop),
        ShellCommand::Write { name, text } => {
            let text = text.join(" ");
            commands::write_text(&mut fs, name, &text)
                .map(|n| log::info!("write: {n} bytes to {name}"))
        }
        ShellCommand::Fsinfo => commands::fsinfo(&mut fs, &mut out),
    };
    out.flush()?;

    let unmounted = fs.unmount();
    result?;
    unmounted.context("unmounting")?;
    Ok(())
}
