use std::path::PathBuf;

use anyhow::*;
use camino::Utf8PathBuf;
use log::*;
use structopt::*;

use zipkit::{OpenOptions, ZipArchive};

#[derive(Debug, StructOpt)]
#[structopt(name = "unzip", about = "Dumps a .zip file into the current directory")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Change to the given directory before perfoming any operations.
    #[structopt(short = "C", long)]
    directory: Option<PathBuf>,

    /// List the archive's contents instead of extracting them.
    #[structopt(short = "n", long)]
    dry_run: bool,

    /// Replace files that already exist.
    #[structopt(short, long)]
    overwrite: bool,

    /// Password for encrypted entries
    #[structopt(short = "P", long)]
    password: Option<String>,

    /// Only check that every entry decompresses with the right CRC.
    #[structopt(short, long)]
    test: bool,

    #[structopt(name("ZIP file"))]
    zip_path: Utf8PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    // Resolve the archive before changing directories.
    let zip_path = std::env::current_dir()
        .ok()
        .and_then(|cwd| Utf8PathBuf::from_path_buf(cwd).ok())
        .map(|cwd| cwd.join(&args.zip_path))
        .unwrap_or_else(|| args.zip_path.clone());

    if let Some(chto) = &args.directory {
        std::env::set_current_dir(chto)
            .with_context(|| format!("Couldn't set working directory to {}", chto.display()))?;
    }

    let archive = ZipArchive::open(&zip_path, OpenOptions::new().eager(true))
        .with_context(|| format!("Couldn't load archive {zip_path}"))?;
    let password = args.password.as_deref().map(str::as_bytes);

    if args.dry_run {
        return list(&archive);
    }
    if args.test {
        ensure!(archive.test(password), "{zip_path} has bad entries");
        info!("{zip_path} is intact");
        return Ok(());
    }
    archive
        .extract_all_to(".", args.overwrite, true, password)
        .with_context(|| format!("Couldn't extract {zip_path}"))
}

fn list(archive: &ZipArchive) -> Result<()> {
    let comment = archive.comment()?;
    if !comment.is_empty() {
        println!("{comment}");
    }
    let mut total = 0;
    for entry in archive.entries()? {
        println!(
            "{:>10}  {}  {}{}",
            entry.size(),
            entry.last_modified().format("%Y-%m-%d %H:%M"),
            entry.name(),
            if entry.is_encrypted() { " (encrypted)" } else { "" }
        );
        total += entry.size();
    }
    println!("{total:>10}  {} files", archive.len()?);
    Ok(())
}
