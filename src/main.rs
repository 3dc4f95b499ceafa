//! kovcheg - command-line ZIP archive tool.
//!
//! Thin glue over the kovcheg-zip codec: list, extract, create, append.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use kovcheg_zip::{CompressionMethod, FileInfo, OpenMode, ZipArchive, ZipError};

/// kovcheg - ZIP archive tool
#[derive(Parser)]
#[command(name = "kovcheg")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the contents of an archive
    List {
        /// Path to the archive
        #[arg(short, long, env = "KOVCHEG_ARCHIVE")]
        archive: PathBuf,

        /// Show sizes, method, and CRC per entry
        #[arg(short, long)]
        detailed: bool,
    },

    /// Extract entries from an archive
    Extract {
        /// Path to the archive
        #[arg(short, long, env = "KOVCHEG_ARCHIVE")]
        archive: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Only extract entries whose path contains this string
        #[arg(short, long)]
        filter: Option<String>,

        /// Password for encrypted entries
        #[arg(short, long, env = "KOVCHEG_PASSWORD")]
        password: Option<String>,
    },

    /// Create a new archive from the given files
    Create {
        /// Path to the archive to create
        #[arg(short, long, env = "KOVCHEG_ARCHIVE")]
        archive: PathBuf,

        /// Files to add
        files: Vec<PathBuf>,

        /// Deflate level, 0 stores
        #[arg(short, long, default_value_t = 6)]
        level: i16,

        /// Encrypt entries with this password
        #[arg(short, long, env = "KOVCHEG_PASSWORD")]
        password: Option<String>,

        /// Archive comment
        #[arg(long)]
        comment: Option<String>,
    },

    /// Append files to an existing archive
    Append {
        /// Path to the archive
        #[arg(short, long, env = "KOVCHEG_ARCHIVE")]
        archive: PathBuf,

        /// Files to add
        files: Vec<PathBuf>,

        /// Deflate level, 0 stores
        #[arg(short, long, default_value_t = 6)]
        level: i16,

        /// Encrypt entries with this password
        #[arg(short, long, env = "KOVCHEG_PASSWORD")]
        password: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::List { archive, detailed } => cmd_list(&archive, detailed),
        Commands::Extract {
            archive,
            output,
            filter,
            password,
        } => cmd_extract(&archive, &output, filter.as_deref(), password.as_deref()),
        Commands::Create {
            archive,
            files,
            level,
            password,
            comment,
        } => cmd_write(
            &archive,
            &files,
            level,
            password.as_deref(),
            comment.as_deref(),
            OpenMode::WRITE | OpenMode::CREATE,
        ),
        Commands::Append {
            archive,
            files,
            level,
            password,
        } => cmd_write(
            &archive,
            &files,
            level,
            password.as_deref(),
            None,
            OpenMode::WRITE | OpenMode::APPEND,
        ),
    }
}

/// Walk every entry of the archive, calling `visit` on each.
fn for_each_entry(
    archive: &mut ZipArchive,
    mut visit: impl FnMut(&mut ZipArchive) -> Result<()>,
) -> Result<()> {
    match archive.goto_first_entry() {
        Ok(()) => {}
        Err(ZipError::EndOfList) => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    loop {
        visit(archive)?;
        match archive.goto_next_entry() {
            Ok(()) => {}
            Err(ZipError::EndOfList) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
}

fn method_name(method: u16) -> &'static str {
    match CompressionMethod::try_from(method) {
        Ok(CompressionMethod::Store) => "store",
        Ok(CompressionMethod::Deflate) => "deflate",
        Ok(CompressionMethod::Bzip2) => "bzip2",
        Ok(CompressionMethod::Lzma) => "lzma",
        Ok(CompressionMethod::Aes) => "aes",
        Err(_) => "unknown",
    }
}

fn cmd_list(path: &Path, detailed: bool) -> Result<()> {
    let mut archive = ZipArchive::open_mmap(path).context("Failed to open archive")?;

    let mut count = 0u64;
    let mut total_uncompressed = 0u64;
    for_each_entry(&mut archive, |archive| {
        let info = archive.entry_info()?;
        if detailed {
            println!(
                "{:>12} {:>12} {:>8} {:08x} {} {}",
                info.compressed_size,
                info.uncompressed_size,
                method_name(info.compression_method),
                info.crc,
                if info.flag & kovcheg_zip::flags::ENCRYPTED != 0 { "E" } else { " " },
                info.filename
            );
        } else {
            println!("{}", info.filename);
        }
        count += 1;
        total_uncompressed += info.uncompressed_size;
        Ok(())
    })?;

    println!("\nTotal: {} entries, {} bytes", count, total_uncompressed);
    if let Ok(comment) = archive.comment() {
        println!("Comment: {}", comment);
    }
    archive.close().context("Failed to close archive")?;

    Ok(())
}

/// Entry paths come from the archive; keep them inside the output dir.
fn safe_output_path(output: &Path, entry_name: &str) -> Result<PathBuf> {
    let relative = entry_name.replace('\\', "/");
    let mut path = output.to_path_buf();
    for part in relative.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            bail!("entry path escapes the output directory: {entry_name}");
        }
        path.push(part);
    }
    Ok(path)
}

fn cmd_extract(
    archive_path: &Path,
    output: &Path,
    filter: Option<&str>,
    password: Option<&str>,
) -> Result<()> {
    println!("Opening archive: {}", archive_path.display());

    let start = Instant::now();
    let mut archive = ZipArchive::open_mmap(archive_path).context("Failed to open archive")?;
    println!("Found {} entries", archive.number_entry());

    let pb = ProgressBar::new(archive.number_entry());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    fs::create_dir_all(output)?;

    let mut extracted = 0u64;
    for_each_entry(&mut archive, |archive| {
        pb.inc(1);

        let (name, is_dir) = {
            let info = archive.entry_info()?;
            (info.filename.clone(), info.is_dir())
        };
        if let Some(pattern) = filter {
            if !name.to_lowercase().contains(&pattern.to_lowercase()) {
                return Ok(());
            }
        }

        let output_path = safe_output_path(output, &name)?;
        if is_dir {
            fs::create_dir_all(&output_path)?;
            return Ok(());
        }
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }

        archive
            .entry_read_open(false, password)
            .with_context(|| format!("Failed to open entry {name}"))?;
        let mut data = Vec::new();
        let read_result = archive.entry_read_to_end(&mut data);
        archive
            .entry_close()
            .with_context(|| format!("Checksum failed for {name}"))?;
        read_result.with_context(|| format!("Failed to read entry {name}"))?;

        fs::write(&output_path, data)?;
        extracted += 1;
        Ok(())
    })?;

    pb.finish_with_message("Done");
    println!("Extracted {} entries in {:?}", extracted, start.elapsed());
    archive.close().context("Failed to close archive")?;

    Ok(())
}

fn cmd_write(
    archive_path: &Path,
    files: &[PathBuf],
    level: i16,
    password: Option<&str>,
    comment: Option<&str>,
    mode: OpenMode,
) -> Result<()> {
    if files.is_empty() {
        bail!("no input files given");
    }

    let start = Instant::now();
    let mut archive =
        ZipArchive::open_path(archive_path, mode).context("Failed to open archive")?;

    if let Some(comment) = comment {
        archive.set_comment(comment)?;
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    for file in files {
        pb.set_message(file.display().to_string());

        let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        let modified = fs::metadata(file)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs() as i64)
            .unwrap_or(0);

        let name = file
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unnamed")
            .to_string();

        let info = FileInfo {
            filename: name,
            compression_method: if level == 0 {
                CompressionMethod::Store as u16
            } else {
                CompressionMethod::Deflate as u16
            },
            uncompressed_size: data.len() as u64,
            modified_date: modified,
            ..Default::default()
        };

        archive
            .entry_write_open(&info, level, false, password)
            .with_context(|| format!("Failed to add {}", file.display()))?;
        archive.entry_write(&data)?;
        archive.entry_close()?;

        pb.inc(1);
    }

    pb.finish_with_message("Done");
    let count = archive.number_entry();
    archive.close().context("Failed to finalise archive")?;

    println!("Wrote {} entries in {:?}", count, start.elapsed());

    Ok(())
}
