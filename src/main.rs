//! Command-line interface for structural archive edits.

use anyhow::{Context, Result, bail};
use clap::Parser;
use sha2::Sha256;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use zipmend::{
    Cli, Disposition, LocalFileReader, Mutation, PatchSet, ZipDirectory, cli::Command,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::List { archive, verbose } => list(&archive, verbose),
        Command::Digest { archive, entry } => digest(&archive, &entry),
        Command::Delete {
            archive,
            names,
            patch,
            output,
        } => delete(&archive, &names, patch.as_deref(), output.as_deref()),
        Command::Add {
            archive,
            file,
            name,
            store,
            patch,
            output,
        } => add(
            &archive,
            &file,
            name.as_deref(),
            store,
            patch.as_deref(),
            output.as_deref(),
        ),
        Command::Apply {
            patch,
            target,
            output,
        } => apply(&patch, &target, output.as_deref()),
    }
}

fn open_directory(archive: &Path) -> Result<ZipDirectory> {
    let reader = Arc::new(
        LocalFileReader::open(archive)
            .with_context(|| format!("cannot open {}", archive.display()))?,
    );
    ZipDirectory::read(reader).with_context(|| format!("cannot parse {}", archive.display()))
}

fn list(archive: &Path, verbose: bool) -> Result<()> {
    let dir = open_directory(archive)?;

    if !verbose {
        for entry in dir.entries() {
            println!("{}", entry.name_string());
        }
        return Ok(());
    }

    println!(
        "{:>12} {:>12} {:>8} {:>16}  Name",
        "Size", "Packed", "Method", "Modified"
    );
    let mut total_size = 0u64;
    let mut total_packed = 0u64;
    for entry in dir.entries() {
        let (year, month, day) = entry.date();
        let (hour, minute, _) = entry.time();
        let method = match entry.method {
            zipmend::CompressionMethod::Stored => "store",
            zipmend::CompressionMethod::Deflate => "deflate",
            zipmend::CompressionMethod::Unknown(_) => "other",
        };
        println!(
            "{:>12} {:>12} {:>8} {:04}-{:02}-{:02} {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            method,
            year,
            month,
            day,
            hour,
            minute,
            entry.name_string()
        );
        total_size += entry.uncompressed_size;
        total_packed += entry.compressed_size;
    }
    println!(
        "{:>12} {:>12}          {} entries",
        total_size,
        total_packed,
        dir.len()
    );
    Ok(())
}

fn digest(archive: &Path, entry: &str) -> Result<()> {
    let mut dir = open_directory(archive)?;
    let digest = dir.digest_entry::<Sha256>(entry.as_bytes())?;
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    println!("{hex}  {entry}");
    Ok(())
}

/// Write the patch to a file, or apply it to produce `output` (the
/// original archive itself when no output is named).
fn emit(
    patch: PatchSet,
    archive: &Path,
    patch_path: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    if let Some(path) = patch_path {
        fs::write(path, patch.to_bytes())
            .with_context(|| format!("cannot write patch to {}", path.display()))?;
        return Ok(());
    }
    let output = output.unwrap_or(archive);
    patch.apply(archive, output).with_context(|| {
        format!(
            "cannot apply patch from {} to {}",
            archive.display(),
            output.display()
        )
    })?;
    Ok(())
}

fn delete(
    archive: &Path,
    names: &[String],
    patch_path: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let mut dir = open_directory(archive)?;
    let mut deleted = 0usize;
    let mutation = Mutation::walk(&mut dir, |entry| {
        Ok(if names.iter().any(|n| n.as_bytes() == entry.name) {
            deleted += 1;
            Disposition::Delete
        } else {
            Disposition::Keep
        })
    })?;
    if deleted == 0 {
        bail!("no entries matched");
    }
    let (patch, _) = mutation.finish()?;
    emit(patch, archive, patch_path, output)
}

fn add(
    archive: &Path,
    file: &Path,
    name: Option<&str>,
    store: bool,
    patch_path: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let content =
        fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
    let name: PathBuf = match name {
        Some(name) => PathBuf::from(name),
        None => PathBuf::from(
            file.file_name()
                .context("input file has no name; pass --name")?,
        ),
    };
    let name = name.to_string_lossy().into_owned();

    let mut dir = open_directory(archive)?;
    let mut mutation = Mutation::walk(&mut dir, |_| Ok(Disposition::Keep))?;
    mutation.add_entry(name.as_bytes(), &[], &content, !store)?;
    let (patch, _) = mutation.finish()?;
    emit(patch, archive, patch_path, output)
}

fn apply(patch: &Path, target: &Path, output: Option<&Path>) -> Result<()> {
    let bytes =
        fs::read(patch).with_context(|| format!("cannot read patch {}", patch.display()))?;
    let patch_set = PatchSet::from_bytes(&bytes)?;
    let output = output.unwrap_or(target);
    patch_set
        .apply(target, output)
        .with_context(|| format!("cannot apply patch to {}", target.display()))?;
    Ok(())
}
