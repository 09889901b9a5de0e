//! Decode a binary file against a structure map and print the trace.
//!
//! Usage:
//!   structmap [OPTIONS] <MAP> [FILE]
//!
//! Reads FILE (stdin if omitted), optionally a window of it given by `--offset` / `--length`,
//! and decodes it starting at the `Main` struct (or `--entry`). With `--identify`, every
//! top-level struct is tried instead and a one-line verdict is printed for each.
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (e.g. `RUST_LOG=structmap=debug`).

use anyhow::{bail, Context};
use clap::Parser;
use positioned_io::{RandomAccessFile, ReadAt as _, Size as _};
use std::io::{self, Read as _, Write as _};
use std::path::{Path, PathBuf};
use structmap::{compile, identify, CompileOptions, DecodeOptions, Decoder, Endianness, ExprEvaluator};
use tracing_subscriber::EnvFilter;

/// structmap - decode binary data with a declarative structure map
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// The structure map source
    map: PathBuf,
    /// The file to decode, stdin if omitted
    file: Option<PathBuf>,
    /// Read multi-byte values as big-endian
    #[arg(short, long)]
    big_endian: bool,
    /// Struct to start decoding from
    #[arg(short, long, default_value = "Main")]
    entry: String,
    /// Byte offset into the input
    #[arg(long, default_value_t = 0)]
    offset: u64,
    /// Number of bytes to decode (default: to the end of the input)
    #[arg(long)]
    length: Option<u64>,
    /// Try every top-level struct and report which ones match
    #[arg(short, long)]
    identify: bool,
    /// Keep compiling after the first error and report all of them
    #[arg(short, long)]
    keep_going: bool,
}

/// Read `length` bytes (or up to the end) at `offset`.
fn read_window(path: Option<&Path>, offset: u64, length: Option<u64>) -> anyhow::Result<Vec<u8>> {
    match path {
        Some(path) => {
            let file = RandomAccessFile::open(path).with_context(|| format!("opening {}", path.display()))?;
            let size = file
                .size()?
                .ok_or_else(|| io::Error::other("cannot get file size"))?;
            if offset > size {
                bail!("offset {} is beyond the end of {} ({} bytes)", offset, path.display(), size);
            }
            let left = size - offset;
            let n = length.map_or(left, |l| l.min(left));
            let mut buf = vec![0u8; usize::try_from(n)?];
            file.read_exact_at(offset, &mut buf)?;
            Ok(buf)
        }
        None => {
            let mut all = Vec::new();
            io::stdin().read_to_end(&mut all)?;
            let start = usize::try_from(offset)?;
            if start > all.len() {
                bail!("offset {} is beyond the end of stdin ({} bytes)", offset, all.len());
            }
            let mut window = all.split_off(start);
            if let Some(l) = length {
                window.truncate(usize::try_from(l).unwrap_or(usize::MAX));
            }
            Ok(window)
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let source = std::fs::read_to_string(&cli.map).with_context(|| format!("reading {}", cli.map.display()))?;
    let options = CompileOptions {
        stop_on_first_error: !cli.keep_going,
        file_name: Some(cli.map.display().to_string()),
    };
    let compiled = compile(&source, &options);
    if !compiled.success() {
        eprint!("{}", compiled.error_log());
        bail!("{} error(s) compiling {}", compiled.errors.len(), cli.map.display());
    }

    let data = read_window(cli.file.as_deref(), cli.offset, cli.length)?;
    let endianness = if cli.big_endian { Endianness::Big } else { Endianness::Little };
    let evaluator = ExprEvaluator::new();

    if cli.identify {
        for c in identify(&compiled.map, &evaluator, &data, endianness) {
            match c.reason {
                None => println!("{}: match ({} bytes)", c.name, c.consumed),
                Some(reason) => println!("{}: no match at byte {} ({})", c.name, c.consumed, reason),
            }
        }
        return Ok(());
    }

    let decode = DecodeOptions { endianness, entry: cli.entry, limit: None };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = Decoder::new(&compiled.map, &evaluator).decode(&data, &decode, &mut out);
    out.flush()?;
    let done = result?;
    tracing::info!(consumed = done.consumed, total = data.len(), "decoded");
    Ok(())
}
