use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use ztoc::{
    builder::{self, BuildConfig},
    cancel::CancelToken,
    codec,
    extract::Extractor,
    model::CompressionAlgorithm,
    source::FileSource,
};

#[derive(Parser)]
#[command(name = "ztoc", about = "Build, inspect, and extract from gzip-tar layer indexes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a ztoc from a gzipped tar layer.
    Build {
        /// Path to the gzipped tar layer.
        layer: PathBuf,
        /// Path to write the serialized ztoc to.
        output: PathBuf,
        /// Uncompressed bytes per checkpoint.
        #[arg(long, default_value_t = builder::DEFAULT_SPAN_SIZE)]
        span_size: u64,
        /// Stored verbatim in the ztoc's `build_tool_id` field.
        #[arg(long, default_value = "ztoc")]
        build_tool_id: String,
    },
    /// Print a ztoc's table of contents and compression summary.
    Inspect {
        /// Path to a serialized ztoc.
        ztoc: PathBuf,
    },
    /// Extract one file's bytes from a layer using its ztoc.
    Extract {
        /// Path to the gzipped tar layer.
        layer: PathBuf,
        /// Path to a serialized ztoc.
        ztoc: PathBuf,
        /// Name of the file to extract, as recorded in the tar.
        name: String,
        /// Optional sub-range `lo:hi` within the file; defaults to the
        /// whole file.
        #[arg(long, value_parser = parse_range)]
        range: Option<(u64, u64)>,
        /// Write extracted bytes here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_range(s: &str) -> Result<(u64, u64), String> {
    let (lo, hi) = s
        .split_once(':')
        .ok_or_else(|| format!("range {s:?} must be LO:HI"))?;
    let lo: u64 = lo.parse().map_err(|_| format!("invalid range start {lo:?}"))?;
    let hi: u64 = hi.parse().map_err(|_| format!("invalid range end {hi:?}"))?;
    Ok((lo, hi))
}

fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ztoc: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Build {
            layer,
            output,
            span_size,
            build_tool_id,
        } => run_build(layer, output, span_size, build_tool_id),
        Command::Inspect { ztoc } => run_inspect(ztoc),
        Command::Extract {
            layer,
            ztoc,
            name,
            range,
            output,
        } => run_extract(layer, ztoc, name, range, output),
    }
}

fn run_build(layer: PathBuf, output: PathBuf, span_size: u64, build_tool_id: String) -> anyhow::Result<()> {
    let config = BuildConfig {
        span_size,
        compression_algorithm: CompressionAlgorithm::Gzip,
        build_tool_id,
    };
    let reader = File::open(&layer)?;
    let ztoc = builder::build(reader, &config, &CancelToken::none())?;
    let (bytes, descriptor) = codec::marshal(&ztoc)?;
    std::fs::write(&output, &bytes)?;
    eprintln!(
        "wrote {} ({} bytes, {} entries, digest {})",
        output.display(),
        descriptor.size,
        ztoc.toc.len(),
        descriptor.digest
    );
    Ok(())
}

fn run_inspect(ztoc_path: PathBuf) -> anyhow::Result<()> {
    let bytes = std::fs::read(&ztoc_path)?;
    let ztoc = codec::unmarshal(&bytes)?;
    ztoc.validate()?;

    println!("version: {}", ztoc.version);
    println!("build_tool_id: {}", ztoc.build_tool_id);
    println!("compressed_archive_size: {}", ztoc.compressed_archive_size);
    println!("uncompressed_archive_size: {}", ztoc.uncompressed_archive_size);
    println!(
        "spans: {} (span_size {})",
        ztoc.compression_info.max_span_id + 1,
        ztoc.compression_info.span_size
    );
    println!("entries: {}", ztoc.toc.len());
    for entry in &ztoc.toc {
        println!(
            "  {:?} {:>10} @ {:<12} {}",
            entry.kind,
            entry.uncompressed_size,
            entry.uncompressed_offset,
            entry.name.display()
        );
    }
    Ok(())
}

fn run_extract(
    layer: PathBuf,
    ztoc_path: PathBuf,
    name: String,
    range: Option<(u64, u64)>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(&ztoc_path)?;
    let ztoc = codec::unmarshal(&bytes)?;
    let source = FileSource::open(&layer)?;
    let extractor = Extractor::new(&ztoc);
    let cancel = CancelToken::none();

    let data = match range {
        Some((lo, hi)) => extractor.extract_range(&source, &name, lo, hi, &cancel)?,
        None => extractor.extract_file(&source, &name, &cancel)?,
    };

    match output {
        Some(path) => std::fs::write(path, &data)?,
        None => io::stdout().write_all(&data)?,
    }
    Ok(())
}
