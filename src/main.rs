use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use tokio::sync::mpsc;

use crc_squared::progress_reporter::ProgressReporter;
use crc_squared::shared_types::ByteCount;
use crc_squared::{
    open_source, parallel_checksum, ChecksumPreferences, CombineStrategy, RandomAccessSource,
    DEFAULT_PART_SIZE,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Part size in bytes
    #[arg(short, long, default_value_t = DEFAULT_PART_SIZE, value_parser = clap::value_parser!(u64).range(1..))]
    part_size: u64,

    /// Number of concurrent workers, 0 for one per core
    #[arg(short, long, default_value_t = 0)]
    concurrency: usize,

    /// Read the file through a memory map
    #[arg(short, long)]
    mmap: bool,

    /// How partial checksums are combined
    #[arg(short, long, value_enum, default_value_t = CombineStrategy::Tree)]
    strategy: CombineStrategy,

    /// Show a progress bar on stderr
    #[arg(long)]
    progress: bool,

    /// More log output, repeat for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// File to checksum
    file: PathBuf,
}

fn init_logging(verbose: u8, multi: MultiProgress) -> Result<(), Box<dyn Error>> {
    let level = match verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let logger = *simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    );
    LogWrapper::new(multi, logger).try_init()?;
    log::set_max_level(level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();

    let multi = MultiProgress::new();
    init_logging(args.verbose, multi.clone())?;

    let specs = ChecksumPreferences {
        part_size: args.part_size,
        concurrency: args.concurrency,
        strategy: args.strategy,
    };

    let source = open_source(&args.file, args.mmap)?;
    let (s_progress, reporter) = if args.progress {
        let (s_progress, r_progress) = mpsc::channel::<ByteCount>(64);
        let reporter = ProgressReporter::new(r_progress, source.len(), multi.clone()).spawn();
        (Some(s_progress), Some(reporter))
    } else {
        (None, None)
    };

    let checksum = parallel_checksum(source, specs, s_progress).await?;
    if let Some(reporter) = reporter {
        reporter.await?;
    }

    println!("{checksum}");
    Ok(())
}
