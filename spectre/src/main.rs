use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use rusty_spectre::{
    build_library, BlockSource, Configuration, Fingerprinter, ListenSession, RawPcmSource, SampleFormat,
    SpectralAnalyser,
};

use crate::mic::MicSource;

mod decode;
mod mic;

/// Identify recordings by their acoustic fingerprint.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log every library hit and time-delta match
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a library from reference files and identify a capture against it
    Listen(ListenArgs),
    /// Print the per-block band candidates of audio files
    Dump(DumpArgs),
}

#[derive(Args, Debug)]
struct ListenArgs {
    /// Reference recordings
    #[arg(required = true)]
    references: Vec<PathBuf>,

    /// Audio file to identify, `mic` for the default input device or `-` for raw PCM on stdin
    #[arg(short, long, default_value = "mic")]
    input: String,

    /// Sample format of raw PCM on stdin (s16 or f32, little-endian mono)
    #[arg(short, long, default_value = "s16")]
    format: SampleFormat,

    /// Sample rate of raw PCM on stdin
    #[arg(short, long, default_value_t = 11025)]
    rate: u32,

    /// Spectral analyser (fft, pwelch or overlap)
    #[arg(short, long, default_value = "pwelch")]
    analyser: SpectralAnalyser,
}

#[derive(Args, Debug)]
struct DumpArgs {
    /// Files to analyze
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Restrict the output to the first seconds of each file
    #[arg(short, long, default_value_t = 5.0)]
    seconds: f64,

    /// Print the strongest local maxima instead of the band candidates
    #[arg(short, long)]
    peaks: bool,

    /// Spectral analyser (fft, pwelch or overlap)
    #[arg(short, long, default_value = "pwelch")]
    analyser: SpectralAnalyser,
}

const DUMP_PEAKS: usize = 6;

/// Stream position as `h:mm:ss.cc`.
fn clock(seconds: f64) -> String {
    let centis = (seconds.max(0.0) * 100.0).round() as u64;
    let secs = centis / 100;
    format!("{}:{:02}:{:02}.{:02}", secs / 3600, secs / 60 % 60, secs % 60, centis % 100)
}

fn listen(args: ListenArgs) -> anyhow::Result<()> {
    let reference_config = Configuration::preset_reference().with_analyser(args.analyser);
    let live_config = Configuration::preset_live().with_analyser(args.analyser);

    let references = args
        .references
        .iter()
        .map(|path| decode::open(path, &reference_config))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let (library, stats) = build_library(references, &reference_config).context("building the library")?;
    println!("library: {} ({} unique keys)", stats, library.len());

    let mut source: Box<dyn BlockSource> = match args.input.as_str() {
        "mic" => Box::new(MicSource::new(live_config.sample_rate(), live_config.block_size())),
        "-" => Box::new(RawPcmSource::new(
            "live",
            io::stdin().lock(),
            args.format,
            args.rate,
            live_config.block_size(),
        )),
        path => Box::new(decode::open(path, &live_config)?),
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)).context("installing the interrupt handler")?;

    let mut session = ListenSession::new(&live_config, Arc::new(library))?.with_cancel_flag(cancel);
    let block_duration = live_config.block_duration();
    let mut evaluations = 0usize;
    let summary = session
        .run(source.as_mut(), |ranking| {
            evaluations += 1;
            let elapsed = (evaluations * live_config.evaluate_interval()) as f64 * block_duration;
            println!("[{}]", clock(elapsed));
            for hit in ranking.iter().take(3) {
                println!("  {}", hit);
            }
        })
        .context("listening")?;

    println!(
        "{} blocks, {} fingerprints, {}",
        summary.blocks, summary.fingerprints, summary.stats
    );
    match summary.best() {
        Some(best) => {
            for hit in summary.ranking.iter() {
                println!("{}", hit);
            }
            println!("best match: {} ({:.1}%)", best.source, 100.0 * best.confidence());
        }
        None => println!("no match"),
    }

    Ok(())
}

fn dump(args: DumpArgs) -> anyhow::Result<()> {
    let config = Configuration::preset_reference().with_analyser(args.analyser);
    let max_blocks = (args.seconds * config.blocks_per_second()).ceil() as usize;

    for path in args.files.iter() {
        let mut source = decode::open(path, &config)?;
        let mut fingerprinter = Fingerprinter::new(&config)?;
        println!("{}", source.name());

        source.start().with_context(|| format!("reading {}", path.display()))?;
        let mut blocks = 0;
        while blocks < max_blocks {
            let block = match source.read().with_context(|| format!("reading {}", path.display()))? {
                Some(block) => block,
                None => break,
            };
            blocks += 1;

            let spectrum = fingerprinter.analyze(&block);
            let timestamp = clock(block.timestamp);
            if args.peaks {
                let peaks = spectrum
                    .maxima()
                    .filter(config.lower_cutoff(), config.upper_cutoff(), config.silence_threshold())
                    .top_by_power(DUMP_PEAKS);
                println!("{}  {}", timestamp, peaks);
            } else {
                let shaped = fingerprinter.shape(&spectrum);
                match fingerprinter.calculator().extract(&shaped) {
                    Some(fp) => println!("{}  {}", timestamp, fp),
                    None => println!("{}  -", timestamp),
                }
            }
        }
        source.close().with_context(|| format!("closing {}", path.display()))?;
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match cli.command {
        Command::Listen(args) => listen(args),
        Command::Dump(args) => dump(args),
    }
}
