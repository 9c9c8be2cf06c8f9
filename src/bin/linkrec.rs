//! linkrec - inspect and replay recorded link sessions.

use clap::{Parser, Subcommand};
use linkrec::{
    EventRouter, PrintDelegate, ReadableStore, Recorder, RecorderConfig, ReplayEngine, Speed,
    WaveformToWav,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "linkrec")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the length, time span and layout of a store
    Info {
        /// Path to the store
        store: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay a store to one or more consumers
    Replay {
        /// Path to the store
        store: PathBuf,

        /// Multiple of real time, or "max" to replay unpaced
        #[arg(short, long, default_value = "max")]
        speed: Speed,

        /// First timestamp to replay (inclusive)
        #[arg(long)]
        start: Option<u32>,

        /// Last timestamp to replay (exclusive)
        #[arg(long)]
        stop: Option<u32>,

        /// Record the replayed stream into a new store under this directory
        #[arg(long)]
        copy_to: Option<PathBuf>,

        /// Recorder configuration file (JSON) used with --copy-to
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the waveform to a WAV file
        #[arg(long)]
        wav: Option<PathBuf>,

        /// WAV playback speedup
        #[arg(long, default_value_t = 200)]
        wav_speedup: u32,

        /// Log every record
        #[arg(long)]
        print: bool,

        /// Only forward records between headband undock and dock events
        #[arg(long)]
        docked: bool,
    },
}

struct ReplayArgs {
    store: PathBuf,
    speed: Speed,
    start: Option<u32>,
    stop: Option<u32>,
    copy_to: Option<PathBuf>,
    config: Option<PathBuf>,
    wav: Option<PathBuf>,
    wav_speedup: u32,
    print: bool,
    docked: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Info { store, json } => info(store, json),
        Commands::Replay {
            store,
            speed,
            start,
            stop,
            copy_to,
            config,
            wav,
            wav_speedup,
            print,
            docked,
        } => replay(ReplayArgs {
            store,
            speed,
            start,
            stop,
            copy_to,
            config,
            wav,
            wav_speedup,
            print,
            docked,
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn info(path: PathBuf, json: bool) -> linkrec::Result<()> {
    let store = ReadableStore::open(&path)?;
    let info = store.info();

    if json {
        let text = serde_json::to_string_pretty(&info)
            .map_err(|e| linkrec::LinkError::Serialization(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    println!("store:        {}", info.path.display());
    println!("records:      {}", info.records);
    match (info.first_timestamp, info.last_timestamp) {
        (Some(first), Some(last)) => {
            println!("time span:    {} .. {} ({} s)", first, last, last as i64 - first as i64)
        }
        _ => println!("time span:    empty"),
    }
    println!("chunks:       {} of up to {} rows", info.chunks, info.chunk_rows);
    println!("payload log:  {} bytes", info.payload_bytes);
    println!("compression:  level {}", info.compression_level);
    println!("checksums:    {}", if info.checksum { "on" } else { "off" });
    println!("monotonic:    {}", info.monotonic);
    Ok(())
}

fn replay(args: ReplayArgs) -> linkrec::Result<()> {
    let mut recorder = match &args.copy_to {
        Some(dir) => {
            let mut config = match &args.config {
                Some(path) => RecorderConfig::from_json_file(path)?,
                None => RecorderConfig::default(),
            };
            config.base_dir = dir.clone();
            Some(Recorder::new(config))
        }
        None => None,
    };
    let mut wav = args.wav.as_ref().map(|_| WaveformToWav::new());
    let mut printer = args.print.then(PrintDelegate::new);

    // Without dock gating the copy covers the whole replay
    if !args.docked {
        if let Some(recorder) = recorder.as_mut() {
            recorder.start(None)?;
        }
    }

    let stats = {
        let mut router = EventRouter::new();
        let mut engine = ReplayEngine::open(&args.store)?;

        if args.docked {
            if let Some(recorder) = recorder.as_mut() {
                router.add_startable(recorder);
            }
            if let Some(wav) = wav.as_mut() {
                router.add_delegate(wav);
            }
            if let Some(printer) = printer.as_mut() {
                router.add_delegate(printer);
            }
            engine.register_callback(&mut router);
        } else {
            if let Some(recorder) = recorder.as_mut() {
                engine.register_callback(recorder);
            }
            if let Some(wav) = wav.as_mut() {
                engine.register_callback(wav);
            }
            if let Some(printer) = printer.as_mut() {
                engine.register_callback(printer);
            }
        }

        engine.run(args.speed, args.start, args.stop)?
    };

    if let Some(summary) = recorder.as_mut().map(Recorder::stop).transpose()?.flatten() {
        println!("copied {} records to {}", summary.records, summary.path.display());
    }
    if let (Some(wav), Some(path)) = (wav.as_mut(), args.wav.as_ref()) {
        wav.write(path, args.wav_speedup)?;
    }

    println!(
        "replayed {} records in {:.2?}{}",
        stats.dispatched,
        stats.elapsed,
        if stats.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}
