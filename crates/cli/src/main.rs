// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use uart_echo_config::EchoManifest;
use uart_echo_core::peripherals::{SimRxHandle, SimUart, StreamUart};
use uart_echo_core::system::{boot, boot_with_storage, load_manifest};
use uart_echo_core::{
    MemStore, MetricsSummary, RelayMetrics, SystemHandle, UartConfig, UartResult,
};

const EXIT_PASS: u8 = 0;
const EXIT_ECHO_MISMATCH: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const PROBE_SCHEMA_VERSION: &str = "1.0";

const DEFAULT_PAYLOAD: &str = "\"A UART moves one byte at a time, framed by a start bit, \
eight data bits and a stop bit, with nothing but an agreed baud rate keeping both ends in step. \
There is no clock line and no acknowledgement, so a receiver that falls behind simply loses data. \
Echo tests like this one catch the usual suspects early: a wrong baud rate garbles every byte, \
a missing ground turns the line into an antenna, and a buffer sized one byte too small truncates \
exactly the message you needed to see.\"";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "UART echo relay: receive, store, read back, transmit",
    long_about = None
)]
struct Cli {
    /// Path to the echo manifest (YAML). Defaults to the stock configuration.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the echo task on stdin/stdout or a device node until the line closes.
    Run(RunArgs),

    /// Drive an in-process UART with a payload and check it comes back intact.
    Probe(ProbeArgs),

    /// Validate a manifest and print the effective configuration.
    CheckConfig,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Serial device or FIFO to use instead of stdin/stdout
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Override the storage mount point
    #[arg(long)]
    store_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    /// Text sent on every round
    #[arg(long, conflicts_with = "payload_file")]
    payload: Option<String>,

    /// Read the payload from a file
    #[arg(long)]
    payload_file: Option<PathBuf>,

    /// Number of write/read rounds
    #[arg(long, default_value = "3")]
    rounds: u32,

    /// Keep the relay file in this directory instead of in memory
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// How long to wait for each echo, in milliseconds
    #[arg(long, default_value = "3000")]
    timeout_ms: u64,

    /// Pause between rounds, in milliseconds
    #[arg(long, default_value = "0")]
    pause_ms: u64,

    /// Print the report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct ProbeRound {
    round: u32,
    written: usize,
    read: usize,
    matched: bool,
    elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    result_schema_version: String,
    status: String,
    payload_len: usize,
    rounds: Vec<ProbeRound>,
    metrics: MetricsSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr: stdout may be the UART itself.
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    let manifest = match load_manifest(cli.config.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match cli.command {
        Commands::Run(args) => run_echo(manifest, args),
        Commands::Probe(args) => run_probe(manifest, args),
        Commands::CheckConfig => run_check_config(&manifest),
    }
}

fn run_check_config(manifest: &EchoManifest) -> ExitCode {
    match manifest.to_yaml() {
        Ok(yaml) => {
            print!("{}", yaml);
            ExitCode::from(EXIT_PASS)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn run_echo(mut manifest: EchoManifest, args: RunArgs) -> ExitCode {
    info!("Starting UART echo");
    if let Some(dir) = args.store_dir {
        manifest.storage.base_path = dir;
    }
    let tick = Duration::from_millis(manifest.echo.tick_ms);

    let booted = match &args.device {
        Some(path) => {
            let device = match OpenOptions::new().read(true).write(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    error!("Failed to open device {:?}: {}", path, e);
                    return ExitCode::from(EXIT_RUNTIME_ERROR);
                }
            };
            let writer = match device.try_clone() {
                Ok(f) => f,
                Err(e) => {
                    error!("Failed to duplicate device handle {:?}: {}", path, e);
                    return ExitCode::from(EXIT_RUNTIME_ERROR);
                }
            };
            info!("Using device {:?}", path);
            boot(&manifest, move |cfg| StreamUart::spawn(cfg, device, writer, tick))
        }
        None => boot(&manifest, move |cfg| {
            StreamUart::spawn(cfg, std::io::stdin(), std::io::stdout(), tick)
        }),
    };

    let handle = match booted {
        Ok(h) => h,
        Err(e) => {
            error!("Boot failed: {}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    let metrics = Arc::clone(handle.metrics());
    match handle.supervise() {
        Ok(()) => {
            report_metrics(&metrics);
            ExitCode::from(EXIT_PASS)
        }
        Err(e) => {
            error!("Echo task failed: {}", e);
            report_metrics(&metrics);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

fn report_metrics(metrics: &RelayMetrics) {
    let summary = metrics.summary();
    info!("Echo loop finished.");
    info!("Iterations: {}", summary.iterations);
    info!("Chunks echoed: {}", summary.chunks_echoed);
    info!("Chunks dropped: {}", summary.chunks_dropped);
    info!(
        "Bytes received/transmitted: {}/{}",
        summary.bytes_received, summary.bytes_transmitted
    );
    info!("Average throughput: {:.2} B/s", metrics.get_throughput());
}

fn load_payload(args: &ProbeArgs) -> anyhow::Result<Vec<u8>> {
    use anyhow::Context;

    let payload = if let Some(path) = &args.payload_file {
        std::fs::read(path).with_context(|| format!("Failed to read payload file {:?}", path))?
    } else if let Some(text) = &args.payload {
        text.clone().into_bytes()
    } else {
        DEFAULT_PAYLOAD.as_bytes().to_vec()
    };

    if payload.is_empty() {
        anyhow::bail!("Probe payload cannot be empty");
    }
    Ok(payload)
}

fn sink_bytes(sink: &Mutex<Vec<u8>>) -> Vec<u8> {
    sink.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

fn sink_len(sink: &Mutex<Vec<u8>>) -> usize {
    sink.lock().unwrap_or_else(PoisonError::into_inner).len()
}

fn run_probe(mut manifest: EchoManifest, args: ProbeArgs) -> ExitCode {
    let payload = match load_payload(&args) {
        Ok(p) => p,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if args.rounds == 0 {
        error!("Probe needs at least one round");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let sink = Arc::new(Mutex::new(Vec::new()));
    let (handle, rx) = match start_probe_system(&mut manifest, &args, Arc::clone(&sink)) {
        Ok(started) => started,
        Err(e) => {
            error!("Boot failed: {:#}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    let timeout = Duration::from_millis(args.timeout_ms);
    let mut rounds = Vec::with_capacity(args.rounds as usize);
    for round in 1..=args.rounds {
        let start_len = sink_len(&sink);
        let started = Instant::now();
        rx.inject(&payload);

        while sink_len(&sink) - start_len < payload.len() && started.elapsed() < timeout {
            std::thread::sleep(Duration::from_millis(1));
        }

        let wire = sink_bytes(&sink);
        let end = wire.len().min(start_len + payload.len());
        let echoed = &wire[start_len..end];
        let matched = echoed == payload.as_slice();
        if !args.json {
            println!(
                "round {}: wrote {} bytes, read {} bytes{}",
                round,
                payload.len(),
                echoed.len(),
                if matched { "" } else { " (MISMATCH)" }
            );
        }
        rounds.push(ProbeRound {
            round,
            written: payload.len(),
            read: echoed.len(),
            matched,
            elapsed_ms: started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64,
        });

        // Let a late tail drain before the next round so rounds stay aligned.
        if !matched {
            std::thread::sleep(Duration::from_millis(manifest.echo.tick_ms * 2));
        }
        if args.pause_ms > 0 && round < args.rounds {
            std::thread::sleep(Duration::from_millis(args.pause_ms));
        }
    }

    rx.close();
    let metrics = Arc::clone(handle.metrics());
    let task_result = handle.supervise();

    let all_matched = rounds.iter().all(|r| r.matched);
    let message = match &task_result {
        Ok(()) => None,
        Err(e) => Some(e.to_string()),
    };
    if let Some(msg) = &message {
        warn!("Echo task ended with an error: {}", msg);
    }

    if args.json {
        let report = ProbeReport {
            result_schema_version: PROBE_SCHEMA_VERSION.to_string(),
            status: if all_matched && message.is_none() {
                "pass".to_string()
            } else {
                "fail".to_string()
            },
            payload_len: payload.len(),
            rounds,
            metrics: metrics.summary(),
            message,
        };
        match serde_json::to_string(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize probe report: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    }

    if task_result.is_err() {
        ExitCode::from(EXIT_RUNTIME_ERROR)
    } else if all_matched {
        ExitCode::from(EXIT_PASS)
    } else {
        ExitCode::from(EXIT_ECHO_MISMATCH)
    }
}

fn start_probe_system(
    manifest: &mut EchoManifest,
    args: &ProbeArgs,
    sink: Arc<Mutex<Vec<u8>>>,
) -> anyhow::Result<(SystemHandle, SimRxHandle)> {
    let mut uart = SimUart::install(UartConfig::from_manifest(manifest)?)?;
    uart.set_sink(Some(sink), false);
    uart.set_tick(Some(Duration::from_millis(manifest.echo.tick_ms)));
    let rx = uart.rx_handle();
    let install = move |_cfg: UartConfig| -> UartResult<SimUart> { Ok(uart) };

    let handle = match &args.store_dir {
        Some(dir) => {
            manifest.storage.base_path = dir.clone();
            boot(manifest, install)?
        }
        None => boot_with_storage(manifest, install, MemStore::new())?,
    };
    Ok((handle, rx))
}
