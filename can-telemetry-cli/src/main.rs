//! CAN Telemetry CLI Application
//!
//! Headless front end for the telemetry core. It connects to the bus relay (or
//! replays a recorded dump), drives the consumer tick loop, sends any commands or
//! actuator nudges given on the command line and prints a final snapshot of every
//! channel, the tracked vessels, subsystem liveness and relay health.

use anyhow::{Context, Result};
use can_telemetry_core::pipeline::{
    Connector, Consumer, LocalConnector, Pipeline, ReplayConnector, SshConnector, TelemetrySnapshot,
};
use can_telemetry_core::{
    ActuatorStep, EntityLog, OutboundCommand, RawFrameLog, RedrawSink, SessionLogs, TelemetryRegistry, ValuesLog,
};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

mod config;

use config::{AppConfig, TransportMode};

/// CAN Telemetry - live decoding of a relayed CAN bus
#[derive(Parser, Debug)]
#[command(name = "can-telemetry")]
#[command(about = "Decode, log and command a relayed CAN bus", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Replay a recorded candump file instead of connecting to the relay
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Stop after this many seconds (default: when the stream closes)
    #[arg(long, value_name = "SECS")]
    duration: Option<f64>,

    /// Command to send, e.g. `rudder:10`, `pid:1,0.5,0`, `power-off` (can be repeated)
    #[arg(long, value_name = "CMD")]
    send: Vec<String>,

    /// Actuator nudge: rudder-left, rudder-right, rudder-center, trim-left,
    /// trim-right or trim-center (can be repeated; applied after --send)
    #[arg(long, value_name = "STEP")]
    nudge: Vec<String>,

    /// Channel to mark visible; its redraws are logged (can be repeated)
    #[arg(long, value_name = "CHANNEL")]
    watch: Vec<String>,

    /// Print the final snapshot as JSON
    #[arg(long)]
    json: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("CAN Telemetry CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using telemetry core v{}", can_telemetry_core::VERSION);

    let mut app = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(replay) = &args.replay {
        app.transport.mode = TransportMode::Replay;
        app.transport.replay_file = Some(replay.clone());
    }

    // Reject bad commands before anything is started
    let commands = args
        .send
        .iter()
        .map(|text| {
            text.parse::<OutboundCommand>()
                .with_context(|| format!("Invalid --send argument '{}'", text))
        })
        .collect::<Result<Vec<_>>>()?;
    let nudges = args
        .nudge
        .iter()
        .map(|text| {
            text.parse::<ActuatorStep>()
                .with_context(|| format!("Invalid --nudge argument '{}'", text))
        })
        .collect::<Result<Vec<_>>>()?;

    run(&app, &args, &commands, &nudges)
}

fn run(app: &AppConfig, args: &Args, commands: &[OutboundCommand], nudges: &[ActuatorStep]) -> Result<()> {
    let config = &app.telemetry;
    let started = Instant::now();
    let logs = SessionLogs::new(&config.log_dir, Local::now());

    let raw_log = RawFrameLog::create(&logs.raw_frames)
        .with_context(|| format!("Failed to create {:?}", logs.raw_frames))?;

    let connector = connector(app)?;
    let (pipeline, queues) =
        Pipeline::start(config, connector.as_ref(), raw_log, started).context("Failed to start the pipeline")?;

    let registry = TelemetryRegistry::standard(config, 0.0).context("Invalid frame registry")?;
    let values = ValuesLog::create(&logs.values, &registry.channel_names())
        .with_context(|| format!("Failed to create {:?}", logs.values))?;
    let entities = EntityLog::create(&logs.entities)
        .with_context(|| format!("Failed to create {:?}", logs.entities))?;
    let mut consumer = Consumer::new(config, registry, queues, started).with_logs(values, entities);

    for name in &args.watch {
        let channel = consumer
            .registry_mut()
            .channel_mut(name)
            .with_context(|| format!("Unknown channel '{}'", name))?;
        channel.set_sink(Box::new(LogRedraw));
        channel.set_visible(true);
    }

    for command in commands {
        if let Err(e) = consumer.submit(command) {
            log::error!("{} failed: {}", command.label(), e);
        }
    }
    for step in nudges {
        if let Err(e) = consumer.nudge(*step) {
            log::error!("{:?} failed: {}", step, e);
        }
    }

    let deadline = args.duration.map(|secs| started + Duration::from_secs_f64(secs.max(0.0)));
    loop {
        let report = consumer.tick();
        for line in &report.diagnostics {
            log::warn!("{}", line);
        }
        for change in &report.liveness {
            log::info!("{}: {}", change.subsystem, change.state);
        }
        for link in &report.relay {
            log::info!("Relay {}", link);
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        // nothing arrives once the stream has closed; one more tick drained the queue
        if deadline.is_none() && pipeline.reader_finished() && report.processed == 0 {
            break;
        }
        thread::sleep(config.tick_interval());
    }

    let snapshot = consumer.snapshot();
    let shutdown = pipeline.shutdown();
    if shutdown.stream_killed {
        log::info!("Stream process killed to stop the reader");
    }
    if shutdown.reader_abandoned {
        log::warn!("Reader was still blocked on the stream at exit");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

fn connector(app: &AppConfig) -> Result<Box<dyn Connector>> {
    match app.transport.mode {
        TransportMode::Ssh => Ok(Box::new(SshConnector)),
        TransportMode::Local => Ok(Box::new(LocalConnector)),
        TransportMode::Replay => {
            let path = app
                .transport
                .replay_file
                .clone()
                .context("Replay mode needs a replay file")?;
            Ok(Box::new(
                ReplayConnector::new(path)
                    .with_chunk_size(app.transport.chunk_size)
                    .with_chunk_delay(Duration::from_millis(app.transport.chunk_delay_ms)),
            ))
        }
    }
}

/// Logs every redraw of a watched channel
struct LogRedraw;

impl RedrawSink for LogRedraw {
    fn redraw(&mut self, channel: &str, points: &[(f64, f64)]) {
        match points.last() {
            Some((time, value)) => log::info!("{}: {} points, last {} at {:.3}s", channel, points.len(), value, time),
            None => log::info!("{}: empty", channel),
        }
    }
}

fn print_snapshot(snapshot: &TelemetrySnapshot) {
    println!("\n=== Telemetry after {:.1}s ===", snapshot.elapsed_secs);
    for channel in &snapshot.channels {
        let value = channel
            .value
            .map(|v| v.to_string())
            .unwrap_or_else(|| "None".to_string());
        println!("  {:<22} {} {}", channel.name, value, channel.unit);
    }

    println!("\nTracked vessels: {}", snapshot.entities);
    for heartbeat in &snapshot.heartbeats {
        println!("{} heartbeat: {}", heartbeat.subsystem, heartbeat.state);
    }
    if let Some(relay) = &snapshot.relay {
        println!("Relay: {} ({})", relay.link, relay.label);
    }
    println!("Rudder {}°, trim tab {}°", snapshot.rudder, snapshot.trim_tab);

    let counters = &snapshot.counters;
    println!("\n=== Counters ===");
    println!("Lines processed:   {}", counters.lines_processed);
    println!("Decode errors:     {}", counters.decode_errors);
    println!("Unknown frames:    {}", counters.unknown_frames);
    println!("AIS batches:       {}", counters.batches_flushed);
    println!("Values rows:       {}", counters.values_rows);
    println!("Commands sent:     {}", counters.commands_sent);
    println!("Dropped (display): {}", counters.dropped_lines);
}

fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
