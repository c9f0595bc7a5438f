use floodgen::cancel::CancelToken;
use floodgen::config::JobConfig;
use floodgen::job::{self, JobContext};
use floodgen::metrics::{MetricsSink, PrometheusSink};
use floodgen::packet::PacketDescription;
use floodgen::raw::PnetConnector;
use floodgen::supervisor;
use floodgen::templates::{Context, PacketTemplate};
mod cmd;

use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

fn load_config(path: &str) -> JobConfig {
    match JobConfig::from_file(Path::new(path)) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Cannot load {path}: {e}");
            process::exit(1);
        }
    }
}

/// The entry point of the application.
///
/// This function prepare the job according to the command line
fn main() {
    let args = cmd::Args::parse();
    let default_filter = match args.command {
        cmd::Command::Run { debug: true, .. } => "debug",
        _ => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match args.command {
        cmd::Command::Run {
            config,
            debug,
            print_metrics,
            flush_interval_ms,
        } => {
            let config = load_config(&config);
            let cancel = CancelToken::new();

            // Handle ctrl+C
            let cancel_ctrlc = cancel.clone();
            let interrupted = AtomicBool::new(false);
            if let Err(e) = ctrlc::set_handler(move || {
                if !interrupted.swap(true, Ordering::Relaxed) {
                    log::warn!("Ending the flood, please wait");
                    cancel_ctrlc.cancel();
                } else {
                    process::exit(1);
                }
            }) {
                log::warn!("Error setting Ctrl-C handler: {e}");
            }

            let prometheus = match PrometheusSink::new() {
                Ok(sink) => Arc::new(sink),
                Err(e) => {
                    log::error!("Cannot register the metrics: {e}");
                    process::exit(1);
                }
            };
            let sink: Arc<dyn MetricsSink> = prometheus.clone();

            let ctx = JobContext {
                cancel,
                debug,
                flush_interval: Duration::from_millis(flush_interval_ms.max(1)),
            };
            let handle = supervisor::spawn("Packetgen", move || {
                job::run_packetgen(&ctx, config, &PnetConnector, sink)
            });
            let result = match handle {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    Err(floodgen::JobError::Panicked("job thread panicked".into()))
                }),
                Err(e) => {
                    log::error!("Cannot start the job: {e}");
                    process::exit(1);
                }
            };

            if print_metrics {
                match prometheus.encode_text() {
                    Ok(text) => print!("{text}"),
                    Err(e) => log::error!("Cannot encode the metrics: {e}"),
                }
            }

            match result {
                Ok(summary) => log::info!(
                    "Flood ended: {} packets sent ({} bytes)",
                    summary.packets,
                    summary.bytes
                ),
                Err(e) => {
                    log::error!("Flood failed: {e}");
                    process::exit(1);
                }
            }
        }
        cmd::Command::Render { config, count } => {
            let config = load_config(&config);
            let mut template = match PacketTemplate::compile(&config.packet, config.seed) {
                Ok(t) => t,
                Err(e) => {
                    log::error!("Error parsing packet: {e}");
                    process::exit(1);
                }
            };
            let ctx = Context::new();
            for _ in 0..count {
                let rendered = match template.render(&ctx) {
                    Ok(rendered) => rendered,
                    Err(e) => {
                        log::error!("Error rendering packet: {e}");
                        process::exit(1);
                    }
                };
                match PacketDescription::decode(&rendered) {
                    Ok(packet) => println!(
                        "{}",
                        serde_json::json!({ "rendered": rendered, "packet": packet })
                    ),
                    Err(e) => {
                        log::error!("Error decoding packet: {e}");
                        process::exit(1);
                    }
                }
            }
        }
    }
}
