//! The flood job: render a packet template, send it through a raw connection, repeat.

use crate::cancel::CancelToken;
use crate::config::JobConfig;
use crate::error::{ConfigError, JobError};
use crate::gate::{BasicGate, Gate, Next};
use crate::metrics::{MetricsSink, PacketgenLabels, ProtocolLabel, Status};
use crate::monitor::{TrafficMonitor, FLUSH_INTERVAL};
use crate::packet::PacketDescription;
use crate::raw::{Connector, RawConnection};
use crate::templates::{render_scalar, Context, PacketTemplate};

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Execution context of a single job
#[derive(Debug, Clone)]
pub struct JobContext {
    pub cancel: CancelToken,
    /// Log every rendered packet
    pub debug: bool,
    pub flush_interval: Duration,
}

impl Default for JobContext {
    fn default() -> Self {
        JobContext {
            cancel: CancelToken::new(),
            debug: false,
            flush_interval: FLUSH_INTERVAL,
        }
    }
}

/// What a job did before ending cleanly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub packets: u64,
    pub bytes: u64,
}

/// The label only depends on the raw template: a "udp" key means UDP, anything else TCP
pub fn protocol_label(raw_packet: &Map<String, Value>) -> ProtocolLabel {
    if raw_packet.contains_key("udp") {
        ProtocolLabel::Udp
    } else {
        ProtocolLabel::Tcp
    }
}

/// Run a flood job paced by its own `interval_ms` / `count` settings
pub fn run_packetgen<C: Connector>(
    ctx: &JobContext,
    config: JobConfig,
    connector: &C,
    sink: Arc<dyn MetricsSink>,
) -> Result<JobSummary, JobError> {
    let gate = BasicGate::new(&config.basic, ctx.cancel.clone());
    run_packetgen_with_gate(ctx, config, gate, connector, sink)
}

/// Run a flood job with an explicit gate.
///
/// Every error is fatal: the job stops at the first one and returns it. Packets sent
/// before the error have already been counted. A gate stop ends the job without error.
pub fn run_packetgen_with_gate<C: Connector>(
    ctx: &JobContext,
    config: JobConfig,
    mut gate: impl Gate,
    connector: &C,
    sink: Arc<dyn MetricsSink>,
) -> Result<JobSummary, JobError> {
    let empty = Context::new();

    let host = render_scalar(&config.host, &empty, config.seed).map_err(|source| {
        log::error!("Error parsing host: {source}");
        ConfigError::Template {
            field: "host",
            source,
        }
    })?;
    let port = render_scalar(&config.port, &empty, config.seed).map_err(|source| {
        log::error!("Error parsing port: {source}");
        ConfigError::Template {
            field: "port",
            source,
        }
    })?;
    let port: u16 = port.trim().parse().map_err(|source| {
        log::error!("Error parsing port \"{port}\": {source}");
        ConfigError::InvalidPort {
            value: port.clone(),
            source,
        }
    })?;

    let network = config.network.with_defaults();

    let mut packet_template = PacketTemplate::compile(&config.packet, config.seed).map_err(|e| {
        log::error!("Error parsing packet: {e}");
        JobError::Compile(e)
    })?;

    log::info!("Flooding {host}:{port}");

    let labels = PacketgenLabels {
        host_port: format!("{host}:{port}"),
        host,
        protocol: protocol_label(&config.packet),
    };

    let mut conn = connector.open(&network).map_err(|e| {
        log::error!("Error building raw connection: {e}");
        e
    })?;

    let job_id = uuid::Uuid::new_v4().to_string();
    log::debug!("Job {job_id} started ({})", labels.protocol);
    let monitor = TrafficMonitor::start(
        Arc::clone(&sink),
        job_id,
        ctx.flush_interval,
        ctx.cancel.clone(),
    )
    .map_err(JobError::Monitor)?;

    let mut summary = JobSummary::default();
    while gate.poll() == Next::Continue {
        let rendered = packet_template.render(&empty).map_err(|e| {
            log::error!("Error rendering packet: {e}");
            JobError::Render(e)
        })?;
        if ctx.debug {
            log::debug!("[packetgen] Rendered packet config template:\n{rendered}");
        }

        let packet = PacketDescription::decode(&rendered).map_err(|e| {
            log::error!("Error decoding packet: {e}");
            e
        })?;

        match conn.send(&packet, &labels.host, port) {
            Ok(n) => {
                sink.inc_packetgen(&labels, Status::Success);
                monitor.add(n as u64);
                summary.packets += 1;
                summary.bytes += n as u64;
            }
            Err(e) => {
                log::error!("Error sending packet: {e}");
                sink.inc_packetgen(&labels, Status::Fail);
                return Err(e.into());
            }
        }
    }

    monitor.stop();
    log::debug!(
        "Job ended: {} packets, {} bytes sent",
        summary.packets,
        summary.bytes
    );
    Ok(summary)
}
