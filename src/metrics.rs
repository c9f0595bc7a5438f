use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Protocol label of a job, decided once from the raw packet template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolLabel {
    Tcp,
    Udp,
}

impl ProtocolLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolLabel::Tcp => "tcp",
            ProtocolLabel::Udp => "udp",
        }
    }
}

impl fmt::Display for ProtocolLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Fail,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Fail => "fail",
        }
    }
}

/// Labels attached to every per-packet counter of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketgenLabels {
    pub host: String,
    pub host_port: String,
    pub protocol: ProtocolLabel,
}

/// Where a job reports its metrics
pub trait MetricsSink: Send + Sync {
    /// One packet was sent, or failed to be sent
    fn inc_packetgen(&self, labels: &PacketgenLabels, status: Status);

    /// Bytes sent by a job since the previous report
    fn add_traffic(&self, job_id: &str, bytes: u64);
}

/// Prometheus counters in a dedicated registry
pub struct PrometheusSink {
    registry: Registry,
    packets: IntCounterVec,
    traffic: IntCounterVec,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let packets = IntCounterVec::new(
            Opts::new("packetgen_packets_total", "Packets sent by flood jobs"),
            &["host", "address", "protocol", "status"],
        )?;
        let traffic = IntCounterVec::new(
            Opts::new("packetgen_traffic_bytes_total", "Bytes sent by flood jobs"),
            &["job"],
        )?;
        registry.register(Box::new(packets.clone()))?;
        registry.register(Box::new(traffic.clone()))?;
        Ok(PrometheusSink {
            registry,
            packets,
            traffic,
        })
    }

    /// Text exposition format of every metric of the registry
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsSink for PrometheusSink {
    fn inc_packetgen(&self, labels: &PacketgenLabels, status: Status) {
        self.packets
            .with_label_values(&[
                labels.host.as_str(),
                labels.host_port.as_str(),
                labels.protocol.as_str(),
                status.as_str(),
            ])
            .inc();
    }

    fn add_traffic(&self, job_id: &str, bytes: u64) {
        self.traffic.with_label_values(&[job_id]).inc_by(bytes);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    Packet {
        labels: PacketgenLabels,
        status: Status,
    },
    Traffic {
        job_id: String,
        bytes: u64,
    },
}

/// Keeps every reported event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<MetricEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Per-packet events with the given status
    pub fn packets(&self, status: Status) -> Vec<PacketgenLabels> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MetricEvent::Packet { labels, status: s } if s == status => Some(labels),
                _ => None,
            })
            .collect()
    }

    /// Sum of every traffic report
    pub fn traffic_total(&self) -> u64 {
        self.events()
            .iter()
            .map(|e| match e {
                MetricEvent::Traffic { bytes, .. } => *bytes,
                MetricEvent::Packet { .. } => 0,
            })
            .sum()
    }

    fn push(&self, event: MetricEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl MetricsSink for MemorySink {
    fn inc_packetgen(&self, labels: &PacketgenLabels, status: Status) {
        self.push(MetricEvent::Packet {
            labels: labels.clone(),
            status,
        });
    }

    fn add_traffic(&self, job_id: &str, bytes: u64) {
        self.push(MetricEvent::Traffic {
            job_id: job_id.to_string(),
            bytes,
        });
    }
}
