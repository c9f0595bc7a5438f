use floodgen::config::{JobConfig, NetworkConfig};
use floodgen::error::{ConfigError, ConnectionError, JobError, SendError};
use floodgen::gate::{Gate, Next};
use floodgen::job::{protocol_label, run_packetgen, run_packetgen_with_gate, JobContext};
use floodgen::metrics::{MemorySink, MetricsSink, PacketgenLabels, ProtocolLabel, Status};
use floodgen::packet::PacketDescription;
use floodgen::raw::{Connector, RawConnection};
use floodgen::supervisor;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    fail_open: bool,
    opened: Vec<NetworkConfig>,
    /// Scripted send results, 4 bytes sent when empty
    results: VecDeque<Result<usize, SendError>>,
    sent: Vec<(PacketDescription, String, u16)>,
}

#[derive(Clone, Default)]
struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl Connector for MockConnector {
    type Conn = MockConnection;

    fn open(&self, network: &NetworkConfig) -> Result<MockConnection, ConnectionError> {
        let mut state = self.state.lock().unwrap();
        state.opened.push(network.clone());
        if state.fail_open {
            return Err(ConnectionError::UnsupportedNetwork(
                network.network_type.clone(),
            ));
        }
        Ok(MockConnection {
            state: Arc::clone(&self.state),
        })
    }
}

impl RawConnection for MockConnection {
    fn send(
        &mut self,
        packet: &PacketDescription,
        host: &str,
        port: u16,
    ) -> Result<usize, SendError> {
        let mut state = self.state.lock().unwrap();
        state.sent.push((packet.clone(), host.to_string(), port));
        state.results.pop_front().unwrap_or(Ok(4))
    }
}

fn udp_job() -> JobConfig {
    JobConfig::from_json(
        r#"{
            "host": "10.0.0.1",
            "port": 53,
            "packet": { "udp": { "dst_port": 53 }, "payload": "abcd" }
        }"#,
    )
    .unwrap()
}

fn iterations(mut n: u64) -> impl Gate {
    move || {
        if n == 0 {
            Next::Stop
        } else {
            n -= 1;
            Next::Continue
        }
    }
}

fn run(
    config: JobConfig,
    gate: impl Gate,
    connector: &MockConnector,
) -> (Result<floodgen::JobSummary, JobError>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let dyn_sink: Arc<dyn MetricsSink> = sink.clone();
    let result =
        run_packetgen_with_gate(&JobContext::default(), config, gate, connector, dyn_sink);
    (result, sink)
}

fn udp_labels() -> PacketgenLabels {
    PacketgenLabels {
        host: "10.0.0.1".into(),
        host_port: "10.0.0.1:53".into(),
        protocol: ProtocolLabel::Udp,
    }
}

#[test]
fn test_gate_stops_before_first_iteration() {
    let connector = MockConnector::default();
    let (result, sink) = run(udp_job(), || Next::Stop, &connector);
    let summary = result.unwrap();
    assert_eq!(summary.packets, 0);
    let state = connector.state.lock().unwrap();
    assert_eq!(state.opened.len(), 1);
    assert!(state.sent.is_empty());
    assert!(sink.packets(Status::Success).is_empty());
    assert_eq!(sink.traffic_total(), 0);
}

#[test]
fn test_successful_iterations() {
    let connector = MockConnector::default();
    let (result, sink) = run(udp_job(), iterations(3), &connector);
    let summary = result.unwrap();
    assert_eq!(summary.packets, 3);
    assert_eq!(summary.bytes, 12);

    assert_eq!(sink.packets(Status::Success), vec![udp_labels(); 3]);
    assert!(sink.packets(Status::Fail).is_empty());
    assert_eq!(sink.traffic_total(), 12);

    let state = connector.state.lock().unwrap();
    assert_eq!(state.sent.len(), 3);
    let (packet, host, port) = &state.sent[0];
    assert_eq!(host, "10.0.0.1");
    assert_eq!(*port, 53);
    assert_eq!(packet.payload, "abcd");
    assert_eq!(packet.udp.as_ref().and_then(|u| u.dst_port), Some(53));
    // network defaults are filled in before opening
    assert_eq!(state.opened[0].address, "0.0.0.0");
    assert_eq!(state.opened[0].network_type, "ip4:tcp");
}

#[test]
fn test_tcp_label() {
    let config = JobConfig::from_json(
        r#"{
            "host": "example.org",
            "port": "80",
            "packet": { "tcp": { "dst_port": 80, "flags": "S" } }
        }"#,
    )
    .unwrap();
    assert_eq!(protocol_label(&config.packet), ProtocolLabel::Tcp);
    let connector = MockConnector::default();
    let (result, sink) = run(config, iterations(1), &connector);
    result.unwrap();
    assert_eq!(
        sink.packets(Status::Success),
        vec![PacketgenLabels {
            host: "example.org".into(),
            host_port: "example.org:80".into(),
            protocol: ProtocolLabel::Tcp,
        }]
    );
}

#[test]
fn test_invalid_port_fails_before_opening() {
    let mut config = udp_job();
    config.port = "abc".into();
    let connector = MockConnector::default();
    let (result, sink) = run(config, iterations(3), &connector);
    assert!(matches!(
        result,
        Err(JobError::Config(ConfigError::InvalidPort { ref value, .. })) if value == "abc"
    ));
    assert!(connector.state.lock().unwrap().opened.is_empty());
    assert!(sink.events().is_empty());
}

#[test]
fn test_send_failure_is_fatal() {
    let connector = MockConnector::default();
    {
        let mut state = connector.state.lock().unwrap();
        state.results.push_back(Ok(4));
        state
            .results
            .push_back(Err(SendError::Resolve("10.0.0.1".into())));
    }
    let (result, sink) = run(udp_job(), iterations(3), &connector);
    assert!(matches!(result, Err(JobError::Send(SendError::Resolve(_)))));
    assert_eq!(connector.state.lock().unwrap().sent.len(), 2);
    assert_eq!(sink.packets(Status::Success).len(), 1);
    assert_eq!(sink.packets(Status::Fail), vec![udp_labels()]);
    // the bytes of the first packet are still reported
    assert_eq!(sink.traffic_total(), 4);
}

#[test]
fn test_malformed_template() {
    let config = JobConfig::from_json(
        r#"{
            "host": "10.0.0.1",
            "port": 53,
            "packet": { "udp": { "dst_port": "{{ random_port" } }
        }"#,
    )
    .unwrap();
    let connector = MockConnector::default();
    let (result, sink) = run(config, iterations(1), &connector);
    assert!(matches!(result, Err(JobError::Compile(_))));
    assert!(connector.state.lock().unwrap().opened.is_empty());
    assert!(sink.events().is_empty());
}

#[test]
fn test_render_failure() {
    let config = JobConfig::from_json(
        r#"{
            "host": "10.0.0.1",
            "port": 53,
            "packet": { "udp": { "dst_port": "{{ random_int 5 1 }}" } }
        }"#,
    )
    .unwrap();
    let connector = MockConnector::default();
    let (result, _) = run(config, iterations(1), &connector);
    assert!(matches!(result, Err(JobError::Render(_))));
    assert!(connector.state.lock().unwrap().sent.is_empty());
}

#[test]
fn test_open_failure() {
    let connector = MockConnector::default();
    connector.state.lock().unwrap().fail_open = true;
    let (result, sink) = run(udp_job(), iterations(1), &connector);
    assert!(matches!(
        result,
        Err(JobError::Connection(ConnectionError::UnsupportedNetwork(_)))
    ));
    assert!(sink.events().is_empty());
}

#[test]
fn test_decode_failure() {
    let config = JobConfig::from_json(
        r#"{
            "host": "10.0.0.1",
            "port": 53,
            "packet": { "udp": { "dst_port": 70000 } }
        }"#,
    )
    .unwrap();
    let connector = MockConnector::default();
    let (result, sink) = run(config, iterations(1), &connector);
    assert!(matches!(result, Err(JobError::Decode(_))));
    assert!(connector.state.lock().unwrap().sent.is_empty());
    assert!(sink.packets(Status::Fail).is_empty());
}

#[test]
fn test_templated_packets() {
    let config = JobConfig::from_json(
        r#"{
            "host": "10.0.0.1",
            "port": 53,
            "seed": 42,
            "packet": {
                "ip": { "id": "{{ counter \"id\" }}" },
                "udp": { "src_port": "{{ random_port }}", "dst_port": 53 },
                "payload": "{{ random_payload 8 }}"
            }
        }"#,
    )
    .unwrap();
    let connector = MockConnector::default();
    let (result, _) = run(config, iterations(3), &connector);
    result.unwrap();
    let state = connector.state.lock().unwrap();
    let ids: Vec<u16> = state.sent.iter().map(|(p, _, _)| p.ip.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    for (packet, _, _) in state.sent.iter() {
        assert_eq!(packet.payload.len(), 8);
        assert!(packet.udp.as_ref().and_then(|u| u.src_port).is_some());
    }
}

#[test]
fn test_count_from_config() {
    let mut config = udp_job();
    config.basic.count = 2;
    let connector = MockConnector::default();
    let sink = Arc::new(MemorySink::new());
    let summary = run_packetgen(&JobContext::default(), config, &connector, sink.clone()).unwrap();
    assert_eq!(summary.packets, 2);
    assert_eq!(sink.traffic_total(), 8);
}

#[test]
fn test_cancelled_job() {
    let ctx = JobContext::default();
    ctx.cancel.cancel();
    let connector = MockConnector::default();
    let sink = Arc::new(MemorySink::new());
    let summary = run_packetgen(&ctx, udp_job(), &connector, sink).unwrap();
    assert_eq!(summary.packets, 0);
}

#[test]
fn test_panicking_gate_is_contained() {
    let connector = MockConnector::default();
    let result = supervisor::guarded("panicky", || {
        run(udp_job(), || -> Next { panic!("gate exploded") }, &connector).0
    });
    assert!(matches!(result, Err(JobError::Panicked(ref m)) if m == "gate exploded"));
}

#[test]
fn test_udp_flag_job() {
    let config = JobConfig::from_toml(
        r#"
host = "10.0.0.1"
port = "53"

[packet]
udp = true
payload = "ping"
"#,
    )
    .unwrap();
    let connector = MockConnector::default();
    let (result, sink) = run(config, iterations(3), &connector);
    assert_eq!(result.unwrap().bytes, 12);
    assert_eq!(sink.packets(Status::Success), vec![udp_labels(); 3]);
    assert_eq!(sink.traffic_total(), 12);
    let state = connector.state.lock().unwrap();
    let (packet, _, _) = &state.sent[2];
    assert_eq!(packet.payload, "ping");
    assert_eq!(packet.udp.as_ref().map(|u| u.dst_port), Some(None));
}

#[test]
fn test_seeded_port_is_reproducible() {
    let job = || {
        JobConfig::from_json(
            r#"{
                "host": "10.0.0.1",
                "port": "{{ random_int 1000 2000 }}",
                "seed": 5,
                "packet": { "tcp": { "flags": "F" } }
            }"#,
        )
        .unwrap()
    };
    let sent_port = || {
        let connector = MockConnector::default();
        run(job(), iterations(1), &connector).0.unwrap();
        let state = connector.state.lock().unwrap();
        let (packet, _, port) = &state.sent[0];
        assert!(packet.tcp.as_ref().is_some_and(|t| t.flags.fin));
        *port
    };
    let port = sent_port();
    assert!((1000..=2000).contains(&port));
    assert_eq!(sent_port(), port);
}
