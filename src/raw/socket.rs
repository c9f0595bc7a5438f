use super::encode::encode_ipv4;
use super::{first_local_ipv4, parse_network_type, Connector, RawConnection};
use crate::config::NetworkConfig;
use crate::error::{ConnectionError, SendError};
use crate::packet::PacketDescription;

use pnet::transport::{transport_channel, TransportChannelType, TransportSender};
use pnet_packet::ip::IpNextHeaderProtocol;
use pnet_packet::ipv4::Ipv4Packet;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

const BUFFER_SIZE: usize = 4096;

/// Opens Layer 3 raw sockets. Requires root privileges (or CAP_NET_RAW).
#[derive(Debug, Clone, Copy, Default)]
pub struct PnetConnector;

pub struct PnetConnection {
    tx: TransportSender,
    protocol: IpNextHeaderProtocol,
    source: Ipv4Addr,
    resolved: HashMap<String, Ipv4Addr>,
}

#[cfg(unix)]
fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    true
}

impl Connector for PnetConnector {
    type Conn = PnetConnection;

    fn open(&self, network: &NetworkConfig) -> Result<PnetConnection, ConnectionError> {
        let protocol = parse_network_type(&network.network_type)?;
        let address: Ipv4Addr = network
            .address
            .parse()
            .map_err(|_| ConnectionError::InvalidAddress(network.address.clone()))?;
        // the kernel fills in a zero source address, but the transport checksums need the real one
        let source = if address.is_unspecified() {
            first_local_ipv4().unwrap_or(address)
        } else {
            address
        };

        let channel_type = TransportChannelType::Layer3(protocol);
        let (tx, _) = transport_channel(BUFFER_SIZE, channel_type).map_err(|e| {
            if !is_root() {
                log::error!("Error {e}. Please retry with root privilege.");
            }
            ConnectionError::Io(e)
        })?;
        log::debug!(
            "Raw socket opened ({}, protocol {}, source {source})",
            network.network_type,
            protocol.0
        );

        Ok(PnetConnection {
            tx,
            protocol,
            source,
            resolved: HashMap::new(),
        })
    }
}

impl PnetConnection {
    fn resolve(&mut self, host: &str, port: u16) -> Result<Ipv4Addr, SendError> {
        if let Some(ip) = self.resolved.get(host) {
            return Ok(*ip);
        }
        let ip = match host.parse::<Ipv4Addr>() {
            Ok(ip) => ip,
            Err(_) => (host, port)
                .to_socket_addrs()
                .map_err(|_| SendError::Resolve(host.to_string()))?
                .find_map(|addr| match addr {
                    SocketAddr::V4(v4) => Some(*v4.ip()),
                    SocketAddr::V6(_) => None,
                })
                .ok_or_else(|| SendError::Resolve(host.to_string()))?,
        };
        log::trace!("{host} resolved to {ip}");
        self.resolved.insert(host.to_string(), ip);
        Ok(ip)
    }
}

impl RawConnection for PnetConnection {
    fn send(
        &mut self,
        packet: &PacketDescription,
        host: &str,
        port: u16,
    ) -> Result<usize, SendError> {
        let src = packet.ip.src_ip.unwrap_or(self.source);
        let dst = match packet.ip.dst_ip {
            Some(ip) => ip,
            None => self.resolve(host, port)?,
        };
        let buf = encode_ipv4(packet, src, dst, port, self.protocol)?;
        let ipv4_packet = Ipv4Packet::new(&buf).ok_or(SendError::Encode("IPv4"))?;
        Ok(self.tx.send_to(ipv4_packet, IpAddr::V4(dst))?)
    }
}
