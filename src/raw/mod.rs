use crate::config::NetworkConfig;
use crate::error::{ConnectionError, SendError};
use crate::packet::PacketDescription;

use pnet::datalink;
use pnet::ipnetwork::IpNetwork;
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use std::net::Ipv4Addr;

/// IPv4 header and transport layer encoding
pub mod encode;
/// Raw Layer 3 socket based on pnet
mod socket;

pub use socket::{PnetConnection, PnetConnector};

/// Opens raw connections. Opening happens once per job, before any packet is sent.
pub trait Connector {
    type Conn: RawConnection;

    fn open(&self, network: &NetworkConfig) -> Result<Self::Conn, ConnectionError>;
}

/// A job-scoped handle able to emit raw packets
pub trait RawConnection {
    /// Send one packet to host:port and return the number of bytes written
    fn send(
        &mut self,
        packet: &PacketDescription,
        host: &str,
        port: u16,
    ) -> Result<usize, SendError>;
}

/// The first non-loopback IPv4 address of the local interfaces
pub fn first_local_ipv4() -> Option<Ipv4Addr> {
    datalink::interfaces()
        .into_iter()
        .flat_map(|iface| iface.ips.into_iter())
        .find_map(|ip| match ip {
            IpNetwork::V4(data) if !data.ip().is_loopback() => Some(data.ip()),
            _ => None,
        })
}

/// Parse a network type such as "ip4:tcp", "ip4:udp" or "ip4:47"
pub fn parse_network_type(network_type: &str) -> Result<IpNextHeaderProtocol, ConnectionError> {
    let unsupported = || ConnectionError::UnsupportedNetwork(network_type.to_string());
    let (family, proto) = network_type.split_once(':').ok_or_else(unsupported)?;
    if !matches!(family, "ip4" | "ip") {
        return Err(unsupported());
    }
    Ok(match proto.to_ascii_lowercase().as_str() {
        "tcp" => IpNextHeaderProtocols::Tcp,
        "udp" => IpNextHeaderProtocols::Udp,
        "icmp" => IpNextHeaderProtocols::Icmp,
        number => IpNextHeaderProtocol::new(number.parse().map_err(|_| unsupported())?),
    })
}
