use crate::error::SendError;
use crate::packet::{IpDescription, PacketDescription, TcpDescription, UdpDescription};

use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::{self, MutableIpv4Packet};
use pnet_packet::tcp::{self, MutableTcpPacket};
use pnet_packet::udp::{self, MutableUdpPacket};
use std::net::Ipv4Addr;

/// Sets up the IPv4 header at the start of the buffer, then computes its checksum.
fn setup_ip_packet(
    packet: &mut [u8],
    ip: &IpDescription,
    proto: IpNextHeaderProtocol,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Option<()> {
    let len = packet.len();
    let mut ipv4_packet = MutableIpv4Packet::new(packet)?;

    ipv4_packet.set_version(4);
    ipv4_packet.set_header_length(5);
    ipv4_packet.set_dscp(ip.tos >> 2);
    ipv4_packet.set_ecn(ip.tos & 0b11);
    ipv4_packet.set_total_length(len as u16);
    ipv4_packet.set_identification(ip.id);
    ipv4_packet.set_flags(0);
    ipv4_packet.set_ttl(ip.ttl);
    ipv4_packet.set_next_level_protocol(proto);
    ipv4_packet.set_source(src);
    ipv4_packet.set_destination(dst);

    ipv4_packet.set_checksum(ipv4::checksum(&ipv4_packet.to_immutable()));
    Some(())
}

fn setup_tcp_packet(
    packet: &mut [u8],
    tcp: &TcpDescription,
    payload: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    port: u16,
) -> Option<()> {
    let mut tcp_packet = MutableTcpPacket::new(packet)?;

    tcp_packet.set_source(tcp.src_port.unwrap_or(port));
    tcp_packet.set_destination(tcp.dst_port.unwrap_or(port));
    tcp_packet.set_sequence(tcp.seq);
    tcp_packet.set_acknowledgement(tcp.ack);
    tcp_packet.set_data_offset(5);
    tcp_packet.set_flags(tcp.flags.bits());
    tcp_packet.set_window(tcp.window);
    tcp_packet.set_urgent_ptr(tcp.urgent);
    tcp_packet.set_payload(payload);

    tcp_packet.set_checksum(tcp::ipv4_checksum(&tcp_packet.to_immutable(), &src, &dst));
    Some(())
}

fn setup_udp_packet(
    packet: &mut [u8],
    udp: &UdpDescription,
    payload: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    port: u16,
) -> Option<()> {
    let len = packet.len();
    let mut udp_packet = MutableUdpPacket::new(packet)?;

    udp_packet.set_source(udp.src_port.unwrap_or(port));
    udp_packet.set_destination(udp.dst_port.unwrap_or(port));
    udp_packet.set_length(len as u16);
    udp_packet.set_payload(payload);

    udp_packet.set_checksum(udp::ipv4_checksum(&udp_packet.to_immutable(), &src, &dst));
    Some(())
}

/// Build a complete IPv4 datagram from a packet description.
///
/// TCP takes precedence over UDP. Without a transport header, the payload is sent as is
/// with `fallback` as the IP protocol number. Ports left unset default to `port`.
pub fn encode_ipv4(
    packet: &PacketDescription,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    port: u16,
    fallback: IpNextHeaderProtocol,
) -> Result<Vec<u8>, SendError> {
    let payload = packet.payload.as_bytes();
    let ip_start = MutableIpv4Packet::minimum_packet_size();
    let (proto, header_len) = match (&packet.tcp, &packet.udp) {
        (Some(_), _) => (
            IpNextHeaderProtocols::Tcp,
            MutableTcpPacket::minimum_packet_size(),
        ),
        (None, Some(_)) => (
            IpNextHeaderProtocols::Udp,
            MutableUdpPacket::minimum_packet_size(),
        ),
        (None, None) => (fallback, 0),
    };
    let total = ip_start + header_len + payload.len();
    if total > u16::MAX as usize {
        return Err(SendError::TooLarge(total));
    }

    let mut buf = vec![0u8; total];
    match (&packet.tcp, &packet.udp) {
        (Some(tcp), _) => setup_tcp_packet(&mut buf[ip_start..], tcp, payload, src, dst, port)
            .ok_or(SendError::Encode("TCP"))?,
        (None, Some(udp)) => setup_udp_packet(&mut buf[ip_start..], udp, payload, src, dst, port)
            .ok_or(SendError::Encode("UDP"))?,
        (None, None) => buf[ip_start..].copy_from_slice(payload),
    }
    setup_ip_packet(&mut buf, &packet.ip, proto, src, dst).ok_or(SendError::Encode("IPv4"))?;
    Ok(buf)
}
