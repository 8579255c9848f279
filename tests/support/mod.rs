//! Shared harness for the end-to-end scenario tests: an in-process
//! recording packet sender plus raw frame builders standing in for traffic
//! arriving from hosts this proxy doesn't control.

use std::net::Ipv6Addr;
use std::sync::Mutex;

use ndp6_relay::handler::PacketSender;
use ndp6_relay::interface::{Interface, InterfaceRegistry, test_support};
use ndp6_relay::packet;
use pnet::packet::MutablePacket;
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::icmpv6::{Icmpv6Code, Icmpv6Types, MutableIcmpv6Packet};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv6::MutableIpv6Packet;
use pnet::util::MacAddr;

const ETH_LEN: usize = 14;
const IPV6_LEN: usize = 40;

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl PacketSender for RecordingSender {
    fn send(&self, iface: &Interface, frame: Vec<u8>) {
        self.sent.lock().unwrap().push((iface.name().to_string(), frame));
    }
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

pub fn registry_with(names: &[(&str, [u8; 6])]) -> InterfaceRegistry {
    let mut registry = InterfaceRegistry::new();
    for (name, mac) in names {
        test_support::insert(&mut registry, test_support::make(name, *mac));
    }
    registry
}

/// Builds a raw Neighbor Solicitation frame as it would arrive on the wire
/// from `src_mac`/`src_ip`, as opposed to `packet::make_ns` which always
/// sources frames from one of this proxy's own interfaces.
pub fn ns_frame(src_mac: MacAddr, src_ip: Ipv6Addr, target: Ipv6Addr) -> Vec<u8> {
    let (dst_mac, dst_ip) = packet::solicited_node_multicast(target);
    ndp_frame(
        dst_mac,
        src_mac,
        src_ip,
        dst_ip,
        Icmpv6Types::NeighborSolicit,
        target,
        0,
        packet::OPTION_TYPE_SOURCE_LL_ADDR,
        src_mac,
    )
}

/// Builds a raw Neighbor Advertisement frame as it would arrive on the wire.
pub fn na_frame(
    src_mac: MacAddr,
    src_ip: Ipv6Addr,
    dst_mac: MacAddr,
    dst_ip: Ipv6Addr,
    target: Ipv6Addr,
    solicited: bool,
) -> Vec<u8> {
    let mut flags: u8 = 0x80 | 0x20;
    if solicited {
        flags |= 0x40;
    }
    ndp_frame(
        dst_mac,
        src_mac,
        src_ip,
        dst_ip,
        Icmpv6Types::NeighborAdvert,
        target,
        flags,
        packet::OPTION_TYPE_TARGET_LL_ADDR,
        src_mac,
    )
}

#[allow(clippy::too_many_arguments)]
fn ndp_frame(
    eth_dst: MacAddr,
    eth_src: MacAddr,
    ip_src: Ipv6Addr,
    ip_dst: Ipv6Addr,
    icmpv6_type: pnet::packet::icmpv6::Icmpv6Type,
    target: Ipv6Addr,
    flags: u8,
    option_type: u8,
    option_mac: MacAddr,
) -> Vec<u8> {
    let icmpv6_len = 24 + 8;
    let mut buffer = vec![0u8; ETH_LEN + IPV6_LEN + icmpv6_len];

    {
        let mut eth = MutableEthernetPacket::new(&mut buffer[0..ETH_LEN]).unwrap();
        eth.set_destination(eth_dst);
        eth.set_source(eth_src);
        eth.set_ethertype(EtherTypes::Ipv6);
    }
    {
        let mut ipv6 = MutableIpv6Packet::new(&mut buffer[ETH_LEN..ETH_LEN + IPV6_LEN]).unwrap();
        ipv6.set_version(6);
        ipv6.set_payload_length(icmpv6_len as u16);
        ipv6.set_next_header(IpNextHeaderProtocols::Icmpv6);
        ipv6.set_hop_limit(255);
        ipv6.set_source(ip_src);
        ipv6.set_destination(ip_dst);
    }
    {
        let icmp_start = ETH_LEN + IPV6_LEN;
        let mut icmpv6 = MutableIcmpv6Packet::new(&mut buffer[icmp_start..]).unwrap();
        icmpv6.set_icmpv6_type(icmpv6_type);
        icmpv6.set_icmpv6_code(Icmpv6Code(0));
        let payload = icmpv6.payload_mut();
        payload[0] = flags;
        payload[4..20].copy_from_slice(&target.octets());
        payload[20] = option_type;
        payload[21] = 1;
        payload[22..28].copy_from_slice(&option_mac.octets());
    }
    buffer
}

/// Builds a raw Destination Unreachable frame embedding `embedded_target`
/// as the original destination, as spec.md §4.7 describes.
pub fn du_frame(src_mac: MacAddr, src_ip: Ipv6Addr, code: u8, embedded_target: Ipv6Addr) -> Vec<u8> {
    let payload_len = 40;
    let icmp_len = 8 + payload_len;
    let mut buffer = vec![0u8; ETH_LEN + IPV6_LEN + icmp_len];

    {
        let mut eth = MutableEthernetPacket::new(&mut buffer[0..ETH_LEN]).unwrap();
        eth.set_source(src_mac);
        eth.set_ethertype(EtherTypes::Ipv6);
    }
    {
        let mut ipv6 = MutableIpv6Packet::new(&mut buffer[ETH_LEN..ETH_LEN + IPV6_LEN]).unwrap();
        ipv6.set_version(6);
        ipv6.set_payload_length(icmp_len as u16);
        ipv6.set_next_header(IpNextHeaderProtocols::Icmpv6);
        ipv6.set_hop_limit(255);
        ipv6.set_source(src_ip);
    }
    let icmp_start = ETH_LEN + IPV6_LEN;
    buffer[icmp_start] = 1; // Destination Unreachable
    buffer[icmp_start + 1] = code;
    let du_payload_start = icmp_start + 8;
    buffer[du_payload_start + 24..du_payload_start + 40]
        .copy_from_slice(&embedded_target.octets());
    buffer
}
