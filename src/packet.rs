//! Pure packet construction and parsing: Ethernet+IPv6+ICMPv6 Neighbor
//! Solicitation/Advertisement frames, and enough Destination Unreachable
//! parsing to recover the embedded target address.

use std::net::Ipv6Addr;

use pnet::packet::MutablePacket;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::icmpv6::{Icmpv6Code, Icmpv6Types, MutableIcmpv6Packet};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv6::MutableIpv6Packet;
use pnet::util::MacAddr;
use rand::Rng;

use crate::interface::Interface;

const ETH_HEADER_LEN: usize = 14;
const IPV6_HEADER_LEN: usize = 40;
const ICMPV6_NDP_LEN: usize = 24; // type+code+checksum+flags/reserved+target
const LLADDR_OPTION_LEN: usize = 8; // type+length+6-byte MAC
const ICMPV6_ERROR_HEADER_LEN: usize = 8; // type+code+checksum+unused
const DU_TARGET_OFFSET: usize = 24;
const DU_MIN_PAYLOAD_LEN: usize = DU_TARGET_OFFSET + 16;

pub const OPTION_TYPE_SOURCE_LL_ADDR: u8 = 1;
pub const OPTION_TYPE_TARGET_LL_ADDR: u8 = 2;

/// True for `fe80::/10` in the simplified form this system uses: first byte
/// `0xfe`, second byte `0x80`.
pub fn is_link_local(addr: &Ipv6Addr) -> bool {
    let o = addr.octets();
    o[0] == 0xfe && o[1] == 0x80
}

/// The solicited-node multicast MAC and IPv6 address for a target, derived
/// from the target's last 24 bits.
pub fn solicited_node_multicast(target: Ipv6Addr) -> (MacAddr, Ipv6Addr) {
    let o = target.octets();
    let mac = MacAddr::new(0x33, 0x33, 0xff, o[13], o[14], o[15]);
    let ip = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 1, 0xff00 | (o[13] as u16), u16::from_be_bytes([o[14], o[15]]));
    (mac, ip)
}

fn icmpv6_checksum(src: &Ipv6Addr, dst: &Ipv6Addr, icmpv6_packet: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for segment in src.segments() {
        sum += segment as u32;
    }
    for segment in dst.segments() {
        sum += segment as u32;
    }
    sum += icmpv6_packet.len() as u32;
    sum += 58u32; // next header: ICMPv6

    let mut i = 0;
    while i < icmpv6_packet.len() {
        let word = if i + 1 < icmpv6_packet.len() {
            ((icmpv6_packet[i] as u16) << 8) | (icmpv6_packet[i + 1] as u16)
        } else {
            (icmpv6_packet[i] as u16) << 8
        };
        sum += word as u32;
        i += 2;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

fn random_flow_label() -> u32 {
    rand::thread_rng().gen_range(0..=0xFFFFFu32)
}

fn build_frame(
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
    let icmpv6_len = ICMPV6_NDP_LEN + LLADDR_OPTION_LEN;
    let total_len = ETH_HEADER_LEN + IPV6_HEADER_LEN + icmpv6_len;
    let mut buffer = vec![0u8; total_len];

    {
        let mut eth = MutableEthernetPacket::new(&mut buffer[0..ETH_HEADER_LEN]).unwrap();
        eth.set_destination(eth_dst);
        eth.set_source(eth_src);
        eth.set_ethertype(EtherTypes::Ipv6);
    }

    {
        let mut ipv6 = MutableIpv6Packet::new(
            &mut buffer[ETH_HEADER_LEN..ETH_HEADER_LEN + IPV6_HEADER_LEN],
        )
        .unwrap();
        ipv6.set_version(6);
        ipv6.set_traffic_class(0);
        ipv6.set_flow_label(random_flow_label());
        ipv6.set_payload_length(icmpv6_len as u16);
        ipv6.set_next_header(IpNextHeaderProtocols::Icmpv6);
        ipv6.set_hop_limit(255);
        ipv6.set_source(ip_src);
        ipv6.set_destination(ip_dst);
    }

    {
        let icmp_start = ETH_HEADER_LEN + IPV6_HEADER_LEN;
        let mut icmpv6 = MutableIcmpv6Packet::new(&mut buffer[icmp_start..]).unwrap();
        icmpv6.set_icmpv6_type(icmpv6_type);
        icmpv6.set_icmpv6_code(Icmpv6Code(0));

        let payload = icmpv6.payload_mut();
        payload[0] = flags;
        // payload[1..4] reserved, already zero
        payload[4..20].copy_from_slice(&target.octets());
        payload[20] = option_type;
        payload[21] = 1; // length in units of 8 bytes
        let mac = option_mac.octets();
        payload[22..28].copy_from_slice(&mac);
    }

    let icmp_start = ETH_HEADER_LEN + IPV6_HEADER_LEN;
    let checksum = icmpv6_checksum(&ip_src, &ip_dst, &buffer[icmp_start..]);
    buffer[icmp_start + 2] = (checksum >> 8) as u8;
    buffer[icmp_start + 3] = (checksum & 0xff) as u8;

    buffer
}

/// Builds a Neighbor Solicitation sent out `sending_if` for `target`.
pub fn make_ns(sending_if: &Interface, target: Ipv6Addr) -> Vec<u8> {
    let (dst_mac, dst_ip) = solicited_node_multicast(target);
    build_frame(
        dst_mac,
        sending_if.mac(),
        sending_if.link_local(),
        dst_ip,
        Icmpv6Types::NeighborSolicit,
        target,
        0,
        OPTION_TYPE_SOURCE_LL_ADDR,
        sending_if.mac(),
    )
}

/// Builds a Neighbor Advertisement sent out `sending_if` to `dest_mac`/
/// `dest_ip` for `target`. `router` and `override` flags are always set;
/// `solicited` is the caller's choice.
pub fn make_na(
    sending_if: &Interface,
    dest_mac: MacAddr,
    dest_ip: Ipv6Addr,
    target: Ipv6Addr,
    solicited: bool,
) -> Vec<u8> {
    let mut flags: u8 = 0x80; // router
    flags |= 0x20; // override
    if solicited {
        flags |= 0x40;
    }
    build_frame(
        dest_mac,
        sending_if.mac(),
        sending_if.link_local(),
        dest_ip,
        Icmpv6Types::NeighborAdvert,
        target,
        flags,
        OPTION_TYPE_TARGET_LL_ADDR,
        sending_if.mac(),
    )
}

/// An ICMPv6 message of interest to the handler, decoded from a raw
/// captured Ethernet frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    NeighborSolicit {
        src_mac: MacAddr,
        src_ip: Ipv6Addr,
        target: Ipv6Addr,
    },
    NeighborAdvert {
        src_mac: MacAddr,
        src_ip: Ipv6Addr,
        dst_ip: Ipv6Addr,
        target: Ipv6Addr,
    },
    DestUnreachable {
        code: u8,
        target: Ipv6Addr,
    },
}

/// Decodes a captured Ethernet frame into the NDP message it carries.
/// Returns `None` for anything that doesn't decode as Ethernet/IPv6/ICMPv6,
/// for ICMPv6 types other than NS/NA/DU, and for truncated frames.
pub fn decode(frame: &[u8]) -> Option<Decoded> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Ipv6 {
        return None;
    }
    let src_mac = eth.get_source();

    let ip6 = frame.get(ETH_HEADER_LEN..)?;
    if ip6.len() < IPV6_HEADER_LEN {
        return None;
    }
    if ip6[6] != IpNextHeaderProtocols::Icmpv6.0 {
        return None;
    }
    let src_ip = ipv6_from_bytes(&ip6[8..24]);
    let dst_ip = ipv6_from_bytes(&ip6[24..40]);

    let icmp = &ip6[IPV6_HEADER_LEN..];
    if icmp.is_empty() {
        return None;
    }

    match icmp[0] {
        135 => {
            if icmp.len() < ICMPV6_NDP_LEN {
                return None;
            }
            let target = ipv6_from_bytes(&icmp[8..24]);
            Some(Decoded::NeighborSolicit {
                src_mac,
                src_ip,
                target,
            })
        }
        136 => {
            if icmp.len() < ICMPV6_NDP_LEN {
                return None;
            }
            let target = ipv6_from_bytes(&icmp[8..24]);
            Some(Decoded::NeighborAdvert {
                src_mac,
                src_ip,
                dst_ip,
                target,
            })
        }
        1 => {
            let Some(&code) = icmp.get(1) else {
                return None;
            };
            let payload = icmp.get(ICMPV6_ERROR_HEADER_LEN..)?;
            if payload.len() < DU_MIN_PAYLOAD_LEN {
                return None;
            }
            let target = ipv6_from_bytes(&payload[DU_TARGET_OFFSET..DU_TARGET_OFFSET + 16]);
            Some(Decoded::DestUnreachable { code, target })
        }
        _ => None,
    }
}

fn ipv6_from_bytes(b: &[u8]) -> Ipv6Addr {
    let mut arr = [0u8; 16];
    arr.copy_from_slice(&b[0..16]);
    Ipv6Addr::from(arr)
}
