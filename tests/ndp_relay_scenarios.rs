//! End-to-end scenario tests (S1-S6 of spec.md §8), driven through the
//! handler's real packet-dispatch loop with an in-process recording packet
//! sender standing in for pcap, and the default shell-backed route
//! manager so `ip -6 route` failures (expected outside a privileged
//! environment) are exercised the same way they are in production:
//! logged and tolerated, never fatal.

mod support;

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ndp6_relay::handler::Handler;
use ndp6_relay::packet::{self, Decoded};
use ndp6_relay::queue::{self, WorkItem};
use pnet::util::MacAddr;

use support::{RecordingSender, du_frame, na_frame, ns_frame, registry_with};

fn solicitor_mac() -> MacAddr {
    MacAddr::new(0xcc, 0xcc, 0xcc, 0xcc, 0xcc, 0x03)
}

fn solicitor_ip() -> Ipv6Addr {
    "2001:db8::2".parse().unwrap()
}

fn target() -> Ipv6Addr {
    "2001:db8::1".parse().unwrap()
}

/// Feeds `frames` (arrival interface name, raw frame) through a fresh queue
/// into `handler.run`, blocking until every frame has been processed.
fn dispatch(handler: &Arc<Handler<RecordingSender>>, frames: Vec<(&str, Vec<u8>)>) {
    let (tx, rx) = queue::channel();
    for (iface_name, frame) in frames {
        let arrival_if = handler.registry().lookup(iface_name).unwrap().clone();
        tx.send(WorkItem { arrival_if, frame }).unwrap();
    }
    drop(tx);

    let run_handler = handler.clone();
    thread::spawn(move || run_handler.run(rx)).join().unwrap();
}

fn two_interface_handler() -> Arc<Handler<RecordingSender>> {
    let registry = registry_with(&[("a", [0xaa; 6]), ("b", [0xbb; 6])]);
    let sender = Arc::new(RecordingSender::default());
    Arc::new(Handler::new(registry, sender, Duration::from_secs(60), 5))
}

#[test]
fn s1_unseen_target_broadcasts_ns_on_every_other_interface() {
    let handler = two_interface_handler();

    dispatch(
        &handler,
        vec![("a", ns_frame(solicitor_mac(), solicitor_ip(), target()))],
    );

    let sent = handler.sender().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "b");

    let iface_b = handler.registry().lookup("b").unwrap().clone();
    let eth = pnet::packet::ethernet::EthernetPacket::new(&sent[0].1).unwrap();
    assert_eq!(eth.get_destination(), MacAddr::new(0x33, 0x33, 0xff, 0, 0, 1));
    assert_eq!(eth.get_source(), iface_b.mac());
    match packet::decode(&sent[0].1).unwrap() {
        Decoded::NeighborSolicit { target: t, src_ip, .. } => {
            assert_eq!(t, target());
            assert_eq!(src_ip, iface_b.link_local());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn s2_na_arrival_installs_route_and_answers_the_pending_request() {
    let handler = two_interface_handler();

    dispatch(
        &handler,
        vec![("a", ns_frame(solicitor_mac(), solicitor_ip(), target()))],
    );
    handler.sender().clear();

    let responder_mac = MacAddr::new(0xdd, 0xdd, 0xdd, 0xdd, 0xdd, 0x04);
    let iface_b = handler.registry().lookup("b").unwrap().clone();
    dispatch(
        &handler,
        vec![(
            "b",
            na_frame(responder_mac, target(), iface_b.mac(), iface_b.link_local(), target(), true),
        )],
    );

    assert_eq!(
        handler.routes().lock().unwrap().lookup(&target()).unwrap().name(),
        "b"
    );

    let sent = handler.sender().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "a");
    let eth = pnet::packet::ethernet::EthernetPacket::new(&sent[0].1).unwrap();
    assert_eq!(eth.get_destination(), solicitor_mac());
    match packet::decode(&sent[0].1).unwrap() {
        Decoded::NeighborAdvert { target: t, dst_ip, .. } => {
            assert_eq!(t, target());
            assert_eq!(dst_ip, solicitor_ip());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn s3_known_target_on_other_interface_replies_unicast_without_forwarding() {
    let handler = two_interface_handler();
    let iface_b = handler.registry().lookup("b").unwrap().clone();
    handler.routes().lock().unwrap().add_or_refresh(target(), &iface_b);

    dispatch(
        &handler,
        vec![("a", ns_frame(solicitor_mac(), solicitor_ip(), target()))],
    );

    let sent = handler.sender().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "a");
}

#[test]
fn s4_mobility_moves_a_known_host_between_interfaces() {
    let handler = two_interface_handler();
    let iface_a = handler.registry().lookup("a").unwrap().clone();
    handler.routes().lock().unwrap().add_or_refresh(target(), &iface_a);

    let responder_mac = MacAddr::new(0xdd, 0xdd, 0xdd, 0xdd, 0xdd, 0x04);
    let iface_b = handler.registry().lookup("b").unwrap().clone();
    dispatch(
        &handler,
        vec![(
            "b",
            na_frame(responder_mac, target(), iface_b.mac(), iface_b.link_local(), target(), false),
        )],
    );

    assert_eq!(
        handler.routes().lock().unwrap().lookup(&target()).unwrap().name(),
        "b"
    );
}

#[test]
fn s5_stale_route_is_reprobed_then_deleted_after_exhausting_retries() {
    let registry = registry_with(&[("a", [0xaa; 6])]);
    let sender = Arc::new(RecordingSender::default());
    let handler = Arc::new(Handler::new(
        registry,
        sender,
        Duration::from_millis(1),
        2,
    ));
    let iface_a = handler.registry().lookup("a").unwrap().clone();
    handler.routes().lock().unwrap().add_or_refresh(target(), &iface_a);

    for _ in 0..2 {
        std::thread::sleep(Duration::from_millis(5));
        handler.tick();
        assert!(handler.routes().lock().unwrap().lookup(&target()).is_some());
    }

    std::thread::sleep(Duration::from_millis(5));
    handler.tick();
    assert!(handler.routes().lock().unwrap().lookup(&target()).is_none());

    let probes: usize = handler
        .sender()
        .sent()
        .iter()
        .filter(|(_, frame)| matches!(packet::decode(frame), Some(Decoded::NeighborSolicit { .. })))
        .count();
    assert_eq!(probes, 2);
}

#[test]
fn s6_destination_unreachable_triggers_resolution_on_every_other_interface() {
    let registry = registry_with(&[("a", [0xaa; 6]), ("b", [0xbb; 6]), ("c", [0xcc; 6])]);
    let sender = Arc::new(RecordingSender::default());
    let handler = Arc::new(Handler::new(registry, sender, Duration::from_secs(60), 5));
    let embedded_target: Ipv6Addr = "2001:db8::5".parse().unwrap();

    dispatch(
        &handler,
        vec![(
            "a",
            du_frame(MacAddr::new(0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x01), "2001:db8::ffff".parse().unwrap(), 3, embedded_target),
        )],
    );

    let sent = handler.sender().sent();
    let names: Vec<&str> = sent.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"b"));
    assert!(names.contains(&"c"));
    for (_, frame) in &sent {
        match packet::decode(frame).unwrap() {
            Decoded::NeighborSolicit { target: t, .. } => assert_eq!(t, embedded_target),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
