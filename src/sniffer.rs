//! One capture thread per interface: applies the BPF filter that selects
//! relay-candidate NS/NA and self-originated Destination Unreachable
//! frames, then enqueues matches for the handler.

use std::sync::mpsc;
use std::thread;

use pcap::Capture;

use crate::error::ProxyError;
use crate::interface::{Interface, InterfaceRegistry};
use crate::queue::{Sender, WorkItem};

/// Builds the BPF filter for `iface`:
/// `icmp6 and (((ip6[40]=135 or ip6[40]=136) and not (ether src MAC1 or ...)) or ((ip6[40]=1) and ether src <iface MAC>))`
fn build_filter(iface: &Interface, registry: &InterfaceRegistry) -> String {
    let own_macs: Vec<String> = registry
        .all()
        .map(|i| format!("ether src {}", i.mac()))
        .collect();
    let own_macs_clause = own_macs.join(" or ");

    format!(
        "icmp6 and (((ip6[40] = 135 or ip6[40] = 136) and not ({own_macs_clause})) or ((ip6[40] = 1) and ether src {}))",
        iface.mac()
    )
}

/// Starts a capture thread for every configured interface. Blocks until
/// each sniffer has opened its device and installed its filter before
/// returning, so that a caller observing the return knows capture is live
/// on all interfaces.
pub fn start_all(
    registry: &InterfaceRegistry,
    tx: Sender,
) -> Result<Vec<thread::JoinHandle<()>>, ProxyError> {
    let mut handles = Vec::new();
    for iface in registry.all() {
        let filter = build_filter(iface, registry);
        let handle = start_on_interface(iface.clone(), filter, tx.clone())?;
        handles.push(handle);
    }
    Ok(handles)
}

fn start_on_interface(
    iface: Interface,
    filter: String,
    tx: Sender,
) -> Result<thread::JoinHandle<()>, ProxyError> {
    let mut cap = Capture::from_device(iface.name())
        .map_err(|e| capture_err(&iface, e))?
        .promisc(true)
        .snaplen(262_144)
        .open()
        .map_err(|e| capture_err(&iface, e))?;

    cap.filter(&filter, true).map_err(|e| capture_err(&iface, e))?;
    log::info!("listening on interface: {} [{}]", iface.name(), iface.mac());
    log::info!("pcap filter '{filter}'");

    let (ready_tx, ready_rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        let _ = ready_tx.send(());
        loop {
            match cap.next_packet() {
                Ok(packet) => {
                    if tx
                        .send(WorkItem {
                            arrival_if: iface.clone(),
                            frame: packet.data.to_vec(),
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => {
                    log::error!("capture error on {}: {e}", iface.name());
                    break;
                }
            }
        }
    });
    // Caller waits until this sniffer signals readiness before proceeding.
    let _ = ready_rx.recv();
    Ok(handle)
}

fn capture_err(iface: &Interface, source: pcap::Error) -> ProxyError {
    ProxyError::SniffCapture {
        iface: iface.name().to_string(),
        source,
    }
}
