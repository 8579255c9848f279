//! The packet-handling state machine: classifies NS/NA/Destination
//! Unreachable and drives the request manager, route manager, and packet
//! sender.

use std::collections::HashMap;
use std::sync::Mutex;

use pcap::{Active, Capture};

use crate::error::ProxyError;
use crate::interface::{Interface, InterfaceRegistry};
use crate::packet::{self, Decoded};
use crate::queue::Receiver;
use crate::request_manager::RequestManager;
use crate::route_manager::{Prober, RouteManager};

/// Emits a built frame out of a specific interface. Implemented over raw
/// pcap send handles so the handler stays free of capture/injection
/// details.
pub trait PacketSender: Send + Sync {
    fn send(&self, iface: &Interface, frame: Vec<u8>);
}

/// Opens one additional pcap handle per interface purely for injection,
/// independent of the per-interface capture handle owned by its sniffer
/// thread.
pub struct PcapSender {
    handles: HashMap<String, Mutex<Capture<Active>>>,
}

impl PcapSender {
    pub fn open(registry: &InterfaceRegistry) -> Result<Self, ProxyError> {
        let mut handles = HashMap::new();
        for iface in registry.all() {
            let cap = Capture::from_device(iface.name())
                .map_err(|e| sniff_err(iface, e))?
                .open()
                .map_err(|e| sniff_err(iface, e))?;
            handles.insert(iface.name().to_string(), Mutex::new(cap));
        }
        Ok(Self { handles })
    }
}

fn sniff_err(iface: &Interface, source: pcap::Error) -> ProxyError {
    ProxyError::SniffCapture {
        iface: iface.name().to_string(),
        source,
    }
}

impl PacketSender for PcapSender {
    fn send(&self, iface: &Interface, frame: Vec<u8>) {
        let Some(handle) = self.handles.get(iface.name()) else {
            return;
        };
        let mut cap = handle.lock().unwrap();
        if let Err(e) = cap.sendpacket(frame.as_slice()) {
            log::error!("failed to send frame on {}: {e}", iface.name());
        }
    }
}

struct RouteProbe<S: PacketSender> {
    sender: std::sync::Arc<S>,
}

impl<S: PacketSender> Prober for RouteProbe<S> {
    fn probe(&self, address: std::net::Ipv6Addr, interface: &Interface) {
        let frame = packet::make_ns(interface, address);
        self.sender.send(interface, frame);
    }
}

/// Central state machine tying the registry, request manager, route
/// manager, and packet sender together.
pub struct Handler<S: PacketSender> {
    registry: InterfaceRegistry,
    sender: std::sync::Arc<S>,
    requests: Mutex<RequestManager>,
    routes: Mutex<RouteManager<Box<dyn Prober + Send>>>,
}

impl<S: PacketSender + 'static> Handler<S> {
    pub fn new(
        registry: InterfaceRegistry,
        sender: std::sync::Arc<S>,
        probe_interval: std::time::Duration,
        probe_retries_max: u32,
    ) -> Self {
        let prober: Box<dyn Prober + Send> = Box::new(RouteProbe {
            sender: sender.clone(),
        });
        let routes = RouteManager::new(probe_interval, probe_retries_max, prober);
        Self {
            registry,
            sender,
            requests: Mutex::new(RequestManager::new()),
            routes: Mutex::new(routes),
        }
    }

    pub fn registry(&self) -> &InterfaceRegistry {
        &self.registry
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn routes(&self) -> &Mutex<RouteManager<Box<dyn Prober + Send>>> {
        &self.routes
    }

    /// Runs `tick()` on the route manager. Called by the dedicated timer
    /// thread, never from the handler loop itself.
    pub fn tick(&self) {
        self.routes.lock().unwrap().tick();
    }

    /// Saves routes (if configured) then removes every installed OS host
    /// route. Called once during graceful shutdown.
    pub fn on_exit(&self, save_path: Option<&std::path::Path>) {
        self.routes.lock().unwrap().on_exit(save_path);
    }

    /// Consumes items from the work queue until the channel closes
    /// (signalling shutdown), dispatching each to the appropriate case of
    /// the state machine.
    pub fn run(&self, rx: Receiver) {
        for item in rx {
            let frame = match packet::decode(&item.frame) {
                Some(frame) => frame,
                None => {
                    log::warn!("dropping malformed packet from {}", item.arrival_if.name());
                    continue;
                }
            };
            self.handle(&item.arrival_if, frame);
        }
    }

    fn handle(&self, arrival_if: &Interface, decoded: Decoded) {
        match decoded {
            Decoded::NeighborSolicit {
                src_mac,
                src_ip,
                target,
            } => self.handle_ns(arrival_if, src_mac, src_ip, target),
            Decoded::NeighborAdvert {
                src_mac,
                src_ip,
                dst_ip,
                target,
            } => self.handle_na(arrival_if, src_mac, src_ip, dst_ip, target),
            Decoded::DestUnreachable { code, target } => {
                self.handle_du(arrival_if, code, target)
            }
        }
    }

    fn handle_ns(
        &self,
        arrival_if: &Interface,
        src_mac: pnet::util::MacAddr,
        src_ip: std::net::Ipv6Addr,
        target: std::net::Ipv6Addr,
    ) {
        if packet::is_link_local(&target) {
            log::debug!("link-local target {target} ignored");
            return;
        }

        let known_on = self.routes.lock().unwrap().lookup(&target).cloned();
        match known_on {
            Some(known_if) if known_if.name() != arrival_if.name() => {
                let frame = packet::make_na(arrival_if, src_mac, src_ip, target, true);
                self.sender.send(arrival_if, frame);
                log::debug!("NS replied with unicast NA for {target} on [{}]", arrival_if.name());
            }
            Some(_) => {
                // Known on the same interface the NS arrived on: solicitor
                // and target already share a broadcast domain.
            }
            None => {
                self.requests
                    .lock()
                    .unwrap()
                    .add_request(src_mac, src_ip, target, arrival_if);
                for forward_to in self.registry.all_except(arrival_if.name()) {
                    let frame = packet::make_ns(forward_to, target);
                    self.sender.send(forward_to, frame);
                    log::debug!(
                        "NS forwarded from [{}] to [{}]: {target}",
                        arrival_if.name(),
                        forward_to.name()
                    );
                }
            }
        }
    }

    fn handle_na(
        &self,
        arrival_if: &Interface,
        _src_mac: pnet::util::MacAddr,
        _src_ip: std::net::Ipv6Addr,
        dst_ip: std::net::Ipv6Addr,
        target: std::net::Ipv6Addr,
    ) {
        if packet::is_link_local(&target) {
            log::debug!("link-local target {target} ignored");
            return;
        }

        self.routes.lock().unwrap().add_or_refresh(target, arrival_if);

        if dst_ip.is_multicast() {
            for forward_to in self.registry.all_except(arrival_if.name()) {
                // Corrected per this system's design: the forwarded
                // advertisement's sender is the forwarding interface, not
                // the interface the original NA arrived on.
                let frame = packet::make_na(forward_to, eth_multicast_for(dst_ip), dst_ip, target, false);
                self.sender.send(forward_to, frame);
                log::info!(
                    "gratuitous NA for {target} propagated from [{}] to [{}]",
                    arrival_if.name(),
                    forward_to.name()
                );
            }
        }

        let sender = &self.sender;
        self.requests.lock().unwrap().match_and_respond(target, |src_mac, src_ip, from_if| {
            let frame = packet::make_na(from_if, src_mac, src_ip, target, true);
            sender.send(from_if, frame);
            log::info!("responded NA to NS for {target} from [{}] {src_ip}", from_if.name());
        });
    }

    fn handle_du(&self, arrival_if: &Interface, code: u8, target: std::net::Ipv6Addr) {
        if packet::is_link_local(&target) {
            log::debug!("link-local DU target {target} ignored");
            return;
        }
        if code != 0 && code != 3 {
            return;
        }
        for forward_to in self.registry.all_except(arrival_if.name()) {
            let frame = packet::make_ns(forward_to, target);
            self.sender.send(forward_to, frame);
            log::debug!(
                "DU sending new NS from [{}] to [{}]: {target}",
                arrival_if.name(),
                forward_to.name()
            );
        }
    }
}

/// Ethernet destination for a multicast IPv6 destination, per RFC 2464:
/// `33:33:` followed by the address's last four bytes.
fn eth_multicast_for(addr: std::net::Ipv6Addr) -> pnet::util::MacAddr {
    let o = addr.octets();
    pnet::util::MacAddr::new(0x33, 0x33, o[12], o[13], o[14], o[15])
}
