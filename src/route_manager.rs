//! Tracks which interface each known host IPv6 lives on, installs and
//! removes corresponding host routes in the OS routing table, periodically
//! reprobes stale entries, and persists across restarts.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::Ipv6Addr;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::interface::{Interface, InterfaceRegistry};

/// Injected by the handler so the route manager can emit a fresh NS without
/// knowing about Ethernet framing.
pub trait Prober {
    fn probe(&self, address: Ipv6Addr, interface: &Interface);
}

impl<F: Fn(Ipv6Addr, &Interface)> Prober for F {
    fn probe(&self, address: Ipv6Addr, interface: &Interface) {
        self(address, interface)
    }
}

impl Prober for Box<dyn Prober + Send> {
    fn probe(&self, address: Ipv6Addr, interface: &Interface) {
        (**self).probe(address, interface)
    }
}

/// Runs the OS routing commands. Abstracted so tests don't need a real
/// routing table or root privileges.
pub trait RouteCommand {
    fn add(&self, address: Ipv6Addr, interface: &str) -> io::Result<()>;
    fn remove(&self, address: Ipv6Addr, interface: &str) -> io::Result<()>;
}

/// Shells out to `ip -6 route add|del <addr> dev <iface>`.
pub struct ShellRouteCommand;

impl RouteCommand for ShellRouteCommand {
    fn add(&self, address: Ipv6Addr, interface: &str) -> io::Result<()> {
        run(&["-6", "route", "add", &address.to_string(), "dev", interface])
    }

    fn remove(&self, address: Ipv6Addr, interface: &str) -> io::Result<()> {
        run(&["-6", "route", "del", &address.to_string(), "dev", interface])
    }
}

fn run(args: &[&str]) -> io::Result<()> {
    let command_line = format!("ip {}", args.join(" "));
    log::info!("executing '{command_line}'");
    let output = Command::new("ip").args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        log::error!("command failed: '{command_line}': {}", stderr.trim());
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct RouteEntry {
    address: Ipv6Addr,
    interface: Interface,
    last_probe: Instant,
    probe_retries: u32,
}

#[derive(Serialize, Deserialize)]
struct SavedRoutes {
    #[serde(rename = "savedRoutes")]
    saved_routes: Vec<SavedRoute>,
}

#[derive(Serialize, Deserialize)]
struct SavedRoute {
    address: String,
    #[serde(rename = "interfaceName")]
    interface_name: String,
}

/// Configuration and state for route tracking. Identity of a `RouteEntry`
/// is the host address, so the ordered reprobe index is keyed directly on
/// `(last_probe, address)` — no separate id is needed.
pub struct RouteManager<P: Prober, C: RouteCommand = ShellRouteCommand> {
    probe_interval: Duration,
    probe_retries_max: u32,
    prober: P,
    command: C,
    by_address: HashMap<Ipv6Addr, RouteEntry>,
    reprobe_index: BTreeSet<(Instant, Ipv6Addr)>,
}

impl<P: Prober> RouteManager<P, ShellRouteCommand> {
    pub fn new(probe_interval: Duration, probe_retries_max: u32, prober: P) -> Self {
        Self::with_command(probe_interval, probe_retries_max, prober, ShellRouteCommand)
    }
}

impl<P: Prober, C: RouteCommand> RouteManager<P, C> {
    pub fn with_command(
        probe_interval: Duration,
        probe_retries_max: u32,
        prober: P,
        command: C,
    ) -> Self {
        Self {
            probe_interval,
            probe_retries_max,
            prober,
            command,
            by_address: HashMap::new(),
            reprobe_index: BTreeSet::new(),
        }
    }

    /// If `address` is known on a different interface, the old entry is
    /// deleted (OS route removed, "moved" warning logged) and we fall
    /// through to insertion. If known on the same interface, refreshes
    /// `last_probe` and resets the retry counter. Otherwise inserts a new
    /// entry and installs the OS host route.
    pub fn add_or_refresh(&mut self, address: Ipv6Addr, interface: &Interface) {
        if let Some(existing) = self.by_address.get(&address) {
            if existing.interface.name() == interface.name() {
                let old_last_probe = existing.last_probe;
                let entry = self.by_address.get_mut(&address).unwrap();
                entry.last_probe = Instant::now();
                entry.probe_retries = 0;
                self.reprobe_index.remove(&(old_last_probe, address));
                self.reprobe_index
                    .insert((self.by_address[&address].last_probe, address));
                return;
            }
            log::warn!(
                "host {address} moved from interface [{}] to [{}]",
                existing.interface.name(),
                interface.name()
            );
            self.delete_entry(address);
        }

        let now = Instant::now();
        self.by_address.insert(
            address,
            RouteEntry {
                address,
                interface: interface.clone(),
                last_probe: now,
                probe_retries: 0,
            },
        );
        self.reprobe_index.insert((now, address));
        if let Err(e) = self.command.add(address, interface.name()) {
            log::error!("failed to install route for {address} on {}: {e}", interface.name());
        }
    }

    pub fn lookup(&self, address: &Ipv6Addr) -> Option<&Interface> {
        self.by_address.get(address).map(|e| &e.interface)
    }

    fn delete_entry(&mut self, address: Ipv6Addr) {
        if let Some(entry) = self.by_address.remove(&address) {
            self.reprobe_index.remove(&(entry.last_probe, address));
            if let Err(e) = self.command.remove(address, entry.interface.name()) {
                log::error!(
                    "failed to remove route for {address} on {}: {e}",
                    entry.interface.name()
                );
            }
        }
    }

    /// For entries in ascending `last_probe`, while the oldest is at least
    /// `probe_interval` stale: bump its retry count, deleting it if that
    /// exceeds the configured maximum, otherwise refreshing `last_probe`
    /// and invoking the prober. Stops as soon as an entry is within the
    /// fresh window, bounding work to the expired prefix.
    pub fn tick(&mut self) {
        loop {
            let Some(&(last_probe, address)) = self.reprobe_index.iter().next() else {
                break;
            };
            if Instant::now().duration_since(last_probe) < self.probe_interval {
                break;
            }

            let entry = self.by_address.get(&address).cloned().unwrap();
            let new_retries = entry.probe_retries + 1;
            if new_retries > self.probe_retries_max {
                log::info!(
                    "deleting expired route to {address} on [{}] after {new_retries} failed probes",
                    entry.interface.name()
                );
                self.delete_entry(address);
                continue;
            }

            let now = Instant::now();
            self.reprobe_index.remove(&(last_probe, address));
            self.reprobe_index.insert((now, address));
            let stored = self.by_address.get_mut(&address).unwrap();
            stored.last_probe = now;
            stored.probe_retries = new_retries;

            log::debug!("re-probing route to {address} on [{}]", entry.interface.name());
            self.prober.probe(address, &entry.interface);
        }
    }

    /// Writes the current `(address, interfaceName)` set to `path` as
    /// JSON.
    pub fn save_routes(&self, path: &Path) -> io::Result<()> {
        let saved_routes = self
            .by_address
            .values()
            .map(|e| SavedRoute {
                address: e.address.to_string(),
                interface_name: e.interface.name().to_string(),
            })
            .collect();
        let doc = SavedRoutes { saved_routes };
        let json = serde_json::to_string_pretty(&doc)?;
        std::fs::write(path, json)
    }

    /// Loads `(address, interfaceName)` pairs from `path`. Entries whose
    /// interface is no longer configured are dropped with a warning.
    /// Surviving entries are inserted and immediately re-probed to
    /// reconfirm liveness rather than trusted outright.
    pub fn load_routes(&mut self, path: &Path, registry: &InterfaceRegistry) -> io::Result<()> {
        let contents = std::fs::read_to_string(path)?;
        let doc: SavedRoutes = serde_json::from_str(&contents)?;
        for saved in doc.saved_routes {
            let Ok(address) = saved.address.parse::<Ipv6Addr>() else {
                log::warn!("dropping saved route with unparseable address '{}'", saved.address);
                continue;
            };
            let Some(iface) = registry.lookup(&saved.interface_name) else {
                log::warn!(
                    "dropping saved route for {address}: interface '{}' is not configured",
                    saved.interface_name
                );
                continue;
            };
            self.add_or_refresh(address, iface);
            self.prober.probe(address, iface);
        }
        Ok(())
    }

    /// Saves routes if `save_path` is given, then removes every installed
    /// OS host route.
    pub fn on_exit(&mut self, save_path: Option<&Path>) {
        if let Some(path) = save_path {
            if let Err(e) = self.save_routes(path) {
                log::warn!("failed to save routes to {}: {e}", path.display());
            }
        }
        let addresses: Vec<Ipv6Addr> = self.by_address.keys().copied().collect();
        for address in addresses {
            self.delete_entry(address);
        }
    }

    #[cfg(test)]
    fn route_count(&self) -> usize {
        self.by_address.len()
    }
}
