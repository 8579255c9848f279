//! Tracks unresolved Neighbor Solicitations forwarded on behalf of remote
//! solicitors, and matches them against subsequent Neighbor Advertisements.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use pnet::util::MacAddr;

use crate::interface::Interface;

const EXPIRY: Duration = Duration::from_secs(10);

/// An NS received on `arrival_if` for `target` whose answer has not yet
/// arrived. Identity is the 4-tuple (src_mac, src_ip, target, arrival_if);
/// a new arrival matching an existing identity replaces it.
#[derive(Debug, Clone)]
struct PendingRequest {
    src_mac: MacAddr,
    src_ip: Ipv6Addr,
    target: Ipv6Addr,
    arrival_if: Interface,
    request_time: Instant,
}

/// Keyed map of pending requests plus an ordered secondary index over
/// `(request_time, id)` for cheap prefix expiry scanning, per the
/// remove-then-reinsert pattern this system uses for all time-ordered
/// state: entries never store back-references into the index.
#[derive(Debug, Default)]
pub struct RequestManager {
    entries: HashMap<u64, PendingRequest>,
    by_target: HashMap<Ipv6Addr, Vec<u64>>,
    expiry_index: BTreeSet<(Instant, u64)>,
    next_id: u64,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// If an identical 4-tuple exists, it is removed first. A new entry
    /// with `request_time = now` is inserted, then expired entries are
    /// swept.
    pub fn add_request(
        &mut self,
        src_mac: MacAddr,
        src_ip: Ipv6Addr,
        target: Ipv6Addr,
        arrival_if: &Interface,
    ) {
        self.remove_matching(src_mac, src_ip, target, arrival_if);

        let id = self.next_id;
        self.next_id += 1;
        let now = Instant::now();
        self.entries.insert(
            id,
            PendingRequest {
                src_mac,
                src_ip,
                target,
                arrival_if: arrival_if.clone(),
                request_time: now,
            },
        );
        self.by_target.entry(target).or_default().push(id);
        self.expiry_index.insert((now, id));

        self.sweep_expired();
    }

    fn remove_matching(
        &mut self,
        src_mac: MacAddr,
        src_ip: Ipv6Addr,
        target: Ipv6Addr,
        arrival_if: &Interface,
    ) {
        let Some(ids) = self.by_target.get(&target) else {
            return;
        };
        let Some(&id) = ids.iter().find(|&&id| {
            let e = &self.entries[&id];
            e.src_mac == src_mac && e.src_ip == src_ip && &e.arrival_if == arrival_if
        }) else {
            return;
        };
        self.remove_id(id);
    }

    fn remove_id(&mut self, id: u64) {
        if let Some(entry) = self.entries.remove(&id) {
            self.expiry_index.remove(&(entry.request_time, id));
            if let Some(ids) = self.by_target.get_mut(&entry.target) {
                ids.retain(|&i| i != id);
                if ids.is_empty() {
                    self.by_target.remove(&entry.target);
                }
            }
        }
    }

    /// For every pending entry with this target, invokes `emit(src_mac,
    /// src_ip, arrival_if)` and deletes the entry, then sweeps expired
    /// entries once.
    pub fn match_and_respond(
        &mut self,
        target: Ipv6Addr,
        mut emit: impl FnMut(MacAddr, Ipv6Addr, &Interface),
    ) {
        let ids = self.by_target.get(&target).cloned().unwrap_or_default();
        for id in ids {
            if let Some(entry) = self.entries.get(&id).cloned() {
                emit(entry.src_mac, entry.src_ip, &entry.arrival_if);
                self.remove_id(id);
            }
        }
        self.sweep_expired();
    }

    /// Removes any entry with `now - request_time >= 10s`, logging its
    /// deletion. Stops at the first non-expired entry, bounding work to the
    /// expired prefix of the ordered index.
    pub fn sweep_expired(&mut self) {
        let now = Instant::now();
        loop {
            let Some(&(t, id)) = self.expiry_index.iter().next() else {
                break;
            };
            if now.duration_since(t) < EXPIRY {
                break;
            }
            if let Some(entry) = self.entries.get(&id) {
                log::debug!(
                    "deleting expired request for {} from [{}] {}",
                    entry.target,
                    entry.arrival_if.name(),
                    entry.src_ip
                );
            }
            self.remove_id(id);
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.entries.len()
    }
}
