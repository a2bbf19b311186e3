//! Rendezvous registry: introduces two named clients to each other.
//!
//! Every connected client holds an event sender; the registry pushes
//! `online` / `waiting` replies and `peerArrived` notices into it. Both maps
//! live behind one mutex and every registration is handled entirely under
//! it, so a registrant's reply is always queued before any push addressed
//! to the same connection.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use ridelink_core::wire::{Registration, RegistrationStatus, RendezvousEvent};
use tokio::sync::mpsc;

pub type ConnId = u64;
pub type EventSender = mpsc::UnboundedSender<RendezvousEvent>;

#[derive(Debug, Clone)]
struct PeerRecord {
    address: IpAddr,
    port: u16,
    registered_at: Instant,
    conn_id: ConnId,
    tx: EventSender,
}

#[derive(Debug, Clone)]
struct Waiter {
    source: String,
    conn_id: ConnId,
    tx: EventSender,
}

#[derive(Default)]
struct RegistryState {
    /// username → where that user can currently be reached
    peers: HashMap<String, PeerRecord>,
    /// destination username → clients waiting for it to show up
    waiting: HashMap<String, Vec<Waiter>>,
}

impl RegistryState {
    fn drop_waiters_of(&mut self, conn_id: ConnId) {
        self.waiting.retain(|_, queue| {
            queue.retain(|w| w.conn_id != conn_id);
            !queue.is_empty()
        });
    }
}

#[derive(Clone, Default)]
pub struct RendezvousRegistry {
    state: Arc<Mutex<RegistryState>>,
    next_conn: Arc<AtomicU64>,
}

fn push(tx: &EventSender, event: RendezvousEvent) {
    // a closed receiver means the connection is going away; deregister
    // will clean up after it
    let _ = tx.send(event);
}

impl RendezvousRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate an id for a new client connection.
    pub fn open_connection(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register `reg.username` as reachable at `address:reg.p2p_port`.
    ///
    /// The reply is queued on `tx` and also returned. `address` must be the
    /// transport-level address of the connection.
    pub fn register(
        &self,
        conn_id: ConnId,
        tx: &EventSender,
        reg: &Registration,
        address: IpAddr,
    ) -> RegistrationStatus {
        let mut state = self.lock();
        let port = reg.p2p_port;

        state.drop_waiters_of(conn_id);
        let replaced = state
            .peers
            .get(&reg.username)
            .filter(|previous| previous.conn_id != conn_id)
            .map(|previous| (previous.conn_id, previous.address, previous.port));
        if let Some((old_conn, old_addr, old_port)) = replaced {
            // the replaced connection no longer speaks for this user
            state.waiting.retain(|_, queue| {
                queue.retain(|w| !(w.conn_id == old_conn && w.source == reg.username));
                !queue.is_empty()
            });
            tracing::info!(
                username = %reg.username,
                old = %format!("{old_addr}:{old_port}"),
                new = %format!("{address}:{port}"),
                "registration replaced"
            );
        }
        state.peers.insert(
            reg.username.clone(),
            PeerRecord {
                address,
                port,
                registered_at: Instant::now(),
                conn_id,
                tx: tx.clone(),
            },
        );

        let waiters = state.waiting.remove(&reg.username).unwrap_or_default();

        let destination = state
            .peers
            .get(&reg.destination_username)
            .map(|d| (d.address, d.port, d.tx.clone()));
        let status = match &destination {
            Some((d_addr, d_port, _)) => RegistrationStatus::Online {
                peer_username: reg.destination_username.clone(),
                address: *d_addr,
                port: *d_port,
            },
            None => {
                let queue = state
                    .waiting
                    .entry(reg.destination_username.clone())
                    .or_default();
                if !queue.iter().any(|w| w.source == reg.username && w.conn_id == conn_id) {
                    queue.push(Waiter {
                        source: reg.username.clone(),
                        conn_id,
                        tx: tx.clone(),
                    });
                }
                RegistrationStatus::Waiting
            }
        };
        push(tx, RendezvousEvent::Status(status.clone()));

        let mut introduced = HashSet::new();
        for waiter in waiters {
            let Some(source) = state.peers.get(&waiter.source) else {
                continue;
            };
            if !introduced.insert(waiter.source.clone()) {
                continue;
            }
            push(&waiter.tx, RendezvousEvent::online(&reg.username, address, port));
            push(
                tx,
                RendezvousEvent::peer_arrived(&waiter.source, source.address, source.port),
            );
            tracing::debug!(waiter = %waiter.source, arrived = %reg.username, "waiting entry flushed");
        }

        if let Some((_, _, d_tx)) = destination {
            if !introduced.contains(&reg.destination_username) {
                push(&d_tx, RendezvousEvent::peer_arrived(&reg.username, address, port));
            }
        }

        tracing::info!(
            username = %reg.username,
            destination = %reg.destination_username,
            addr = %format!("{address}:{port}"),
            status = status_name(&status),
            "peer registered"
        );
        status
    }

    /// Forget everything tied to a closed connection. Returns the usernames
    /// whose registration was removed.
    pub fn deregister(&self, conn_id: ConnId) -> Vec<String> {
        let mut state = self.lock();
        let mut removed = Vec::new();
        state.peers.retain(|name, p| {
            if p.conn_id == conn_id {
                removed.push(name.clone());
                false
            } else {
                true
            }
        });
        state.drop_waiters_of(conn_id);
        for name in &removed {
            tracing::info!(username = %name, "peer deregistered");
        }
        removed
    }

    /// Current `(address, port)` of `username`.
    pub fn lookup(&self, username: &str) -> Option<(IpAddr, u16)> {
        self.lock().peers.get(username).map(|p| (p.address, p.port))
    }

    /// Seconds since `username` last registered.
    pub fn registered_for(&self, username: &str) -> Option<u64> {
        self.lock()
            .peers
            .get(username)
            .map(|p| p.registered_at.elapsed().as_secs())
    }

    pub fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.lock().waiting.values().map(Vec::len).sum()
    }
}

fn status_name(status: &RegistrationStatus) -> &'static str {
    match status {
        RegistrationStatus::Online { .. } => "online",
        RegistrationStatus::Waiting => "waiting",
        RegistrationStatus::Error { .. } => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridelink_core::wire::RendezvousPush;
    use std::net::Ipv4Addr;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Client {
        conn: ConnId,
        tx: EventSender,
        rx: UnboundedReceiver<RendezvousEvent>,
    }

    fn client(registry: &RendezvousRegistry) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        Client {
            conn: registry.open_connection(),
            tx,
            rx,
        }
    }

    fn reg(username: &str, port: u16, destination: &str) -> Registration {
        Registration {
            username: username.into(),
            p2p_port: port,
            destination_username: destination.into(),
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn drain(rx: &mut UnboundedReceiver<RendezvousEvent>) -> Vec<RendezvousEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[test]
    fn early_registrant_waits_then_both_are_introduced() {
        let registry = RendezvousRegistry::new();
        let mut bob = client(&registry);
        let mut alice = client(&registry);

        let status = registry.register(bob.conn, &bob.tx, &reg("bob", 5001, "alice"), ip(2));
        assert_eq!(status, RegistrationStatus::Waiting);
        assert_eq!(
            drain(&mut bob.rx),
            vec![RendezvousEvent::Status(RegistrationStatus::Waiting)]
        );
        assert_eq!(registry.waiting_count(), 1);

        let status = registry.register(alice.conn, &alice.tx, &reg("alice", 5002, "bob"), ip(3));
        assert_eq!(
            status,
            RegistrationStatus::Online {
                peer_username: "bob".into(),
                address: ip(2),
                port: 5001,
            }
        );

        // bob: exactly one online for alice, nothing else
        assert_eq!(
            drain(&mut bob.rx),
            vec![RendezvousEvent::online("alice", ip(3), 5002)]
        );
        // alice: her reply first, then one peerArrived for bob
        assert_eq!(
            drain(&mut alice.rx),
            vec![
                RendezvousEvent::online("bob", ip(2), 5001),
                RendezvousEvent::peer_arrived("bob", ip(2), 5001),
            ]
        );
        assert_eq!(registry.waiting_count(), 0);
    }

    #[test]
    fn late_registrant_notifies_destination() {
        let registry = RendezvousRegistry::new();
        let mut alice = client(&registry);
        let mut carol = client(&registry);

        registry.register(alice.conn, &alice.tx, &reg("alice", 5002, "dave"), ip(3));
        drain(&mut alice.rx);

        let status = registry.register(carol.conn, &carol.tx, &reg("carol", 6000, "alice"), ip(4));
        assert!(matches!(status, RegistrationStatus::Online { .. }));
        assert_eq!(drain(&mut carol.rx).len(), 1);

        let pushed = drain(&mut alice.rx);
        assert_eq!(pushed.len(), 1);
        match &pushed[0] {
            RendezvousEvent::Push(RendezvousPush::PeerArrived {
                username,
                address,
                port,
            }) => {
                assert_eq!(username, "carol");
                assert_eq!(*address, ip(4));
                assert_eq!(*port, 6000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn disconnect_removes_registration_and_waiters() {
        let registry = RendezvousRegistry::new();
        let mut bob = client(&registry);
        registry.register(bob.conn, &bob.tx, &reg("bob", 5001, "alice"), ip(2));
        drain(&mut bob.rx);
        assert_eq!(registry.peer_count(), 1);
        assert_eq!(registry.waiting_count(), 1);

        assert_eq!(registry.deregister(bob.conn), vec!["bob".to_string()]);
        assert_eq!(registry.peer_count(), 0);
        assert_eq!(registry.waiting_count(), 0);

        // alice arrives later and is told to wait; nobody is introduced
        let mut alice = client(&registry);
        let status = registry.register(alice.conn, &alice.tx, &reg("alice", 5002, "bob"), ip(3));
        assert_eq!(status, RegistrationStatus::Waiting);
        assert_eq!(drain(&mut alice.rx).len(), 1);
    }

    #[test]
    fn newer_registration_overwrites_and_survives_old_disconnect() {
        let registry = RendezvousRegistry::new();
        let old = client(&registry);
        let new = client(&registry);

        registry.register(old.conn, &old.tx, &reg("bob", 5001, "alice"), ip(2));
        registry.register(new.conn, &new.tx, &reg("bob", 5009, "alice"), ip(9));
        assert_eq!(registry.lookup("bob"), Some((ip(9), 5009)));

        assert!(registry.deregister(old.conn).is_empty());
        assert_eq!(registry.lookup("bob"), Some((ip(9), 5009)));
        // the old connection's waiting entry went with it
        assert_eq!(registry.waiting_count(), 1);
    }

    #[test]
    fn replaced_registration_hears_about_arrival_on_the_live_connection() {
        let registry = RendezvousRegistry::new();
        let mut stale = client(&registry);
        let mut live = client(&registry);
        let mut alice = client(&registry);

        registry.register(stale.conn, &stale.tx, &reg("bob", 5001, "alice"), ip(2));
        registry.register(live.conn, &live.tx, &reg("bob", 5009, "alice"), ip(9));
        drain(&mut stale.rx);
        drain(&mut live.rx);

        registry.register(alice.conn, &alice.tx, &reg("alice", 4000, "bob"), ip(1));

        assert_eq!(
            drain(&mut live.rx),
            vec![RendezvousEvent::online("alice", ip(1), 4000)]
        );
        assert!(drain(&mut stale.rx).is_empty());

        let to_alice = drain(&mut alice.rx);
        let arrivals = to_alice
            .iter()
            .filter(|e| matches!(e, RendezvousEvent::Push(RendezvousPush::PeerArrived { .. })))
            .count();
        assert_eq!(arrivals, 1);
        assert!(to_alice.contains(&RendezvousEvent::peer_arrived("bob", ip(9), 5009)));
    }

    #[test]
    fn repeated_registration_does_not_duplicate_waiters() {
        let registry = RendezvousRegistry::new();
        let bob = client(&registry);
        for _ in 0..3 {
            registry.register(bob.conn, &bob.tx, &reg("bob", 5001, "alice"), ip(2));
        }
        assert_eq!(registry.waiting_count(), 1);
    }

    #[test]
    fn introduction_is_independent_of_registration_order() {
        for alice_first in [true, false] {
            let registry = RendezvousRegistry::new();
            let mut alice = client(&registry);
            let mut bob = client(&registry);
            let a = reg("alice", 4000, "bob");
            let b = reg("bob", 4000, "alice");
            if alice_first {
                registry.register(alice.conn, &alice.tx, &a, ip(1));
                registry.register(bob.conn, &bob.tx, &b, ip(2));
            } else {
                registry.register(bob.conn, &bob.tx, &b, ip(2));
                registry.register(alice.conn, &alice.tx, &a, ip(1));
            }
            let knows = |events: Vec<RendezvousEvent>, who: &str| {
                events.iter().any(|e| match e {
                    RendezvousEvent::Status(RegistrationStatus::Online { peer_username, .. }) => {
                        peer_username == who
                    }
                    RendezvousEvent::Push(RendezvousPush::PeerArrived { username, .. }) => {
                        username == who
                    }
                    _ => false,
                })
            };
            assert!(knows(drain(&mut alice.rx), "bob"));
            assert!(knows(drain(&mut bob.rx), "alice"));
        }
    }
}
