//! Leader election over ephemeral sequential participant nodes.
//!
//! The participant with the lowest sequence becomes the leader. Every
//! non-leader watches its immediate predecessor, so a departure wakes
//! exactly one peer instead of the whole group.

use crate::error::{CoordinatorError, Result};
use crate::registry::ParticipantRegistry;
use crate::service::{sort_participants, CoordinationService, DataListener};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

struct ElectionState {
    /// Basename of the predecessor currently being watched.
    current_subscription: Option<String>,
    listener: Arc<dyn DataListener>,
}

/// One participant in the election.
///
/// `try_become_leader` may be called by the owning task and re-entered from
/// the coordination service's callback thread; all subscription state is
/// serialized behind one mutex. Leadership is observable concurrently
/// through [`LeaderElector::am_i_leader`].
pub struct LeaderElector {
    service: Arc<dyn CoordinationService>,
    registry: Arc<ParticipantRegistry>,
    is_leader: AtomicBool,
    state: Mutex<ElectionState>,
}

impl LeaderElector {
    pub fn new(
        service: Arc<dyn CoordinationService>,
        registry: Arc<ParticipantRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|elector: &Weak<LeaderElector>| {
            let listener: Arc<dyn DataListener> = Arc::new(PredecessorListener {
                elector: elector.clone(),
            });
            Self {
                service,
                registry,
                is_leader: AtomicBool::new(false),
                state: Mutex::new(ElectionState {
                    current_subscription: None,
                    listener,
                }),
            }
        })
    }

    /// Run one election pass. Returns `Ok(true)` when this participant holds
    /// the lowest sequence, `Ok(false)` once a watch on the predecessor is in
    /// place.
    ///
    /// A predecessor can vanish between the child listing and the existence
    /// check; its watch would then never fire because ephemeral nodes are
    /// never recreated. That race is resolved by sleeping a 0–999 ms jitter
    /// and re-running the pass, which also spreads out peers that observed a
    /// simultaneous departure.
    pub fn try_become_leader(&self) -> Result<bool> {
        let mut state = self.state.lock();
        loop {
            let current_path = self.registry.register()?;
            let current_name = basename(&current_path);

            let mut children = self.service.get_children(self.registry.processors_path())?;
            sort_participants(&mut children);
            debug!(participants = ?children, "Current active participants");

            let Some(index) = children.iter().position(|c| c == current_name) else {
                return Err(CoordinatorError::ReconnectNeeded {
                    parent: self.registry.processors_path().to_owned(),
                });
            };

            if index == 0 {
                self.is_leader.store(true, Ordering::SeqCst);
                info!(participant = %current_name, "Eligible to become the leader");
                return Ok(true);
            }

            self.is_leader.store(false, Ordering::SeqCst);
            debug!(participant = %current_name, index, "Not eligible to lead yet");

            let predecessor = children[index - 1].clone();
            if state.current_subscription.as_deref() != Some(predecessor.as_str()) {
                if let Some(previous) = state.current_subscription.take() {
                    debug!(predecessor = %previous, "Unsubscribing from previous predecessor");
                    self.service
                        .unsubscribe_data_changes(&self.participant_path(&previous), &state.listener)?;
                }
                info!(predecessor = %predecessor, "Subscribing to predecessor");
                self.service
                    .subscribe_data_changes(&self.participant_path(&predecessor), state.listener.clone())?;
                state.current_subscription = Some(predecessor.clone());
            }

            if self.service.exists(&self.participant_path(&predecessor))? {
                info!(predecessor = %predecessor, "Predecessor still exists; continuing as non-leader");
                return Ok(false);
            }

            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
            info!(
                predecessor = %predecessor,
                jitter_ms = jitter.as_millis() as u64,
                "Predecessor disappeared before the watch took hold; retrying election"
            );
            std::thread::sleep(jitter);
        }
    }

    /// Give up leadership without leaving the election; the participant node
    /// stays until the session ends.
    pub fn resign_leadership(&self) {
        let _ = self
            .is_leader
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn am_i_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Basename of the predecessor currently being watched, if any.
    pub fn current_subscription(&self) -> Option<String> {
        self.state.lock().current_subscription.clone()
    }

    fn participant_path(&self, name: &str) -> String {
        format!("{}/{}", self.registry.processors_path(), name)
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Watches the predecessor node; only non-leaders hold an active watch.
struct PredecessorListener {
    elector: Weak<LeaderElector>,
}

impl DataListener for PredecessorListener {
    fn on_data_changed(&self, path: &str) {
        debug!(path = %path, "Predecessor data changed");
    }

    fn on_data_deleted(&self, path: &str) {
        let Some(elector) = self.elector.upgrade() else {
            return;
        };
        info!(path = %path, "Predecessor went away; trying to become leader");
        if let Err(e) = elector.try_become_leader() {
            warn!(error = %e, "Leader election retry failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryCoordinationService;

    const PROCESSORS: &str = "/weir/processors";

    fn participant(
        service: &Arc<InMemoryCoordinationService>,
        host: &str,
    ) -> (Arc<LeaderElector>, String) {
        let registry = Arc::new(ParticipantRegistry::with_hostname(
            service.clone(),
            PROCESSORS,
            host,
        ));
        let path = registry.register().unwrap();
        let elector = LeaderElector::new(service.clone(), registry);
        (elector, path)
    }

    #[test]
    fn test_single_participant_leads() {
        let service = InMemoryCoordinationService::new();
        let (elector, _) = participant(&service, "host-1");

        assert!(elector.try_become_leader().unwrap());
        assert!(elector.am_i_leader());
        assert_eq!(elector.current_subscription(), None);
    }

    #[test]
    fn test_lowest_sequence_wins() {
        let service = InMemoryCoordinationService::new();
        let (e1, p1) = participant(&service, "host-1");
        let (e2, p2) = participant(&service, "host-2");
        let (e3, _) = participant(&service, "host-3");

        assert!(e1.try_become_leader().unwrap());
        assert!(!e2.try_become_leader().unwrap());
        assert!(!e3.try_become_leader().unwrap());

        // Exactly one leader; each non-leader watches its predecessor.
        let leaders = [&e1, &e2, &e3]
            .iter()
            .filter(|e| e.am_i_leader())
            .count();
        assert_eq!(leaders, 1);
        assert_eq!(e2.current_subscription().as_deref(), Some(basename(&p1)));
        assert_eq!(e3.current_subscription().as_deref(), Some(basename(&p2)));
    }

    #[test]
    fn test_leader_departure_promotes_successor() {
        let service = InMemoryCoordinationService::new();
        let (e1, p1) = participant(&service, "host-1");
        let (e2, _) = participant(&service, "host-2");
        let (e3, _) = participant(&service, "host-3");

        assert!(e1.try_become_leader().unwrap());
        assert!(!e2.try_become_leader().unwrap());
        assert!(!e3.try_become_leader().unwrap());

        // p1's session ends; only p2 is watching it.
        service.expire(&p1);

        assert!(e2.am_i_leader());
        assert!(!e3.am_i_leader());
    }

    #[test]
    fn test_middle_departure_rewires_watch() {
        let service = InMemoryCoordinationService::new();
        let (e1, p1) = participant(&service, "host-1");
        let (e2, p2) = participant(&service, "host-2");
        let (e3, _) = participant(&service, "host-3");

        assert!(e1.try_become_leader().unwrap());
        assert!(!e2.try_become_leader().unwrap());
        assert!(!e3.try_become_leader().unwrap());

        service.expire(&p2);

        // p3 rewires its watch to p1; the leader is unchanged.
        assert!(e1.am_i_leader());
        assert!(!e3.am_i_leader());
        assert_eq!(e3.current_subscription().as_deref(), Some(basename(&p1)));
    }

    /// Service wrapper that lets a node vanish between the child listing and
    /// the existence check, reproducing the never-firing-watch race.
    struct VanishingNodeService {
        inner: Arc<InMemoryCoordinationService>,
        vanish_on_exists: Mutex<Option<String>>,
    }

    impl CoordinationService for VanishingNodeService {
        fn create_ephemeral_sequential(&self, parent: &str, payload: &[u8]) -> Result<String> {
            self.inner.create_ephemeral_sequential(parent, payload)
        }

        fn get_children(&self, parent: &str) -> Result<Vec<String>> {
            self.inner.get_children(parent)
        }

        fn exists(&self, path: &str) -> Result<bool> {
            let mut vanish = self.vanish_on_exists.lock();
            if vanish.as_deref() == Some(path) {
                vanish.take();
                self.inner.remove(path);
                return Ok(false);
            }
            self.inner.exists(path)
        }

        fn subscribe_data_changes(
            &self,
            path: &str,
            listener: Arc<dyn DataListener>,
        ) -> Result<()> {
            self.inner.subscribe_data_changes(path, listener)
        }

        fn unsubscribe_data_changes(
            &self,
            path: &str,
            listener: &Arc<dyn DataListener>,
        ) -> Result<()> {
            self.inner.unsubscribe_data_changes(path, listener)
        }
    }

    #[test]
    fn test_vanished_predecessor_race_is_retried() {
        let inner = InMemoryCoordinationService::new();
        let (_e1, p1) = participant(&inner, "host-1");

        let service: Arc<VanishingNodeService> = Arc::new(VanishingNodeService {
            inner: inner.clone(),
            vanish_on_exists: Mutex::new(Some(p1.clone())),
        });
        let registry = Arc::new(ParticipantRegistry::with_hostname(
            service.clone(),
            PROCESSORS,
            "host-2",
        ));
        registry.register().unwrap();
        let e2 = LeaderElector::new(service, registry);

        // The first pass subscribes to p1, then finds it gone; the jittered
        // retry sees a fresh listing and takes over.
        assert!(e2.try_become_leader().unwrap());
        assert!(e2.am_i_leader());
    }

    #[test]
    fn test_missing_own_node_needs_reconnect() {
        let service = InMemoryCoordinationService::new();
        let (elector, path) = participant(&service, "host-1");

        service.remove(&path);

        let err = elector.try_become_leader().unwrap_err();
        assert!(err.is_reconnect_needed());
    }

    #[test]
    fn test_resign_clears_leadership() {
        let service = InMemoryCoordinationService::new();
        let (elector, _) = participant(&service, "host-1");

        assert!(elector.try_become_leader().unwrap());
        elector.resign_leadership();
        assert!(!elector.am_i_leader());

        // Resigning does not delete the node; re-election succeeds.
        assert!(elector.try_become_leader().unwrap());
    }
}
