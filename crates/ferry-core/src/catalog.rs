//! Tracked-torrent collection shared by the reconciliation loop and the
//! transfer engines.
//!
//! State changes go through [`TorrentCatalog::set_state`], which mutates the
//! entry and then fires the snapshot hook. Persistence is serialised by its own
//! lock and always writes the catalog content current at write time, so a
//! later snapshot never loses to an earlier one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use ferry_events::{Event, EventBus};
use tracing::{error, warn};

use crate::model::{Torrent, TorrentId};
use crate::service::SnapshotSink;
use crate::state::TorrentState;

/// In-memory set of tracked torrents keyed by id.
pub struct TorrentCatalog {
    entries: Mutex<HashMap<TorrentId, Torrent>>,
    persist_lock: Mutex<()>,
    sink: Option<Arc<dyn SnapshotSink>>,
    events: Option<EventBus>,
}

impl TorrentCatalog {
    /// Empty catalog with no persistence hook.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            persist_lock: Mutex::new(()),
            sink: None,
            events: None,
        }
    }

    /// Attach the snapshot hook fired after every state change.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attach the event bus used for lifecycle events.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Replace the contents with restored torrents without persisting.
    pub fn seed(&self, torrents: Vec<Torrent>) {
        let mut entries = self.lock_entries();
        entries.clear();
        for torrent in torrents {
            entries.insert(torrent.id.clone(), torrent);
        }
    }

    /// Start tracking a torrent. Returns `false` when the id is already tracked.
    pub fn track(&self, torrent: Torrent) -> bool {
        let id = torrent.id.clone();
        let name = torrent.name.clone();
        {
            let mut entries = self.lock_entries();
            if entries.contains_key(&id) {
                return false;
            }
            entries.insert(id.clone(), torrent);
        }
        self.publish(Event::TorrentTracked {
            torrent_id: id.to_string(),
            name,
        });
        self.persist();
        true
    }

    /// Clone of a tracked torrent.
    #[must_use]
    pub fn get(&self, id: &TorrentId) -> Option<Torrent> {
        self.lock_entries().get(id).cloned()
    }

    /// Current state of a tracked torrent.
    #[must_use]
    pub fn state_of(&self, id: &TorrentId) -> Option<TorrentState> {
        self.lock_entries().get(id).map(Torrent::state)
    }

    /// Whether the id is tracked.
    #[must_use]
    pub fn contains(&self, id: &TorrentId) -> bool {
        self.lock_entries().contains_key(id)
    }

    /// Sorted snapshot of tracked ids.
    #[must_use]
    pub fn ids(&self) -> Vec<TorrentId> {
        let mut ids: Vec<_> = self.lock_entries().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Clones of every tracked torrent, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<Torrent> {
        let mut torrents: Vec<_> = self.lock_entries().values().cloned().collect();
        torrents.sort_by(|a, b| a.id.cmp(&b.id));
        torrents
    }

    /// Number of tracked torrents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Number of tracked torrents in `state`.
    #[must_use]
    pub fn count_in(&self, state: TorrentState) -> usize {
        self.lock_entries()
            .values()
            .filter(|torrent| torrent.state() == state)
            .count()
    }

    /// Mutate non-state fields of a tracked torrent. Returns `false` when untracked.
    ///
    /// Does not persist; the next state change or per-tick snapshot does.
    pub fn update<F>(&self, id: &TorrentId, mutate: F) -> bool
    where
        F: FnOnce(&mut Torrent),
    {
        let mut entries = self.lock_entries();
        let Some(torrent) = entries.get_mut(id) else {
            return false;
        };
        mutate(torrent);
        torrent.updated_at = Utc::now();
        true
    }

    /// Change the state of a tracked torrent and persist the snapshot.
    ///
    /// Leaving `ERROR` clears the recorded failure reason. Returns the previous
    /// state, or `None` when the torrent is not tracked.
    pub fn set_state(&self, id: &TorrentId, state: TorrentState) -> Option<TorrentState> {
        self.transition_if(id, |_| true, state)
    }

    /// Change the state only when `accept` holds for the current one.
    ///
    /// The check and the change happen under one lock, so no other writer can
    /// move the torrent in between. Returns the previous state when the change
    /// was applied, `None` when it was refused or the torrent is not tracked.
    pub fn transition_if<P>(
        &self,
        id: &TorrentId,
        accept: P,
        state: TorrentState,
    ) -> Option<TorrentState>
    where
        P: FnOnce(TorrentState) -> bool,
    {
        let previous = {
            let mut entries = self.lock_entries();
            let torrent = entries.get_mut(id)?;
            if !accept(torrent.state()) {
                return None;
            }
            let previous = torrent.replace_state(state);
            if state != TorrentState::Error {
                torrent.failure_reason = None;
            }
            torrent.updated_at = Utc::now();
            previous
        };
        if previous != state {
            self.publish(Event::StateChanged {
                torrent_id: id.to_string(),
                from: previous.name(),
                to: state.name(),
            });
        }
        self.persist();
        Some(previous)
    }

    /// Move a tracked torrent into `ERROR` with a recorded reason.
    pub fn fail(&self, id: &TorrentId, reason: impl Into<String>) -> Option<TorrentState> {
        let reason = reason.into();
        let previous = {
            let mut entries = self.lock_entries();
            let torrent = entries.get_mut(id)?;
            let previous = torrent.replace_state(TorrentState::Error);
            torrent.failure_reason = Some(reason);
            torrent.updated_at = Utc::now();
            previous
        };
        if previous != TorrentState::Error {
            self.publish(Event::StateChanged {
                torrent_id: id.to_string(),
                from: previous.name(),
                to: TorrentState::Error.name(),
            });
        }
        self.persist();
        Some(previous)
    }

    /// Stop tracking a torrent.
    pub fn remove(&self, id: &TorrentId, reason: &str) -> Option<Torrent> {
        let removed = self.lock_entries().remove(id)?;
        self.publish(Event::TorrentRemoved {
            torrent_id: id.to_string(),
            reason: reason.to_owned(),
        });
        Some(removed)
    }

    /// Write the full tracked set through the snapshot hook.
    ///
    /// Failures are logged; the catalog stays authoritative in memory.
    pub fn persist(&self) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let _guard = self.lock_persist();
        let snapshot = self.list();
        if let Err(err) = sink.persist(&snapshot) {
            warn!(error = %err, tracked = snapshot.len(), "failed to persist torrent snapshot");
        }
    }

    fn publish(&self, event: Event) {
        if let Some(events) = self.events.as_ref() {
            events.publish(event);
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<TorrentId, Torrent>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("torrent catalog mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn lock_persist(&self) -> MutexGuard<'_, ()> {
        match self.persist_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("snapshot mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for TorrentCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClientPhase;
    use anyhow::Result;

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<Vec<Torrent>>>,
    }

    impl SnapshotSink for RecordingSink {
        fn persist(&self, torrents: &[Torrent]) -> Result<()> {
            self.writes
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push(torrents.to_vec());
            Ok(())
        }
    }

    fn id(raw: &str) -> TorrentId {
        TorrentId::new(raw)
    }

    #[test]
    fn set_state_persists_latest_snapshot() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let catalog = TorrentCatalog::new().with_sink(sink.clone());
        assert!(catalog.track(Torrent::new(id("AA"), "alpha")));
        assert!(!catalog.track(Torrent::new(id("aa"), "dup")));

        let previous = catalog.set_state(&id("aa"), TorrentState::Home(ClientPhase::Seeding));
        assert_eq!(previous, Some(TorrentState::ManagerQueued));

        let writes = sink.writes.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(writes.len(), 2, "track and set_state each persist");
        let last = writes.last().ok_or_else(|| anyhow::anyhow!("no writes"))?;
        assert_eq!(last[0].state(), TorrentState::Home(ClientPhase::Seeding));
        Ok(())
    }

    #[test]
    fn set_state_on_unknown_id_is_noop() {
        let catalog = TorrentCatalog::new();
        assert_eq!(catalog.set_state(&id("zz"), TorrentState::Copying), None);
    }

    #[test]
    fn fail_records_reason_until_state_changes() -> Result<()> {
        let catalog = TorrentCatalog::new();
        catalog.track(Torrent::new(id("bb"), "beta"));
        catalog.fail(&id("bb"), "missing .torrent");
        let torrent = catalog.get(&id("bb")).ok_or_else(|| anyhow::anyhow!("tracked"))?;
        assert_eq!(torrent.state(), TorrentState::Error);
        assert_eq!(torrent.failure_reason.as_deref(), Some("missing .torrent"));

        catalog.set_state(&id("bb"), TorrentState::Home(ClientPhase::Seeding));
        let torrent = catalog.get(&id("bb")).ok_or_else(|| anyhow::anyhow!("tracked"))?;
        assert!(torrent.failure_reason.is_none());
        Ok(())
    }

    #[test]
    fn transition_if_refuses_when_the_guard_fails() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let catalog = TorrentCatalog::new().with_sink(sink.clone());
        catalog.track(Torrent::new(id("dd"), "delta"));
        catalog.set_state(&id("dd"), TorrentState::Home(ClientPhase::Moving));
        let seeding = |state: TorrentState| state == TorrentState::Home(ClientPhase::Seeding);

        assert_eq!(catalog.transition_if(&id("dd"), seeding, TorrentState::Copying), None);
        assert_eq!(
            catalog.state_of(&id("dd")),
            Some(TorrentState::Home(ClientPhase::Moving))
        );
        let writes = sink.writes.lock().map_err(|_| anyhow::anyhow!("poisoned"))?.len();
        assert_eq!(writes, 2, "a refused transition does not persist");

        catalog.set_state(&id("dd"), TorrentState::Home(ClientPhase::Seeding));
        assert_eq!(
            catalog.transition_if(&id("dd"), seeding, TorrentState::Copying),
            Some(TorrentState::Home(ClientPhase::Seeding))
        );
        assert_eq!(catalog.state_of(&id("dd")), Some(TorrentState::Copying));
        assert_eq!(catalog.transition_if(&id("zz"), |_| true, TorrentState::Copying), None);
        Ok(())
    }

    #[tokio::test]
    async fn state_changes_publish_events() -> Result<()> {
        let bus = EventBus::with_capacity(16);
        let catalog = TorrentCatalog::new().with_events(bus.clone());
        catalog.track(Torrent::new(id("cc"), "gamma"));
        catalog.set_state(&id("cc"), TorrentState::Unclaimed);
        catalog.set_state(&id("cc"), TorrentState::Unclaimed);
        catalog.remove(&id("cc"), "unroutable");

        let kinds: Vec<_> = bus.recent().iter().map(|env| env.event.kind()).collect();
        assert_eq!(
            kinds,
            vec!["torrent_tracked", "state_changed", "torrent_removed"],
            "repeated state does not re-publish"
        );
        assert!(catalog.is_empty());
        Ok(())
    }

    #[test]
    fn update_leaves_state_untouched() {
        let catalog = TorrentCatalog::new();
        catalog.track(Torrent::new(id("dd"), "delta"));
        assert!(catalog.update(&id("dd"), |torrent| {
            torrent.home_client = Some("home".into());
            torrent.not_found_attempts = 3;
        }));
        assert!(!catalog.update(&id("ee"), |_| {}));
        let ids = catalog.ids();
        assert_eq!(ids, vec![id("dd")]);
        assert_eq!(catalog.count_in(TorrentState::ManagerQueued), 1);
    }
}
