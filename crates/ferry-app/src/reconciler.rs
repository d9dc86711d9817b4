//! Periodic reconciliation of tracked torrents against clients and managers.
//!
//! # Design
//!
//! - One logical thread: ticks never overlap. Each tick runs in its own task
//!   so a panic is contained and answered with a back-off.
//! - A tick ingests manager queues, advances every tracked id by its current
//!   state, applies the removals collected on the way, then writes one full
//!   snapshot.
//! - Client connectivity failures are "not found this tick"; nothing here
//!   fails the tick as a whole. Components that failed are reported through
//!   `HealthChanged` whenever the degraded set changes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use ferry_config::{EngineConfig, defaults};
use ferry_core::{
    ClientError, ClientPhase, ClientRegistry, ClientSide, ClientTorrentInfo,
    DownloadClientAdapter, ManagerRegistry, MediaManagerAdapter, Torrent, TorrentCatalog,
    TorrentId, TorrentState,
};
use ferry_events::Event;
use ferry_telemetry::Metrics;
use ferry_transfer::EnqueueOutcome;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::router::{ConnectionRouter, Route};

/// Timing and retention knobs for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Pause between successful ticks.
    pub tick_interval: Duration,
    /// Pause after a failed or panicked tick.
    pub error_backoff: Duration,
    /// Consecutive unclaimed ticks before a torrent is dropped.
    pub not_found_limit: u32,
}

impl ReconcileSettings {
    /// Settings from the engine section of the configuration.
    #[must_use]
    pub const fn from_engine(engine: &EngineConfig) -> Self {
        Self {
            tick_interval: engine.tick_interval(),
            error_backoff: engine.error_backoff(),
            not_found_limit: engine.not_found_limit,
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(defaults::TICK_INTERVAL_SECS),
            error_backoff: Duration::from_secs(defaults::ERROR_BACKOFF_SECS),
            not_found_limit: defaults::NOT_FOUND_LIMIT,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Ids newly tracked from manager queues.
    pub discovered: usize,
    /// Torrents located on a home client.
    pub adopted: usize,
    /// Transfers accepted by an engine.
    pub enqueued: usize,
    /// `COPYING` torrents handed back to their engine.
    pub resubmitted: usize,
    /// Torrents found already present on the target.
    pub deduplicated: usize,
    /// Torrents no longer tracked.
    pub removed: usize,
    /// Clients and managers that could not be reached, e.g. `client:home`.
    pub degraded: BTreeSet<String>,
}

impl TickReport {
    fn client_failed(&mut self, client: &str, err: &ClientError) {
        if err.is_connectivity() {
            self.degraded.insert(format!("client:{client}"));
        }
    }
}

enum Verdict {
    Keep,
    Remove(&'static str),
}

/// Drives every tracked torrent through its lifecycle.
pub struct Reconciler {
    catalog: Arc<TorrentCatalog>,
    clients: Arc<ClientRegistry>,
    managers: Arc<ManagerRegistry>,
    router: Arc<ConnectionRouter>,
    metrics: Metrics,
    settings: ReconcileSettings,
    degraded: Mutex<BTreeSet<String>>,
}

impl Reconciler {
    /// Assemble the loop around shared collaborators.
    #[must_use]
    pub fn new(
        catalog: Arc<TorrentCatalog>,
        clients: Arc<ClientRegistry>,
        managers: Arc<ManagerRegistry>,
        router: Arc<ConnectionRouter>,
        metrics: Metrics,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            catalog,
            clients,
            managers,
            router,
            metrics,
            settings,
            degraded: Mutex::new(BTreeSet::new()),
        }
    }

    /// Loop settings.
    #[must_use]
    pub const fn settings(&self) -> ReconcileSettings {
        self.settings
    }

    /// Tick until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_interval_ms = self.settings.tick_interval.as_millis(),
            error_backoff_ms = self.settings.error_backoff.as_millis(),
            "reconciler started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let reconciler = Arc::clone(&self);
            let pause = match tokio::spawn(async move { reconciler.tick().await }).await {
                Ok(report) => {
                    if report != TickReport::default() {
                        debug!(?report, "reconciliation tick finished");
                    }
                    self.settings.tick_interval
                }
                Err(err) => {
                    self.metrics.inc_reconcile_failure();
                    warn!(error = %err, "reconciliation tick failed; backing off");
                    self.settings.error_backoff
                }
            };
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("reconciler stopped");
    }

    /// Run one reconciliation pass.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        self.ingest(&mut report).await;

        let mut removals = Vec::new();
        for id in self.catalog.ids() {
            let Some(torrent) = self.catalog.get(&id) else {
                continue;
            };
            if let Verdict::Remove(reason) = self.advance(&torrent, &mut report).await {
                removals.push((id, reason));
            }
        }

        for (id, reason) in removals {
            if self.catalog.remove(&id, reason).is_some() {
                info!(torrent_id = %id, reason, "stopped tracking torrent");
                report.removed += 1;
            }
        }

        self.catalog.persist();
        self.metrics.set_tracked_torrents(self.catalog.len());
        self.metrics.set_active_transfers(self.router.in_flight_total());
        self.metrics.inc_reconcile_tick();
        self.publish_health(&report.degraded).await;
        report
    }

    async fn publish_health(&self, degraded: &BTreeSet<String>) {
        let mut previous = self.degraded.lock().await;
        if *previous == *degraded {
            return;
        }
        previous.clone_from(degraded);
        if degraded.is_empty() {
            info!("all clients and managers reachable again");
        } else {
            warn!(degraded = ?degraded, "clients or managers unreachable");
        }
        self.router.deps().events.publish(Event::HealthChanged {
            degraded: degraded.iter().cloned().collect(),
        });
    }

    async fn ingest(&self, report: &mut TickReport) {
        for manager in self.managers.all() {
            let entries = match manager.list_queue().await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(manager = %manager.name(), error = %err, "media manager queue unavailable");
                    report.degraded.insert(format!("manager:{}", manager.name()));
                    continue;
                }
            };
            let name = manager.name().to_owned();
            let kind = manager.kind();
            for entry in entries {
                let id = entry.download_id;
                let known = self.catalog.update(&id, |torrent| {
                    torrent.media_manager = Some(name.clone());
                    torrent.media_manager_kind = Some(kind);
                });
                if known {
                    continue;
                }
                let mut torrent = Torrent::new(id.clone(), entry.title);
                torrent.media_manager = Some(name.clone());
                torrent.media_manager_kind = Some(kind);
                if self.catalog.track(torrent) {
                    info!(torrent_id = %id, manager = %name, "tracking torrent from manager queue");
                    report.discovered += 1;
                }
            }
        }
    }

    async fn advance(&self, torrent: &Torrent, report: &mut TickReport) -> Verdict {
        let state = torrent.state();
        if state.is_unclaimed_like() {
            self.discover(torrent, report).await
        } else if state.is_home() {
            self.refresh_home(torrent, report).await
        } else if state.is_target() || state == TorrentState::Copied {
            self.refresh_target(torrent, report).await
        } else {
            // COPYING
            self.recover_copying(torrent, report);
            Verdict::Keep
        }
    }

    async fn discover(&self, torrent: &Torrent, report: &mut TickReport) -> Verdict {
        let id = &torrent.id;
        for client in self.clients.all() {
            match client.ensure_connected().await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(client = %client.name(), "client not connected; skipping");
                    report.degraded.insert(format!("client:{}", client.name()));
                    continue;
                }
                Err(err) => {
                    debug!(client = %client.name(), error = %err, "client unreachable; skipping");
                    report.client_failed(client.name(), &err);
                    continue;
                }
            }
            match client.has_torrent(id).await {
                Ok(true) => return self.adopt_home(torrent, &client, report).await,
                Ok(false) => {}
                Err(err) => {
                    debug!(client = %client.name(), torrent_id = %id, error = %err, "presence query failed; skipping client");
                    report.client_failed(client.name(), &err);
                }
            }
        }

        let attempts = torrent.not_found_attempts.saturating_add(1);
        self.catalog.update(id, |entry| entry.not_found_attempts = attempts);
        if torrent.state() == TorrentState::Error {
            return Verdict::Remove("failed_and_unclaimed");
        }
        if attempts > self.settings.not_found_limit {
            return Verdict::Remove("not_found");
        }
        if torrent.state() == TorrentState::ManagerQueued {
            self.catalog.set_state(id, TorrentState::Unclaimed);
        }
        debug!(torrent_id = %id, attempts, "torrent not found on any client");
        Verdict::Keep
    }

    async fn adopt_home(
        &self,
        torrent: &Torrent,
        client: &Arc<dyn DownloadClientAdapter>,
        report: &mut TickReport,
    ) -> Verdict {
        let id = &torrent.id;
        let info = match client.get_info(id).await {
            Ok(Some(info)) => info,
            Ok(None) => return Verdict::Keep,
            Err(err) => {
                debug!(client = %client.name(), torrent_id = %id, error = %err, "info query failed after presence check");
                return Verdict::Keep;
            }
        };
        let name = client.name().to_owned();
        let label = info.state.clone();
        self.catalog.update(id, |entry| {
            entry.home_client = Some(name.clone());
            entry.home_client_info = Some(info);
            entry.not_found_attempts = 0;
        });
        self.apply_native(id, torrent.state(), ClientSide::Home, &label);
        info!(torrent_id = %id, client = %name, native_state = %label, "torrent located on home client");
        report.adopted += 1;

        if self.router.route_for_home(&name).is_none() {
            debug!(torrent_id = %id, client = %name, "no route leaves client");
            return Verdict::Remove("unroutable");
        }
        Verdict::Keep
    }

    async fn refresh_home(&self, torrent: &Torrent, report: &mut TickReport) -> Verdict {
        let id = &torrent.id;
        let Some(home) = torrent
            .home_client
            .as_deref()
            .and_then(|name| self.clients.get(name))
        else {
            warn!(torrent_id = %id, client = ?torrent.home_client, "home client unresolvable");
            self.catalog.set_state(id, TorrentState::Missing);
            return Verdict::Keep;
        };

        let info = match home.get_info(id).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                info!(torrent_id = %id, client = %home.name(), "home client dropped torrent");
                return Verdict::Remove("home_dropped");
            }
            Err(err) => {
                debug!(torrent_id = %id, client = %home.name(), error = %err, "home refresh failed; retrying next tick");
                report.client_failed(home.name(), &err);
                return Verdict::Keep;
            }
        };
        let label = info.state.clone();
        self.catalog
            .update(id, |entry| entry.home_client_info = Some(info));
        let state = self.apply_native(id, torrent.state(), ClientSide::Home, &label);

        let Some(route) = self.router.route_for_home(home.name()) else {
            debug!(torrent_id = %id, client = %home.name(), "no route leaves client");
            return Verdict::Remove("unroutable");
        };
        if state == TorrentState::Home(ClientPhase::Seeding) {
            self.hand_off(id, &route, report).await;
        }
        Verdict::Keep
    }

    async fn hand_off(&self, id: &TorrentId, route: &Route, report: &mut TickReport) {
        if route.engine().is_active(id) {
            return;
        }
        let target_name = &route.config().to;
        let Some(target) = self.clients.get(target_name) else {
            debug!(torrent_id = %id, client = %target_name, "target client unresolvable");
            return;
        };
        match target.get_info(id).await {
            Ok(Some(info)) => {
                let label = info.state.clone();
                self.adopt_target(id, target_name, info);
                let home = TorrentState::Home(ClientPhase::Seeding);
                self.apply_native(id, home, ClientSide::Target, &label);
                info!(torrent_id = %id, client = %target_name, "torrent already on target");
                report.deduplicated += 1;
            }
            Ok(None) => match self.router.enqueue(route.name(), id.clone()) {
                Some(EnqueueOutcome::Accepted) => {
                    info!(torrent_id = %id, route = %route.name(), "transfer enqueued");
                    report.enqueued += 1;
                }
                Some(EnqueueOutcome::AlreadyActive) => {}
                Some(EnqueueOutcome::Closed) | None => {
                    debug!(torrent_id = %id, route = %route.name(), "route is draining");
                }
            },
            Err(err) => {
                debug!(torrent_id = %id, client = %target_name, error = %err, "target presence query failed; retrying next tick");
                report.client_failed(target_name, &err);
            }
        }
    }

    fn recover_copying(&self, torrent: &Torrent, report: &mut TickReport) {
        let id = &torrent.id;
        let Some(route) = torrent
            .home_client
            .as_deref()
            .and_then(|home| self.router.route_for_home(home))
        else {
            self.catalog.fail(id, "route no longer configured");
            return;
        };
        if route.engine().is_active(id) {
            return;
        }
        if self.catalog.state_of(id) != Some(TorrentState::Copying) {
            return;
        }
        if route.engine().enqueue(id.clone()) == EnqueueOutcome::Accepted {
            info!(torrent_id = %id, route = %route.name(), "resubmitted interrupted transfer");
            report.resubmitted += 1;
        }
    }

    async fn refresh_target(&self, torrent: &Torrent, report: &mut TickReport) -> Verdict {
        let id = &torrent.id;
        let route = torrent
            .home_client
            .as_deref()
            .and_then(|home| self.router.route_for_home(home));
        let state = torrent.state();
        if state.is_transfer_phase()
            && route.as_ref().is_some_and(|route| route.engine().is_active(id))
        {
            return Verdict::Keep;
        }
        let Some(target_name) = torrent
            .target_client
            .clone()
            .or_else(|| route.map(|route| route.config().to.clone()))
        else {
            error!(torrent_id = %id, state = %state, "target state without a target client");
            return Verdict::Keep;
        };
        let Some(target) = self.clients.get(&target_name) else {
            debug!(torrent_id = %id, client = %target_name, "target client unresolvable");
            return Verdict::Keep;
        };

        let info = match target.get_info(id).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                info!(torrent_id = %id, client = %target_name, "target no longer holds torrent");
                self.catalog.update(id, |entry| {
                    entry.target_client = None;
                    entry.target_client_info = None;
                });
                self.catalog.set_state(id, TorrentState::Unclaimed);
                return Verdict::Keep;
            }
            Err(err) => {
                debug!(torrent_id = %id, client = %target_name, error = %err, "target refresh failed; retrying next tick");
                report.client_failed(&target_name, &err);
                return Verdict::Keep;
            }
        };
        let label = info.state.clone();
        self.adopt_target(id, &target_name, info);
        let next = self.apply_native(id, state, ClientSide::Target, &label);
        if next == TorrentState::Target(ClientPhase::Seeding) {
            return self.confirm_cleanup(torrent).await;
        }
        Verdict::Keep
    }

    async fn confirm_cleanup(&self, torrent: &Torrent) -> Verdict {
        let id = &torrent.id;
        let Some(manager) = self.resolve_manager(torrent) else {
            debug!(torrent_id = %id, manager = ?torrent.media_manager, "media manager unresolvable; keeping torrent");
            return Verdict::Keep;
        };
        match manager.is_job_cleared(id).await {
            Ok(true) => {}
            Ok(false) => return Verdict::Keep,
            Err(err) => {
                warn!(torrent_id = %id, manager = %manager.name(), error = %err, "media manager query failed");
                return Verdict::Keep;
            }
        }

        let Some(home) = torrent
            .home_client
            .as_deref()
            .and_then(|name| self.clients.get(name))
        else {
            return Verdict::Remove("completed");
        };
        match home.has_torrent(id).await {
            Ok(false) => return Verdict::Remove("completed"),
            Ok(true) => {}
            Err(err) => {
                debug!(torrent_id = %id, client = %home.name(), error = %err, "home presence query failed; retrying cleanup");
                return Verdict::Keep;
            }
        }
        match home.remove_torrent(id, true).await {
            Ok(_) => {
                info!(torrent_id = %id, client = %home.name(), "removed home copy after import");
                Verdict::Remove("completed")
            }
            Err(err) => {
                warn!(torrent_id = %id, client = %home.name(), error = %err, "home removal failed; retrying next tick");
                Verdict::Keep
            }
        }
    }

    fn resolve_manager(&self, torrent: &Torrent) -> Option<Arc<dyn MediaManagerAdapter>> {
        torrent
            .media_manager
            .as_deref()
            .and_then(|name| self.managers.get(name))
            .or_else(|| {
                torrent
                    .media_manager_kind
                    .and_then(|kind| self.managers.first_of_kind(kind))
            })
    }

    fn adopt_target(&self, id: &TorrentId, client: &str, info: ClientTorrentInfo) {
        self.catalog.update(id, |entry| {
            entry.target_client = Some(client.to_owned());
            entry.target_client_info = Some(info);
        });
    }

    /// Apply a native label; unknown labels record `ERROR`. Returns the new state.
    fn apply_native(
        &self,
        id: &TorrentId,
        current: TorrentState,
        side: ClientSide,
        label: &str,
    ) -> TorrentState {
        let next = TorrentState::from_native(side, label);
        if next == TorrentState::Error {
            warn!(torrent_id = %id, native_state = %label, "unrecognised native state");
            self.catalog
                .fail(id, format!("unrecognised native state {label:?}"));
        } else if next != current {
            self.catalog.set_state(id, next);
        }
        next
    }
}
