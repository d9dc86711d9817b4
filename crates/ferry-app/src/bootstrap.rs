use std::future::Future;
use std::sync::Arc;

use ferry_config::{
    CONFIG_PATH_ENV, ConfigChange, ConfigService, FerryConfig, resolve_config_path,
};
use ferry_core::{
    ClientRegistry, DownloadClientAdapter, ManagerRegistry, MediaManagerAdapter, TorrentCatalog,
};
use ferry_events::EventBus;
use ferry_runtime::{SnapshotStore, restore};
use ferry_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics};
use ferry_transfer::{EngineDeps, EventHistory};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::instrument::{MeteredSnapshotSink, spawn_transfer_metrics};
use crate::reconciler::{ReconcileSettings, Reconciler};
use crate::router::ConnectionRouter;

/// Environment variable overriding the configured log format.
pub const LOG_FORMAT_ENV: &str = "FERRY_LOG_FORMAT";

const BUILD_SHA: &str = match option_env!("FERRY_BUILD_SHA") {
    Some(sha) => sha,
    None => "dev",
};

/// Dependencies required to bootstrap the daemon.
pub(crate) struct BootstrapDependencies {
    config: ConfigService,
    log_level: String,
    log_format: LogFormat,
    events: EventBus,
    metrics: Metrics,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment.
    pub(crate) fn from_env() -> AppResult<Self> {
        let path = resolve_config_path(std::env::var(CONFIG_PATH_ENV).ok());
        let config =
            ConfigService::load(path).map_err(|err| AppError::config("config.load", err))?;
        let document = config.snapshot();
        let log_format = log_format(
            std::env::var(LOG_FORMAT_ENV).ok().as_deref(),
            document.logging.format.as_deref(),
        );
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self {
            config,
            log_level: document.logging.level,
            log_format,
            events: EventBus::new(),
            metrics,
        })
    }
}

/// Entry point for the daemon boot sequence. Runs until Ctrl-C.
///
/// # Errors
///
/// Returns an error if configuration, logging or adapter construction fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    run_app_with(dependencies).await
}

pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let BootstrapDependencies {
        config,
        log_level,
        log_format,
        events,
        metrics,
    } = dependencies;
    ferry_telemetry::init_logging(&LoggingConfig {
        level: &log_level,
        format: log_format,
        build_sha: BUILD_SHA,
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("daemon");
    info!(config = ?config.path(), "ferry starting");

    let app = App::from_config(&config.snapshot(), events, metrics)?;
    app.run_until(async {
        tokio::signal::ctrl_c().await.map_err(|source| AppError::Io {
            operation: "signal.ctrl_c",
            path: None,
            source,
        })
    })
    .await
}

fn log_format(env: Option<&str>, configured: Option<&str>) -> LogFormat {
    LogFormat::from_setting(env.or(configured))
}

/// Fully wired daemon: registries, catalog, routes and the reconciler.
pub struct App {
    catalog: Arc<TorrentCatalog>,
    clients: Arc<ClientRegistry>,
    managers: Arc<ManagerRegistry>,
    router: Arc<ConnectionRouter>,
    reconciler: Arc<Reconciler>,
    history: Arc<EventHistory>,
    events: EventBus,
    metrics: Metrics,
}

impl App {
    /// Build adapters through the factory and wire them up.
    ///
    /// # Errors
    ///
    /// Returns an error when a client or manager type is unsupported or its
    /// HTTP client cannot be built.
    pub fn from_config(
        config: &FerryConfig,
        events: EventBus,
        metrics: Metrics,
    ) -> AppResult<Self> {
        let timeout = config.engine.request_timeout();
        let clients = config
            .download_clients
            .iter()
            .map(|client| {
                ferry_clients::build_download_client(client, timeout)
                    .map_err(|err| AppError::client("factory.download_client", err))
            })
            .collect::<AppResult<Vec<_>>>()?;
        let managers = config
            .media_managers
            .iter()
            .map(|manager| {
                ferry_clients::build_media_manager(manager, timeout)
                    .map_err(|err| AppError::manager("factory.media_manager", err))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self::assemble(config, clients, managers, events, metrics))
    }

    /// Wire already built adapters. Restores the snapshot named by the config.
    #[must_use]
    pub fn assemble(
        config: &FerryConfig,
        clients: Vec<Arc<dyn DownloadClientAdapter>>,
        managers: Vec<Arc<dyn MediaManagerAdapter>>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        let clients = Arc::new(ClientRegistry::from_entries(clients));
        let managers = Arc::new(ManagerRegistry::from_entries(managers));

        let store = Arc::new(SnapshotStore::new(&config.engine.state_file));
        let restored = restore(store.load(), &clients, &managers);
        info!(
            path = %store.path().display(),
            restored = restored.len(),
            "torrent catalog hydrated from snapshot"
        );
        let catalog = TorrentCatalog::new()
            .with_sink(Arc::new(MeteredSnapshotSink::new(store, metrics.clone())))
            .with_events(events.clone());
        catalog.seed(restored);
        let catalog = Arc::new(catalog);

        let history = Arc::new(EventHistory::new(events.clone()));
        let deps = EngineDeps {
            catalog: Arc::clone(&catalog),
            clients: Arc::clone(&clients),
            history: Arc::clone(&history) as Arc<dyn ferry_core::TransferHistory>,
            events: events.clone(),
        };
        let router = Arc::new(
            ConnectionRouter::from_config(&config.connections, deps)
                .with_client_timeout(config.engine.request_timeout()),
        );
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&catalog),
            Arc::clone(&clients),
            Arc::clone(&managers),
            Arc::clone(&router),
            metrics.clone(),
            ReconcileSettings::from_engine(&config.engine),
        ));

        Self {
            catalog,
            clients,
            managers,
            router,
            reconciler,
            history,
            events,
            metrics,
        }
    }

    /// Tracked torrents.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<TorrentCatalog> {
        &self.catalog
    }

    /// Download clients by name.
    #[must_use]
    pub const fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Media managers by name.
    #[must_use]
    pub const fn managers(&self) -> &Arc<ManagerRegistry> {
        &self.managers
    }

    /// Installed routes.
    #[must_use]
    pub const fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    /// Reconciliation loop.
    #[must_use]
    pub const fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// In-memory transfer history.
    #[must_use]
    pub const fn history(&self) -> &Arc<EventHistory> {
        &self.history
    }

    /// Event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Metrics registry.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Apply a change returned by a [`ConfigService`] mutation.
    ///
    /// # Errors
    ///
    /// Returns an error when the router rejects the change.
    pub async fn apply(&self, change: ConfigChange) -> AppResult<()> {
        self.router.apply(change).await
    }

    /// Run the reconciler until `signal` resolves, then drain every route and
    /// write a final snapshot. Returns the signal's result.
    ///
    /// # Errors
    ///
    /// Propagates the error produced by `signal`.
    pub async fn run_until<F>(self, signal: F) -> AppResult<()>
    where
        F: Future<Output = AppResult<()>>,
    {
        let bridge = spawn_transfer_metrics(&self.events, self.metrics.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_task = tokio::spawn(Arc::clone(&self.reconciler).run(shutdown_rx));

        let outcome = signal.await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
        if let Err(err) = loop_task.await {
            warn!(error = %err, "reconciler task join failed");
        }
        self.router.shutdown_all().await;
        self.catalog.persist();
        bridge.abort();
        info!(tracked = self.catalog.len(), "ferry stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_log_format_wins_over_config() {
        assert_eq!(log_format(Some("json"), Some("pretty")), LogFormat::Json);
        assert_eq!(log_format(None, Some("pretty")), LogFormat::Pretty);
        assert_eq!(log_format(None, None), LogFormat::infer());
    }

    #[test]
    fn unsupported_client_type_aborts_startup() -> anyhow::Result<()> {
        let config: FerryConfig = ferry_config::parse_str(
            r"
download_clients:
  - name: home
    type: transmission
    host: localhost
    port: 9091
    password: secret
",
            ferry_config::ConfigFormat::Yaml,
        )?;
        let result = App::from_config(&config, EventBus::new(), Metrics::new()?);
        assert!(matches!(result, Err(AppError::Client { .. })));
        Ok(())
    }
}
