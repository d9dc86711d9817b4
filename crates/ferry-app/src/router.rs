//! Named routes between download clients, each with its own transfer engine.
//!
//! # Design
//!
//! - Routes are looked up by the home client name; the first configured route
//!   whose `from` matches wins.
//! - Replacing or removing a route drains its engine while it is still
//!   installed, so torrents it is copying keep looking active to the
//!   reconciler until the jobs end.
//! - Mutations are serialised; lookups never wait on a drain.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use ferry_config::{ConfigChange, ConnectionConfig, DownloadClientConfig, defaults};
use ferry_core::TorrentId;
use ferry_events::Event;
use ferry_transfer::{EngineDeps, EnqueueOutcome, TransferEngine};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};

/// A configured connection and the engine executing its transfers.
pub struct Route {
    engine: TransferEngine,
}

impl Route {
    /// Route name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.engine.route().name
    }

    /// Connection definition.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        self.engine.route()
    }

    /// Transfer engine bound to the route.
    #[must_use]
    pub const fn engine(&self) -> &TransferEngine {
        &self.engine
    }
}

/// Installed routes in configuration order.
pub struct ConnectionRouter {
    routes: RwLock<Vec<Arc<Route>>>,
    mutation: Mutex<()>,
    deps: EngineDeps,
    client_timeout: Duration,
}

impl ConnectionRouter {
    /// Router with no routes.
    #[must_use]
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
            mutation: Mutex::new(()),
            deps,
            client_timeout: Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS),
        }
    }

    /// Router with one engine per connection.
    #[must_use]
    pub fn from_config(connections: &[ConnectionConfig], deps: EngineDeps) -> Self {
        let router = Self::new(deps);
        {
            let mut routes = router.write();
            for connection in connections {
                let engine = TransferEngine::new(connection.clone(), router.deps.clone());
                routes.push(Arc::new(Route { engine }));
            }
        }
        router
    }

    /// Timeout handed to download clients rebuilt by [`ConnectionRouter::apply`].
    #[must_use]
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Dependencies shared by every engine.
    #[must_use]
    pub const fn deps(&self) -> &EngineDeps {
        &self.deps
    }

    /// All routes in configuration order.
    #[must_use]
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.read().clone()
    }

    /// Route by name.
    #[must_use]
    pub fn route(&self, name: &str) -> Option<Arc<Route>> {
        self.read().iter().find(|route| route.name() == name).cloned()
    }

    /// First route leaving `client`.
    #[must_use]
    pub fn route_for_home(&self, client: &str) -> Option<Arc<Route>> {
        self.read()
            .iter()
            .find(|route| route.config().from == client)
            .cloned()
    }

    /// Names of the routes that start or end at `client`.
    #[must_use]
    pub fn connections_for_client(&self, client: &str) -> Vec<String> {
        self.read()
            .iter()
            .filter(|route| route.config().from == client || route.config().to == client)
            .map(|route| route.name().to_owned())
            .collect()
    }

    /// Hand `id` to the named route's engine. `None` when the route is unknown.
    pub fn enqueue(&self, route: &str, id: TorrentId) -> Option<EnqueueOutcome> {
        self.route(route).map(|route| route.engine.enqueue(id))
    }

    /// Whether the named route has a job for `id`.
    #[must_use]
    pub fn is_active(&self, route: &str, id: &TorrentId) -> bool {
        self.route(route)
            .is_some_and(|route| route.engine.is_active(id))
    }

    /// Transfers holding a slot across every route.
    #[must_use]
    pub fn in_flight_total(&self) -> usize {
        self.read().iter().map(|route| route.engine.in_flight()).sum()
    }

    /// Build and install a route.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RouteExists`] when the name is taken.
    pub async fn add_route(&self, config: ConnectionConfig) -> AppResult<()> {
        let engine = TransferEngine::new(config, self.deps.clone());
        self.add_engine(engine).await
    }

    /// Install a route around an already built engine.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RouteExists`] when the name is taken.
    pub async fn add_engine(&self, engine: TransferEngine) -> AppResult<()> {
        let _serial = self.mutation.lock().await;
        let name = engine.route().name.clone();
        {
            let mut routes = self.write();
            if routes.iter().any(|route| route.name() == name) {
                return Err(AppError::RouteExists { route: name });
            }
            routes.push(Arc::new(Route { engine }));
        }
        self.announce(&name, "added");
        Ok(())
    }

    /// Drain the named route and install `config` in its place.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RouteNotFound`] when no route has that name, or
    /// [`AppError::RouteExists`] when the new name clashes with another route.
    pub async fn replace_route(&self, name: &str, config: ConnectionConfig) -> AppResult<()> {
        let _serial = self.mutation.lock().await;
        let old = self.route(name).ok_or_else(|| AppError::RouteNotFound {
            route: name.to_owned(),
        })?;
        if config.name != name && self.route(&config.name).is_some() {
            return Err(AppError::RouteExists {
                route: config.name,
            });
        }
        old.engine.shutdown().await;

        let new_name = config.name.clone();
        let replacement = Arc::new(Route {
            engine: TransferEngine::new(config, self.deps.clone()),
        });
        {
            let mut routes = self.write();
            match routes.iter().position(|route| route.name() == name) {
                Some(index) => routes[index] = replacement,
                None => routes.push(replacement),
            }
        }
        info!(route = %name, replacement = %new_name, "route replaced");
        self.announce(&new_name, "replaced");
        Ok(())
    }

    /// Drain and drop the named route.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RouteNotFound`] when no route has that name.
    pub async fn remove_route(&self, name: &str) -> AppResult<()> {
        let _serial = self.mutation.lock().await;
        self.remove_locked(name).await
    }

    /// Drain and drop every route touching `client`. Returns the removed names.
    pub async fn remove_routes_for_client(&self, client: &str) -> Vec<String> {
        let _serial = self.mutation.lock().await;
        let names = self.connections_for_client(client);
        let mut removed = Vec::with_capacity(names.len());
        for name in names {
            match self.remove_locked(&name).await {
                Ok(()) => removed.push(name),
                Err(err) => warn!(route = %name, error = %err, "route vanished during removal"),
            }
        }
        removed
    }

    /// Bring the routes (and client registry) in line with a configuration change.
    ///
    /// # Errors
    ///
    /// Returns an error when a route mutation is rejected or a client cannot be built.
    pub async fn apply(&self, change: ConfigChange) -> AppResult<()> {
        match change {
            ConfigChange::ConnectionAdded(config) => self.add_route(config).await,
            ConfigChange::ConnectionUpdated { name, config } => {
                self.replace_route(&name, config).await
            }
            ConfigChange::ConnectionRemoved { name } => self.remove_route(&name).await,
            ConfigChange::ClientUpserted {
                client,
                connections,
            } => self.reconfigure_client(&client, connections).await,
            ConfigChange::ClientRemoved { name, connections } => {
                for route in connections {
                    if self.route(&route).is_some() {
                        self.remove_route(&route).await?;
                    }
                }
                // Catch routes the config change did not list.
                self.remove_routes_for_client(&name).await;
                self.deps.clients.remove(&name);
                info!(client = %name, "download client removed");
                Ok(())
            }
        }
    }

    /// Drain every engine. Used at shutdown.
    pub async fn shutdown_all(&self) {
        for route in self.routes() {
            route.engine.shutdown().await;
        }
    }

    async fn reconfigure_client(
        &self,
        client: &DownloadClientConfig,
        connections: Vec<ConnectionConfig>,
    ) -> AppResult<()> {
        let adapter = ferry_clients::build_download_client(client, self.client_timeout)
            .map_err(|err| AppError::client("router.reconfigure_client", err))?;
        // Drain first so in-flight jobs finish against the old adapter.
        for connection in &connections {
            if let Some(route) = self.route(&connection.name) {
                route.engine.shutdown().await;
            }
        }
        self.deps.clients.register(adapter);
        info!(client = %client.name, "download client reconfigured");
        for connection in connections {
            if self.route(&connection.name).is_some() {
                let name = connection.name.clone();
                self.replace_route(&name, connection).await?;
            } else {
                self.add_route(connection).await?;
            }
        }
        Ok(())
    }

    async fn remove_locked(&self, name: &str) -> AppResult<()> {
        let route = self.route(name).ok_or_else(|| AppError::RouteNotFound {
            route: name.to_owned(),
        })?;
        route.engine.shutdown().await;
        self.write().retain(|existing| existing.name() != name);
        info!(route = %name, "route removed");
        self.announce(name, "removed");
        Ok(())
    }

    fn announce(&self, route: &str, change: &str) {
        self.deps.events.publish(Event::RouteChanged {
            route: route.to_owned(),
            change: change.to_owned(),
        });
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Route>>> {
        match self.routes.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("route table lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Route>>> {
        match self.routes.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("route table lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}
