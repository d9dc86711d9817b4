//! Runtime access to the configuration document.
//!
//! Every mutation is applied to a copy, re-validated, written back to the
//! attached file (when any), and only then swapped in. The returned
//! [`ConfigChange`] tells the application which routes to rebuild.

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{error, info};

use crate::error::{ConfigError, ConfigResult};
use crate::loader::{load_from_path, write_to_path};
use crate::model::{ConnectionConfig, DownloadClientConfig, FerryConfig};
use crate::validate::validate;

/// Effect of a configuration mutation on the running routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    /// A new connection must be built.
    ConnectionAdded(ConnectionConfig),
    /// The named connection must be drained and rebuilt from `config`.
    ConnectionUpdated {
        /// Previous connection name.
        name: String,
        /// Replacement definition (may carry a new name).
        config: ConnectionConfig,
    },
    /// The named connection must be drained and dropped.
    ConnectionRemoved {
        /// Connection name.
        name: String,
    },
    /// A download client was added or reconfigured; its connections must be rebuilt.
    ClientUpserted {
        /// New client definition.
        client: DownloadClientConfig,
        /// Connections referencing the client.
        connections: Vec<ConnectionConfig>,
    },
    /// A download client and every connection referencing it were removed.
    ClientRemoved {
        /// Client name.
        name: String,
        /// Names of the connections removed alongside it.
        connections: Vec<String>,
    },
}

/// Validated configuration document with optional file write-back.
pub struct ConfigService {
    document: RwLock<FerryConfig>,
    path: Option<PathBuf>,
}

impl ConfigService {
    /// Load and validate the document at `path`; mutations write back to it.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, parsed or validated.
    pub fn load(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let document = load_from_path(&path)?;
        Ok(Self {
            document: RwLock::new(document),
            path: Some(path),
        })
    }

    /// Wrap an in-memory document; mutations are not persisted.
    ///
    /// # Errors
    ///
    /// Returns an error when the document fails validation.
    pub fn from_config(config: FerryConfig) -> ConfigResult<Self> {
        validate(&config)?;
        Ok(Self {
            document: RwLock::new(config),
            path: None,
        })
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Clone of the current document.
    #[must_use]
    pub fn snapshot(&self) -> FerryConfig {
        self.read().clone()
    }

    /// Add a connection.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is taken or the result fails validation.
    pub fn add_connection(&self, connection: ConnectionConfig) -> ConfigResult<ConfigChange> {
        self.mutate("add_connection", |doc| {
            if doc.connection(&connection.name).is_some() {
                return Err(ConfigError::Duplicate {
                    section: "connections",
                    name: connection.name.clone(),
                });
            }
            doc.connections.push(connection.clone());
            Ok(ConfigChange::ConnectionAdded(connection))
        })
    }

    /// Replace the connection called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is unknown or the result fails validation.
    pub fn update_connection(
        &self,
        name: &str,
        connection: ConnectionConfig,
    ) -> ConfigResult<ConfigChange> {
        self.mutate("update_connection", |doc| {
            let slot = doc
                .connections
                .iter_mut()
                .find(|existing| existing.name == name)
                .ok_or_else(|| ConfigError::NotFound {
                    section: "connections",
                    name: name.to_owned(),
                })?;
            *slot = connection.clone();
            Ok(ConfigChange::ConnectionUpdated {
                name: name.to_owned(),
                config: connection,
            })
        })
    }

    /// Delete the connection called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is unknown.
    pub fn remove_connection(&self, name: &str) -> ConfigResult<ConfigChange> {
        self.mutate("remove_connection", |doc| {
            let before = doc.connections.len();
            doc.connections.retain(|existing| existing.name != name);
            if doc.connections.len() == before {
                return Err(ConfigError::NotFound {
                    section: "connections",
                    name: name.to_owned(),
                });
            }
            Ok(ConfigChange::ConnectionRemoved {
                name: name.to_owned(),
            })
        })
    }

    /// Add a download client or replace the one with the same name.
    ///
    /// # Errors
    ///
    /// Returns an error when the result fails validation.
    pub fn upsert_client(&self, client: DownloadClientConfig) -> ConfigResult<ConfigChange> {
        self.mutate("upsert_client", |doc| {
            if let Some(slot) = doc
                .download_clients
                .iter_mut()
                .find(|existing| existing.name == client.name)
            {
                *slot = client.clone();
            } else {
                doc.download_clients.push(client.clone());
            }
            let connections = doc
                .connections_for_client(&client.name)
                .into_iter()
                .cloned()
                .collect();
            Ok(ConfigChange::ClientUpserted {
                client,
                connections,
            })
        })
    }

    /// Delete a download client and every connection referencing it.
    ///
    /// # Errors
    ///
    /// Returns an error when the client is unknown.
    pub fn remove_client(&self, name: &str) -> ConfigResult<ConfigChange> {
        self.mutate("remove_client", |doc| {
            if doc.client(name).is_none() {
                return Err(ConfigError::NotFound {
                    section: "download_clients",
                    name: name.to_owned(),
                });
            }
            doc.download_clients.retain(|existing| existing.name != name);
            let mut removed = Vec::new();
            doc.connections.retain(|conn| {
                let keep = conn.from != name && conn.to != name;
                if !keep {
                    removed.push(conn.name.clone());
                }
                keep
            });
            Ok(ConfigChange::ClientRemoved {
                name: name.to_owned(),
                connections: removed,
            })
        })
    }

    fn mutate<F>(&self, operation: &'static str, apply: F) -> ConfigResult<ConfigChange>
    where
        F: FnOnce(&mut FerryConfig) -> ConfigResult<ConfigChange>,
    {
        let mut guard = self.write();
        let mut candidate = guard.clone();
        let change = apply(&mut candidate)?;
        validate(&candidate)?;
        if let Some(path) = self.path.as_deref() {
            write_to_path(path, &candidate)?;
        }
        *guard = candidate;
        drop(guard);
        info!(operation, "configuration updated");
        Ok(change)
    }

    fn read(&self) -> RwLockReadGuard<'_, FerryConfig> {
        match self.document.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("config document lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, FerryConfig> {
        match self.document.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("config document lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}
