//! Serialised torrent shape and restoration against live registries.

use chrono::{DateTime, Utc};
use ferry_core::{
    ClientRegistry, ClientTorrentInfo, ManagerRegistry, MediaManagerKind, Torrent, TorrentId,
    TorrentState, TransferTelemetry,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// One torrent as written to the snapshot file.
///
/// Client and manager references are stored by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentRecord {
    /// Content hash.
    pub id: TorrentId,
    /// Display name.
    pub name: String,
    /// State name, e.g. `HOME_SEEDING`.
    pub state: TorrentState,
    /// Home client name.
    #[serde(default)]
    pub home_client: Option<String>,
    /// Target client name.
    #[serde(default)]
    pub target_client: Option<String>,
    /// Last home client view.
    #[serde(default)]
    pub home_client_info: Option<ClientTorrentInfo>,
    /// Last target client view.
    #[serde(default)]
    pub target_client_info: Option<ClientTorrentInfo>,
    /// Transfer telemetry.
    #[serde(default)]
    pub telemetry: TransferTelemetry,
    /// Consecutive unclaimed ticks.
    #[serde(default)]
    pub not_found_attempts: u32,
    /// Media manager name.
    #[serde(default)]
    pub media_manager: Option<String>,
    /// Media manager type tag.
    #[serde(default)]
    pub media_manager_kind: Option<MediaManagerKind>,
    /// Reason recorded with `ERROR`.
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Latest transfer history id.
    #[serde(default)]
    pub transfer_id: Option<Uuid>,
    /// Last mutation time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Torrent> for TorrentRecord {
    fn from(torrent: &Torrent) -> Self {
        Self {
            id: torrent.id.clone(),
            name: torrent.name.clone(),
            state: torrent.state(),
            home_client: torrent.home_client.clone(),
            target_client: torrent.target_client.clone(),
            home_client_info: torrent.home_client_info.clone(),
            target_client_info: torrent.target_client_info.clone(),
            telemetry: torrent.telemetry.clone(),
            not_found_attempts: torrent.not_found_attempts,
            media_manager: torrent.media_manager.clone(),
            media_manager_kind: torrent.media_manager_kind,
            failure_reason: torrent.failure_reason.clone(),
            transfer_id: torrent.transfer_id,
            updated_at: Some(torrent.updated_at),
        }
    }
}

/// Rebuild torrents from records, resolving names against the live registries.
///
/// Unknown client names are dropped from the torrent. An unknown manager name
/// falls back to the first registered manager with the same type tag.
#[must_use]
pub fn restore(
    records: Vec<TorrentRecord>,
    clients: &ClientRegistry,
    managers: &ManagerRegistry,
) -> Vec<Torrent> {
    records
        .into_iter()
        .map(|record| restore_one(record, clients, managers))
        .collect()
}

fn restore_one(record: TorrentRecord, clients: &ClientRegistry, managers: &ManagerRegistry) -> Torrent {
    let id = record.id;
    let resolve_client = |name: Option<String>, role: &'static str| {
        name.filter(|name| {
            let known = clients.contains(name);
            if !known {
                warn!(torrent_id = %id, client = %name, role, "dropping unknown client from restored torrent");
            }
            known
        })
    };
    let home_client = resolve_client(record.home_client, "home");
    let target_client = resolve_client(record.target_client, "target");

    let media_manager = match record.media_manager {
        Some(name) if managers.contains(&name) => Some(name),
        other => {
            let fallback = record
                .media_manager_kind
                .and_then(|kind| managers.first_of_kind(kind))
                .map(|manager| manager.name().to_owned());
            if other.is_some() || fallback.is_some() {
                debug!(torrent_id = %id, previous = ?other, resolved = ?fallback, "media manager re-resolved by type");
            }
            fallback
        }
    };

    let mut torrent = Torrent::new(id, record.name).with_state(record.state);
    torrent.home_client = home_client;
    torrent.target_client = target_client;
    torrent.home_client_info = record.home_client_info;
    torrent.target_client_info = record.target_client_info;
    torrent.telemetry = record.telemetry;
    torrent.not_found_attempts = record.not_found_attempts;
    torrent.media_manager = media_manager;
    torrent.media_manager_kind = record.media_manager_kind;
    torrent.failure_reason = record.failure_reason;
    torrent.transfer_id = record.transfer_id;
    if let Some(updated_at) = record.updated_at {
        torrent.updated_at = updated_at;
    }
    torrent
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{DownloadClientAdapter, MediaManagerAdapter};
    use ferry_test_support::{FakeClient, FakeManager};
    use std::sync::Arc;

    fn registries() -> (ClientRegistry, ManagerRegistry) {
        let clients = ClientRegistry::from_entries(vec![
            Arc::new(FakeClient::new("home")) as Arc<dyn DownloadClientAdapter>,
        ]);
        let managers = ManagerRegistry::from_entries(vec![
            Arc::new(FakeManager::new("radarr-4k", MediaManagerKind::Radarr))
                as Arc<dyn MediaManagerAdapter>,
        ]);
        (clients, managers)
    }

    fn record() -> TorrentRecord {
        let mut torrent = Torrent::new(TorrentId::new("abc"), "Movie")
            .with_state(TorrentState::Copying);
        torrent.home_client = Some("home".into());
        torrent.target_client = Some("retired".into());
        torrent.media_manager = Some("radarr".into());
        torrent.media_manager_kind = Some(MediaManagerKind::Radarr);
        TorrentRecord::from(&torrent)
    }

    #[test]
    fn unknown_clients_are_dropped() {
        let (clients, managers) = registries();
        let restored = restore(vec![record()], &clients, &managers);
        assert_eq!(restored[0].home_client.as_deref(), Some("home"));
        assert_eq!(restored[0].target_client, None);
        assert_eq!(restored[0].state(), TorrentState::Copying);
    }

    #[test]
    fn managers_fall_back_to_type_tag() {
        let (clients, managers) = registries();
        let restored = restore(vec![record()], &clients, &managers);
        assert_eq!(restored[0].media_manager.as_deref(), Some("radarr-4k"));

        let mut sonarr = record();
        sonarr.media_manager_kind = Some(MediaManagerKind::Sonarr);
        let restored = restore(vec![sonarr], &clients, &managers);
        assert_eq!(restored[0].media_manager, None);
    }
}
