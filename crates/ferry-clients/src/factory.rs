//! Adapter construction keyed by the configured type tag.

use std::sync::Arc;
use std::time::Duration;

use ferry_config::{DownloadClientConfig, MediaManagerConfig};
use ferry_core::{
    ClientError, ClientResult, DownloadClientAdapter, ManagerError, ManagerResult,
    MediaManagerAdapter, MediaManagerKind,
};

use crate::arr::ArrClient;
use crate::deluge::DelugeClient;

/// Build the download client described by `config`.
///
/// # Errors
///
/// Returns [`ClientError::UnsupportedType`] for unknown type tags.
pub fn build_download_client(
    config: &DownloadClientConfig,
    timeout: Duration,
) -> ClientResult<Arc<dyn DownloadClientAdapter>> {
    match config.kind.to_ascii_lowercase().as_str() {
        "deluge" => Ok(Arc::new(DelugeClient::new(
            config.name.clone(),
            &config.base_url(),
            config.password.clone(),
            timeout,
        )?)),
        _ => Err(ClientError::UnsupportedType {
            kind: config.kind.clone(),
        }),
    }
}

/// Build the media manager described by `config`.
///
/// # Errors
///
/// Returns [`ManagerError::UnsupportedType`] for unknown type tags.
pub fn build_media_manager(
    config: &MediaManagerConfig,
    timeout: Duration,
) -> ManagerResult<Arc<dyn MediaManagerAdapter>> {
    let kind = MediaManagerKind::parse(&config.kind).ok_or_else(|| ManagerError::UnsupportedType {
        kind: config.kind.clone(),
    })?;
    Ok(Arc::new(ArrClient::new(
        config.name.clone(),
        kind,
        &config.url,
        config.api_key.clone(),
        timeout,
    )?))
}
