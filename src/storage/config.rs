//! Configuration for project storage backends

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};
use crate::orchestrator::Orchestrator;
use crate::storage::asset_service::RemoteAssetBackend;
use crate::storage::local_store::LocalFileBackend;
use crate::storage::mock_store::MockBackend;
use crate::storage::{BackendFlags, StorageBackend};
use crate::wire::project::ProjectService;

/// Which backends a session registers, in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendLayout {
    /// Remote asset service as primary, local directory tree as primary_fs mirror
    #[default]
    RemoteWithLocalMirror,
    /// Remote asset service only
    Remote,
    /// Local directory tree only
    Local,
    /// In-memory backend
    Mock,
}

impl std::str::FromStr for BackendLayout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote+local" | "remote_with_local_mirror" | "default" => Ok(BackendLayout::RemoteWithLocalMirror),
            "remote" | "asset" | "asset-service" => Ok(BackendLayout::Remote),
            "local" | "fs" => Ok(BackendLayout::Local),
            "mock" => Ok(BackendLayout::Mock),
            _ => Err(format!("Unknown storage layout: {}", s)),
        }
    }
}

impl BackendLayout {
    /// Layout from the `STORAGE_LAYOUT` environment variable
    pub fn from_env() -> Self {
        match env::var("STORAGE_LAYOUT") {
            Ok(layout_str) => match layout_str.parse::<BackendLayout>() {
                Ok(layout) => {
                    info!("Using storage layout from environment: {:?}", layout);
                    layout
                }
                Err(e) => {
                    warn!("Invalid storage layout in environment: {}. Using default.", e);
                    BackendLayout::default()
                }
            },
            Err(_) => {
                info!("No storage layout specified in environment, using default");
                BackendLayout::default()
            }
        }
    }

    pub fn needs_remote(&self) -> bool {
        matches!(self, BackendLayout::RemoteWithLocalMirror | BackendLayout::Remote)
    }
}

/// Collaborators of the remote asset backend
#[derive(Clone)]
pub struct RemoteDeps {
    pub orchestrator: Arc<Orchestrator>,
    pub asset_endpoint: Endpoint,
    pub projects: Arc<dyn ProjectService>,
}

/// Create the backends of a layout, primary first
pub fn create_backends(
    layout: BackendLayout,
    config: &StorageConfig,
    remote: Option<RemoteDeps>,
) -> Result<Vec<Arc<dyn StorageBackend>>> {
    let remote_backend = |flags: BackendFlags| -> Result<Arc<dyn StorageBackend>> {
        let deps = remote.clone().ok_or_else(|| {
            ClientError::Config(format!("storage layout {:?} needs the remote services", layout))
        })?;
        Ok(Arc::new(RemoteAssetBackend::new(
            deps.orchestrator,
            deps.asset_endpoint,
            deps.projects,
            flags,
        )))
    };
    let local_backend = |flags: BackendFlags| -> Arc<dyn StorageBackend> {
        Arc::new(LocalFileBackend::new(&config.projects_root, flags))
    };

    let backends = match layout {
        BackendLayout::RemoteWithLocalMirror => vec![
            remote_backend(BackendFlags::new(true, false))?,
            local_backend(BackendFlags::new(false, true)),
        ],
        BackendLayout::Remote => vec![remote_backend(BackendFlags::new(true, true))?],
        BackendLayout::Local => vec![local_backend(BackendFlags::new(true, true))],
        BackendLayout::Mock => {
            vec![Arc::new(MockBackend::new("mock", BackendFlags::new(true, true))) as Arc<dyn StorageBackend>]
        }
    };
    info!(
        "Storage layout {:?}: {}",
        layout,
        backends.iter().map(|b| b.name()).collect::<Vec<_>>().join(", ")
    );
    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_layout_from_str() {
        assert_eq!("remote+local".parse::<BackendLayout>().unwrap(), BackendLayout::RemoteWithLocalMirror);
        assert_eq!("REMOTE".parse::<BackendLayout>().unwrap(), BackendLayout::Remote);
        assert_eq!("local".parse::<BackendLayout>().unwrap(), BackendLayout::Local);
        assert_eq!("fs".parse::<BackendLayout>().unwrap(), BackendLayout::Local);
        assert_eq!("Mock".parse::<BackendLayout>().unwrap(), BackendLayout::Mock);
        assert!("sqlite".parse::<BackendLayout>().is_err());
    }

    #[test]
    #[serial]
    fn test_layout_from_env() {
        env::set_var("STORAGE_LAYOUT", "local");
        assert_eq!(BackendLayout::from_env(), BackendLayout::Local);
        env::set_var("STORAGE_LAYOUT", "bogus");
        assert_eq!(BackendLayout::from_env(), BackendLayout::RemoteWithLocalMirror);
        env::remove_var("STORAGE_LAYOUT");
        assert_eq!(BackendLayout::from_env(), BackendLayout::RemoteWithLocalMirror);
    }

    #[test]
    fn test_remote_layout_requires_services() {
        let config = StorageConfig::default();
        let err = create_backends(BackendLayout::RemoteWithLocalMirror, &config, None).err().unwrap();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_local_and_mock_layouts_hold_both_roles() {
        let config = StorageConfig::default();
        for layout in [BackendLayout::Local, BackendLayout::Mock] {
            let backends = create_backends(layout, &config, None).unwrap();
            assert_eq!(backends.len(), 1);
            assert_eq!(backends[0].flags(), BackendFlags::new(true, true));
        }
    }
}
