//! etcd client implementation
//!
//! Contains the primary interface [`Client`], which combines:
//! - Unary key-value, lease and cluster calls through a [`KvTransport`]
//! - Multiplexed watches through a shared [`WatchManager`]
//!
//! Connection state lives behind an `ArcSwap` so that
//! [`refresh`](Client::refresh) can reconnect without invalidating clones.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;
use tracing::warn;

use super::ClientBuilder;
use crate::transport::GrpcTransport;
use crate::transport::KvTransport;
use crate::transport::WatchTransport;
use crate::ClientConfig;
use crate::Result;
use crate::WatchManager;

/// Main entry point for interacting with an etcd cluster
///
/// Cheap to clone; every clone shares the same connection and watch manager.
///
/// Created through the [`builder()`](Client::builder) method
#[derive(Clone)]
pub struct Client {
    pub(super) inner: Arc<ArcSwap<ClientInner>>,
}

pub(crate) struct ClientInner {
    pub(super) kv: Arc<dyn KvTransport>,
    pub(super) watch: WatchManager,
    pub(super) config: ClientConfig,
    pub(super) endpoints: Vec<String>,
}

impl std::fmt::Debug for Client {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let inner = self.inner.load();
        f.debug_struct("Client")
            .field("endpoints", &inner.endpoints)
            .field("watch", &inner.watch)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a configured client builder
    ///
    /// Starts client construction process with specified bootstrap endpoints.
    /// Chain configuration methods before calling
    /// [`build()`](ClientBuilder::build).
    ///
    /// # Arguments
    /// * `endpoints` - Cluster client URLs, e.g. `http://127.0.0.1:2379`
    ///
    /// # Panics
    /// Will panic if no endpoints are provided
    pub fn builder(endpoints: Vec<String>) -> ClientBuilder {
        assert!(!endpoints.is_empty(), "At least one endpoint required");
        ClientBuilder::new(endpoints)
    }

    /// Assemble a client from already connected transports
    pub(crate) fn from_parts(
        kv: Arc<dyn KvTransport>,
        watch_transport: Arc<dyn WatchTransport>,
        config: ClientConfig,
        endpoints: Vec<String>,
    ) -> Self {
        let watch = WatchManager::new(watch_transport, config.watch.clone());
        Self {
            inner: Arc::new(ArcSwap::from_pointee(ClientInner {
                kv,
                watch,
                config,
                endpoints,
            })),
        }
    }

    pub(super) fn kv(&self) -> Arc<dyn KvTransport> {
        self.inner.load().kv.clone()
    }

    /// The watch manager backing every watch of this client
    pub fn watch_manager(&self) -> WatchManager {
        self.inner.load().watch.clone()
    }

    /// Endpoints used by the most recent (re)connect
    pub fn endpoints(&self) -> Vec<String> {
        self.inner.load().endpoints.clone()
    }

    /// Reconnect, optionally to a different set of endpoints
    ///
    /// Unary calls switch to the new connection immediately. A healthy watch
    /// manager keeps running (it heals its own stream); one that has failed or
    /// been shut down is replaced by a fresh manager on the new connection.
    pub async fn refresh(
        &self,
        new_endpoints: Option<Vec<String>>,
    ) -> Result<()> {
        let old_inner = self.inner.load_full();
        let config = old_inner.config.clone();
        let endpoints = new_endpoints.unwrap_or_else(|| old_inner.endpoints.clone());

        let transport = Arc::new(GrpcTransport::connect(&endpoints, &config.network).await?);

        let watch = if old_inner.watch.state().is_usable() {
            old_inner.watch.clone()
        } else {
            warn!(state = ?old_inner.watch.state(), "replacing unusable watch manager");
            WatchManager::new(transport.clone(), config.watch.clone())
        };

        info!(endpoint = %transport.endpoint(), "client refreshed");
        self.inner.store(Arc::new(ClientInner {
            kv: transport,
            watch,
            config,
            endpoints,
        }));
        Ok(())
    }

    /// Stop the watch manager. Every live watch ends with
    /// [`WatchError::ManagerClosed`](crate::WatchError::ManagerClosed).
    pub fn close(&self) {
        self.inner.load().watch.shutdown();
    }
}
