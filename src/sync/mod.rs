//! Incremental one-way sync to a peer instance.
//!
//! The worker walks the append-only change log from a persisted watermark,
//! pushes each eligible record over HTTP, and advances the watermark after
//! every record it finishes with. A failed push stops the pass with the
//! watermark still pointing at the failed record, so the next pass resumes
//! there. Each pass re-reads the log from one second before the watermark;
//! the peer upserts, so replaying the overlap is harmless.
//!
//! Deletions are always forwarded for syncable namespaces: the record is
//! gone, so there is nothing left to run the whitelist against, and the
//! peer may hold a copy from before the whitelist narrowed.

pub mod filter;
pub mod transport;

pub use filter::{Namespace, SyncFilter};
pub use transport::{HttpTransport, PushTransport, SyncBody};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use crate::error::PushError;
use crate::models::{ChangeRecord, SyncSettings};
use crate::store::Store;

/// Re-read window below the watermark, covering records that landed in the
/// same clock tick the previous pass ended on.
const CURSOR_SLACK_MS: i64 = 1000;

const DEFAULT_USERNAME: &str = "admin";
const DEFAULT_PASSWORD: &str = "admin";

/// Cooperative stop signal for [`SyncWorker::interval_sync`].
///
/// Cheap to clone; checked at pass boundaries, so an in-flight pass always
/// runs to completion.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pushes local changes to one sync target.
pub struct SyncWorker {
    store: Arc<dyn Store>,
    transport: Arc<dyn PushTransport>,
    username: String,
    password: String,
}

impl SyncWorker {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            store,
            transport,
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
        }
    }

    /// Fallback credentials for re-authentication, usually from the config
    /// file. Credentials stored with the sync settings take precedence.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    /// Run the interval loop until cancelled: sync once, resolve a 401 by
    /// re-authenticating, sleep, repeat. No error ends the loop.
    pub async fn interval_sync(
        &self,
        target: &SyncSettings,
        interval: Duration,
        cancel: &CancelToken,
    ) {
        while !cancel.is_cancelled() {
            if let Err(err) = self.synchronize(target).await {
                match err.downcast_ref::<PushError>() {
                    Some(push) if push.is_unauthorized() => {
                        tracing::info!(url = %target.url, "sync target rejected session, logging in again");
                        self.login(target).await;
                    }
                    _ => tracing::error!(error = %err, url = %target.url, "sync pass failed"),
                }
            }
            if cancel.is_cancelled() {
                break;
            }
            tokio::time::sleep(interval).await;
        }
        tracing::info!(url = %target.url, "sync loop stopped");
    }

    /// One pass over the change log. Propagates the first push failure;
    /// everything before it is already committed to the watermark.
    pub async fn synchronize(&self, target: &SyncSettings) -> Result<()> {
        let last_sync = self.store.sync_cursor().await?.unwrap_or(0);
        let changes = self
            .store
            .changes_since(last_sync - CURSOR_SLACK_MS)
            .await?;
        tracing::debug!(count = changes.len(), last_sync, "processing change log");

        let filter = SyncFilter::new(self.store.as_ref(), &target.config);
        for change in &changes {
            self.dispatch(&filter, target, change).await?;
            self.store.set_sync_cursor(change.timestamp).await?;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        filter: &SyncFilter<'_>,
        target: &SyncSettings,
        change: &ChangeRecord,
    ) -> Result<()> {
        let namespace = match Namespace::parse(&change.namespace) {
            Some(namespace) => namespace,
            None => return Ok(()),
        };

        if change.deleted {
            let body = SyncBody {
                namespace: namespace.as_str().to_string(),
                data: json!({ "_id": change.record_id }),
            };
            self.transport.delete(&target.url, &body).await?;
            return Ok(());
        }

        if let Some(data) = filter.payload(namespace, &change.record_id).await? {
            let body = SyncBody {
                namespace: namespace.as_str().to_string(),
                data,
            };
            self.transport.post(&target.url, &body).await?;
        }
        Ok(())
    }

    /// Authenticate against the target with its stored credentials, falling
    /// back to the worker's own when the settings carry none. A failed
    /// login is logged and swallowed; the next pass will hit 401 and land
    /// here again.
    pub async fn login(&self, target: &SyncSettings) {
        let username = target.username.as_deref().unwrap_or(&self.username);
        let password = target.password.as_deref().unwrap_or(&self.password);
        if let Err(err) = self.transport.login(&target.url, username, password).await {
            tracing::error!(error = %err, url = %target.url, "login to sync target failed");
        }
    }

    /// Run a single pass against the stored settings. Returns `false`
    /// without doing anything when sync is unconfigured or inactive.
    /// Initializes the watermark to 0 on first use.
    pub async fn sync_once(&self) -> Result<bool> {
        let target = match self.active_target().await? {
            Some(target) => target,
            None => return Ok(false),
        };
        self.ensure_cursor().await?;
        self.synchronize(&target).await?;
        Ok(true)
    }

    /// Start the interval loop against the stored settings. Returns
    /// `Ok(false)` immediately when sync is unconfigured or inactive,
    /// `Ok(true)` after the loop is cancelled.
    pub async fn start(&self, interval: Duration, cancel: &CancelToken) -> Result<bool> {
        let target = match self.active_target().await? {
            Some(target) => target,
            None => return Ok(false),
        };
        self.ensure_cursor().await?;
        self.interval_sync(&target, interval, cancel).await;
        Ok(true)
    }

    async fn active_target(&self) -> Result<Option<SyncSettings>> {
        match self.store.sync_settings().await? {
            Some(target) if target.active && !target.url.is_empty() => Ok(Some(target)),
            Some(_) => {
                tracing::info!("sync settings present but inactive");
                Ok(None)
            }
            None => {
                tracing::info!("sync not configured");
                Ok(None)
            }
        }
    }

    async fn ensure_cursor(&self) -> Result<()> {
        if self.store.sync_cursor().await?.is_none() {
            self.store.set_sync_cursor(0).await?;
        }
        Ok(())
    }
}
