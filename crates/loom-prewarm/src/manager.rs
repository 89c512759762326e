//! Prewarm manager: speculative thread starts and conversation starts.
//!
//! The manager ties a [`ThreadStarter`] to a [`PrewarmCache`]:
//!
//! - [`prewarm_conversation`](PrewarmManager::prewarm_conversation) starts a
//!   thread ahead of need and parks it in the cache under the signature of
//!   its permissions.
//! - [`start_conversation`](PrewarmManager::start_conversation) takes the
//!   parked thread if it was started under the same permissions, and starts
//!   a fresh one otherwise.
//!
//! Prewarm failures are logged and swallowed; the only cost is that the next
//! conversation start pays the full startup latency.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, trace, warn};

use crate::cache::{PendingThread, PrewarmCache};
use crate::config::PrewarmConfig;
use crate::error::Result;
use crate::signature::Signature;
use crate::starter::{StartThreadParams, ThreadHandle, ThreadPurpose, ThreadStarter};

/// A request to prewarm or start a conversation.
#[derive(Debug, Clone)]
pub struct ConversationRequest<P> {
    /// Working directory the conversation runs in.
    pub cwd: String,

    /// Model requested by the collaboration mode, if any.
    pub model: Option<String>,

    /// Resolved permissions for the conversation.
    pub permissions: P,
}

impl<P> ConversationRequest<P> {
    /// Create a request with no model override.
    pub fn new(cwd: impl Into<String>, permissions: P) -> Self {
        Self {
            cwd: cwd.into(),
            model: None,
            permissions,
        }
    }

    /// Set the requested model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn into_params(self, purpose: ThreadPurpose) -> StartThreadParams<P> {
        StartThreadParams {
            purpose,
            model: self.model,
            cwd: self.cwd,
            permissions: self.permissions,
        }
    }
}

/// Coordinates speculative and real conversation starts.
pub struct PrewarmManager<S: ThreadStarter> {
    starter: Arc<S>,
    cache: PrewarmCache<S::Thread>,
    config: PrewarmConfig,
}

impl<S: ThreadStarter> PrewarmManager<S> {
    /// Create a manager with its own cache.
    pub fn new(starter: Arc<S>, config: PrewarmConfig) -> Self {
        Self::with_cache(starter, PrewarmCache::new(), config)
    }

    /// Create a manager around an existing cache.
    pub fn with_cache(
        starter: Arc<S>,
        cache: PrewarmCache<S::Thread>,
        config: PrewarmConfig,
    ) -> Self {
        Self {
            starter,
            cache,
            config,
        }
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &PrewarmConfig {
        &self.config
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &PrewarmCache<S::Thread> {
        &self.cache
    }

    /// Get the thread starter.
    pub fn starter(&self) -> &Arc<S> {
        &self.starter
    }

    /// Start a thread for `request.cwd` ahead of need.
    ///
    /// Does nothing if prewarming is disabled or a thread usable under the
    /// same permissions is already parked or starting. Otherwise the start is
    /// reserved in the cache and awaited; on success its id and creation time
    /// are recorded, on failure the reservation is dropped.
    ///
    /// Returns the started thread, or `None` when nothing was started or the
    /// start failed.
    pub async fn prewarm_conversation(
        &self,
        request: ConversationRequest<S::Permissions>,
    ) -> Option<S::Thread> {
        if !self.config.enabled {
            trace!(cwd = %request.cwd, "Prewarming disabled, skipping");
            return None;
        }

        let cwd = request.cwd.clone();
        let signature = Signature::of(&request.permissions);
        if self.cache.has_valid(&cwd, Some(&signature)) {
            trace!(cwd = %cwd, "Prewarmed thread already available");
            return None;
        }

        let starter = Arc::clone(&self.starter);
        let params = request.into_params(ThreadPurpose::Prewarm);
        let span = ThreadPurpose::Prewarm.span(&cwd);
        let pending = PendingThread::spawn(
            async move { starter.start_thread(params).await }.instrument(span),
        );
        let id = self.cache.reserve(&cwd, pending.clone(), signature);

        match pending.wait().await {
            Ok(thread) => {
                debug!(
                    cwd = %cwd,
                    conversation_id = %thread.conversation_id(),
                    "Conversation prewarmed"
                );
                self.cache.update_entry_metadata(
                    &cwd,
                    id,
                    thread.conversation_id(),
                    thread.created_at_seconds(),
                );
                Some(thread)
            }
            Err(e) => {
                warn!(cwd = %cwd, error = %e, "Failed to prewarm conversation");
                self.cache.clear_entry(&cwd, id);
                None
            }
        }
    }

    /// Start a conversation, using the prewarmed thread when it fits.
    ///
    /// The parked thread is only used if it was started under exactly the
    /// permissions in `request`. Otherwise a new thread is started directly;
    /// errors from that start are returned to the caller.
    pub async fn start_conversation(
        &self,
        request: ConversationRequest<S::Permissions>,
    ) -> Result<S::Thread> {
        if self.config.enabled {
            let signature = Signature::of(&request.permissions);
            if let Some(thread) = self.cache.consume(&request.cwd, Some(&signature)).await {
                debug!(
                    cwd = %request.cwd,
                    conversation_id = %thread.conversation_id(),
                    "Using prewarmed thread"
                );
                return Ok(thread);
            }
        }

        let span = ThreadPurpose::Start.span(&request.cwd);
        let params = request.into_params(ThreadPurpose::Start);
        self.starter.start_thread(params).instrument(span).await
    }

    /// Whether `conversation_id` is a prewarmed thread still held by the cache.
    pub fn is_prewarmed_conversation(&self, conversation_id: &str) -> bool {
        self.cache.is_tracked_conversation(conversation_id)
    }

    /// Run [`prewarm_conversation`](Self::prewarm_conversation) as a detached task.
    pub fn spawn_prewarm(
        &self,
        request: ConversationRequest<S::Permissions>,
    ) -> JoinHandle<Option<S::Thread>> {
        let manager = self.clone();
        tokio::spawn(async move { manager.prewarm_conversation(request).await })
    }
}

impl<S: ThreadStarter> Clone for PrewarmManager<S> {
    fn clone(&self) -> Self {
        Self {
            starter: Arc::clone(&self.starter),
            cache: self.cache.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPermissions, MockThreadStarter};

    fn manager() -> (PrewarmManager<MockThreadStarter>, Arc<MockThreadStarter>) {
        let starter = Arc::new(MockThreadStarter::new());
        (
            PrewarmManager::new(Arc::clone(&starter), PrewarmConfig::default()),
            starter,
        )
    }

    fn request(mode: &str) -> ConversationRequest<MockPermissions> {
        ConversationRequest::new("/proj", MockPermissions::new(mode, ["/proj"]))
    }

    #[tokio::test]
    async fn test_prewarm_then_start_reuses_thread() {
        let (manager, starter) = manager();

        let prewarmed = manager.prewarm_conversation(request("auto")).await.unwrap();
        assert!(manager.is_prewarmed_conversation(&prewarmed.id));

        let started = manager.start_conversation(request("auto")).await.unwrap();
        assert_eq!(started, prewarmed);
        assert_eq!(starter.start_count(), 1);
        assert!(!manager.is_prewarmed_conversation(&prewarmed.id));
    }

    #[tokio::test]
    async fn test_prewarm_skips_when_valid_entry_exists() {
        let (manager, starter) = manager();

        assert!(manager.prewarm_conversation(request("auto")).await.is_some());
        assert!(manager.prewarm_conversation(request("auto")).await.is_none());
        assert_eq!(starter.start_count(), 1);
    }

    #[tokio::test]
    async fn test_mode_switch_does_not_reuse_thread() {
        let (manager, starter) = manager();

        let prewarmed = manager.prewarm_conversation(request("auto")).await.unwrap();
        let started = manager
            .start_conversation(request("full-access"))
            .await
            .unwrap();

        assert_ne!(started.id, prewarmed.id);
        assert_eq!(starter.start_count(), 2);
        assert!(manager.cache().is_empty());

        let requests = starter.requests();
        assert_eq!(requests[1].purpose, ThreadPurpose::Start);
        assert_eq!(requests[1].permissions.mode, "full-access");
    }

    #[tokio::test]
    async fn test_prewarm_under_new_mode_replaces_entry() {
        let (manager, starter) = manager();

        manager.prewarm_conversation(request("auto")).await.unwrap();
        let second = manager
            .prewarm_conversation(request("full-access"))
            .await
            .unwrap();
        assert_eq!(starter.start_count(), 2);

        let started = manager
            .start_conversation(request("full-access"))
            .await
            .unwrap();
        assert_eq!(started, second);
    }

    #[tokio::test]
    async fn test_prewarm_failure_clears_entry() {
        let (manager, starter) = manager();
        starter.fail_next("backend unavailable");

        assert!(manager.prewarm_conversation(request("auto")).await.is_none());
        assert!(manager.cache().is_empty());

        let started = manager.start_conversation(request("auto")).await.unwrap();
        assert_eq!(started.id, "thread-2");
    }

    #[tokio::test]
    async fn test_start_failure_is_returned() {
        let (manager, starter) = manager();
        starter.fail_next("backend unavailable");

        let err = manager.start_conversation(request("auto")).await.unwrap_err();
        assert!(err.to_string().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_disabled_prewarm_is_noop() {
        let starter = Arc::new(MockThreadStarter::new());
        let manager = PrewarmManager::new(
            Arc::clone(&starter),
            PrewarmConfig::new().with_enabled(false),
        );

        assert!(manager.prewarm_conversation(request("auto")).await.is_none());
        assert_eq!(starter.start_count(), 0);

        manager.start_conversation(request("auto")).await.unwrap();
        assert_eq!(starter.start_count(), 1);
    }

    #[tokio::test]
    async fn test_model_and_purpose_forwarded() {
        let (manager, starter) = manager();

        manager
            .prewarm_conversation(request("auto").with_model("gpt-5"))
            .await
            .unwrap();

        let requests = starter.requests();
        assert_eq!(requests[0].purpose, ThreadPurpose::Prewarm);
        assert_eq!(requests[0].model.as_deref(), Some("gpt-5"));
        assert_eq!(requests[0].cwd, "/proj");
    }
}
