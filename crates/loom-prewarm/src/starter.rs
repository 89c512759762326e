//! Thread starter abstraction.
//!
//! This module defines the traits that decouple the prewarm cache from the
//! subsystem that actually executes conversation threads. The
//! [`ThreadStarter`] trait uses associated types so callers can plug in their
//! own permission model and thread handle without the cache inspecting
//! either beyond what [`ThreadHandle`] exposes.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{Span, info_span};

use crate::error::Result;

/// Why a thread is being started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPurpose {
    /// Speculative start ahead of the user's first message.
    Prewarm,
    /// User-visible conversation start.
    Start,
}

impl ThreadPurpose {
    /// Span wrapping a start call for `cwd`.
    pub fn span(self, cwd: &str) -> Span {
        match self {
            Self::Prewarm => info_span!("prewarm_conversation", cwd = %cwd),
            Self::Start => info_span!("start_conversation", cwd = %cwd),
        }
    }
}

/// Parameters passed to [`ThreadStarter::start_thread`].
#[derive(Debug, Clone)]
pub struct StartThreadParams<P> {
    /// Why the thread is being started.
    pub purpose: ThreadPurpose,

    /// Model requested by the collaboration mode, if any.
    pub model: Option<String>,

    /// Working directory the thread runs in.
    pub cwd: String,

    /// Resolved permissions the thread runs under.
    pub permissions: P,
}

/// A started thread as reported by the thread starter.
pub trait ThreadHandle: Clone + Send + Sync + 'static {
    /// Conversation identifier of the thread.
    fn conversation_id(&self) -> &str;

    /// When the thread was created, in seconds since the epoch.
    fn created_at_seconds(&self) -> i64;
}

/// Trait for thread-starting backends.
///
/// Implement this trait to connect the prewarm manager to whatever actually
/// creates conversation threads. The manager calls it once per prewarm and
/// once per conversation start that could not be served from the cache.
#[async_trait]
pub trait ThreadStarter: Send + Sync + 'static {
    /// Resolved permission set a thread runs under.
    ///
    /// Its serialized form is the thread's signature, so every field that
    /// affects thread behavior must be serialized.
    type Permissions: Serialize + Clone + Send + Sync + 'static;

    /// Handle to a started thread.
    type Thread: ThreadHandle;

    /// Start a new thread.
    async fn start_thread(
        &self,
        params: StartThreadParams<Self::Permissions>,
    ) -> Result<Self::Thread>;
}
