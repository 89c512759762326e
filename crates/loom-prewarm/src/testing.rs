//! Mock thread starter for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::starter::{StartThreadParams, ThreadHandle, ThreadStarter};

/// Permission set used by [`MockThreadStarter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockPermissions {
    /// Agent mode, e.g. `auto` or `full-access`.
    pub mode: String,

    /// Writable workspace roots.
    pub workspace_roots: Vec<String>,
}

impl MockPermissions {
    /// Create a permission set for `mode` with the given writable roots.
    pub fn new<I, R>(mode: impl Into<String>, workspace_roots: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            mode: mode.into(),
            workspace_roots: workspace_roots.into_iter().map(Into::into).collect(),
        }
    }
}

/// Thread returned by [`MockThreadStarter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockThread {
    /// Conversation id, `thread-<n>` in start order.
    pub id: String,

    /// Creation time in seconds since the epoch.
    pub created_at: i64,

    /// Permissions the thread was started under.
    pub permissions: MockPermissions,
}

impl ThreadHandle for MockThread {
    fn conversation_id(&self) -> &str {
        &self.id
    }

    fn created_at_seconds(&self) -> i64 {
        self.created_at
    }
}

/// Thread starter that records requests and hands out numbered threads.
///
/// Threads are named `thread-1`, `thread-2`, ... in call order, failed calls
/// included. Starts can be held open with [`hold`](Self::hold) to exercise
/// races against in-flight starts.
pub struct MockThreadStarter {
    next_id: AtomicUsize,
    created_at: Mutex<Option<i64>>,
    failures: Mutex<VecDeque<String>>,
    request_log: Mutex<Vec<StartThreadParams<MockPermissions>>>,
    gate: watch::Sender<bool>,
}

impl MockThreadStarter {
    /// Create a starter whose threads are created "now".
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            next_id: AtomicUsize::new(0),
            created_at: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
            request_log: Mutex::new(Vec::new()),
            gate,
        }
    }

    /// Stamp every thread with a fixed creation time.
    pub fn with_created_at(self, created_at_seconds: i64) -> Self {
        *self.created_at.lock() = Some(created_at_seconds);
        self
    }

    /// Make the next start call fail with `message`.
    ///
    /// The failure is assigned when the call is made, so held starts fail in
    /// call order.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures.lock().push_back(message.into());
    }

    /// Block starts until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Let held starts finish.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Get all requests made to this starter.
    pub fn requests(&self) -> Vec<StartThreadParams<MockPermissions>> {
        self.request_log.lock().clone()
    }

    /// Get the number of start calls.
    pub fn start_count(&self) -> usize {
        self.request_log.lock().len()
    }
}

impl Default for MockThreadStarter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThreadStarter for MockThreadStarter {
    type Permissions = MockPermissions;
    type Thread = MockThread;

    async fn start_thread(&self, params: StartThreadParams<MockPermissions>) -> Result<MockThread> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.request_log.lock().push(params.clone());

        let failure = self.failures.lock().pop_front();

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|e| Error::ThreadStart(e.to_string()))?;

        if let Some(message) = failure {
            return Err(Error::ThreadStart(message));
        }

        let created_at = *self.created_at.lock();
        let created_at = created_at.unwrap_or_else(|| chrono::Utc::now().timestamp());

        Ok(MockThread {
            id: format!("thread-{n}"),
            created_at,
            permissions: params.permissions,
        })
    }
}
