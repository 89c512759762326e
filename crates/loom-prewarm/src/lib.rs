//! Prewarmed conversation threads for Loom.
//!
//! Starting an agent thread is slow, so Loom starts one speculatively as
//! soon as a working directory is opened and hands it to the first real
//! conversation. This crate provides:
//! - A single-flight cache holding at most one prewarmed thread per working
//!   directory
//! - Permission signatures so a thread started under one agent mode is never
//!   reused under another
//! - A fixed freshness window after which a parked thread is discarded
//! - A manager tying the cache to a pluggable [`ThreadStarter`]
//!
//! # Example
//!
//! ```rust,ignore
//! use loom_prewarm::{ConversationRequest, PrewarmConfig, PrewarmManager};
//!
//! let manager = PrewarmManager::new(starter, PrewarmConfig::default());
//!
//! // When the user opens a project
//! manager.spawn_prewarm(ConversationRequest::new(cwd, permissions.clone()));
//!
//! // When the user sends their first message
//! let thread = manager
//!     .start_conversation(ConversationRequest::new(cwd, permissions))
//!     .await?;
//! ```

mod cache;
mod config;
mod error;
mod freshness;
mod manager;
mod signature;
mod starter;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{CacheEntry, CacheStats, EntryId, PendingThread, PrewarmCache};
pub use config::PrewarmConfig;
pub use error::{Error, Result};
pub use freshness::{Clock, ManualClock, PREWARM_TTL_SECS, SystemClock, is_fresh};
pub use manager::{ConversationRequest, PrewarmManager};
pub use signature::{FALLBACK_SIGNATURE, Signature};
pub use starter::{StartThreadParams, ThreadHandle, ThreadPurpose, ThreadStarter};
