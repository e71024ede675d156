//! Client-side synchronization: the local store views read from, the synchronizer keeping it
//! in step with a [`SyncChannel`](crate::channel::SyncChannel), and heartbeat-based presence.

pub mod presence;
/// Observable local copy of the session state.
pub mod store;
pub mod sync;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::AppConfig;

pub use self::presence::{HeartbeatTask, PresenceMonitor, PresenceStatus, PresenceWatch};
pub use self::store::{LocalStore, StoreView};
pub use self::sync::Synchronizer;

/// How a client resolves two writers publishing against the same revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Whole-document replace; the last publish wins and may drop a concurrent change.
    #[default]
    Replace,
    /// Each publish names the revision it was based on and is rebased on conflict.
    Versioned,
}

/// Tunables of a [`Synchronizer`] and the presence helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Conflict handling of publishes.
    pub write_policy: WritePolicy,
    /// Period of the Monitor heartbeat.
    pub heartbeat_interval: Duration,
    /// Age after which a heartbeat no longer counts.
    pub staleness_window: Duration,
    /// Retries of a versioned publish that keeps conflicting.
    pub max_rebase_attempts: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        AppConfig::default().sync_options()
    }
}

/// Wall-clock time in epoch milliseconds, the unit of `QuizState::heartbeat`.
pub fn now_millis() -> i64 {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(i64::MAX)
}
