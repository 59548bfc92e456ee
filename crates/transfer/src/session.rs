use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

/// Which way a session moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upload => "upload",
            Self::Download => "download",
        })
    }
}

/// Lifecycle of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Upload: checking whether the target key already holds the object.
    Probing,
    /// Download: looking for the first variant that holds the object.
    ResolvingVariant,
    Transferring,
    Finalizing,
    Succeeded,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Ephemeral state for one upload or download call.
#[derive(Debug)]
pub struct Session {
    oid: String,
    direction: Direction,
    state: SessionState,
    variant: Option<&'static str>,
    transferred: u64,
    started_at: Instant,
}

impl Session {
    pub fn new(oid: &str, direction: Direction) -> Self {
        Self {
            oid: oid.to_string(),
            direction,
            state: SessionState::Idle,
            variant: None,
            transferred: 0,
            started_at: Instant::now(),
        }
    }

    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn variant(&self) -> Option<&'static str> {
        self.variant
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Moves to `next`. Terminal states are never left.
    pub fn advance(&mut self, next: SessionState) {
        if self.state.is_terminal() {
            return;
        }
        debug!(
            oid = %self.oid,
            direction = %self.direction,
            from = ?self.state,
            to = ?next,
            "session state"
        );
        self.state = next;
    }

    pub fn set_variant(&mut self, variant: &'static str) {
        self.variant = Some(variant);
    }

    pub fn set_transferred(&mut self, bytes: u64) {
        self.transferred = bytes;
    }

    /// Marks the session succeeded.
    pub fn succeed(&mut self) {
        self.advance(SessionState::Succeeded);
    }

    /// Marks the session failed.
    pub fn fail(&mut self, err: &dyn fmt::Display) {
        debug!(oid = %self.oid, direction = %self.direction, error = %err, "session failed");
        self.advance(SessionState::Failed);
    }
}
