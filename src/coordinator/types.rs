//! Public types for the persistence engine.

use crate::lifecycle::FlushId;

/// Engine lifecycle state.
///
/// Use [`super::PersistHandle::state()`] to check the current state or
/// [`super::PersistHandle::state_receiver()`] to watch for changes.
///
/// ```text
/// WaitingForDriver → WakingUp → Running → Stopped
///        ↓
///      Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Driver still initializing; nothing is read or written yet
    WaitingForDriver,
    /// Subscribed to the container, hydration read in progress
    WakingUp,
    /// Hydration settled, persisting normally
    Running,
    /// Shut down or stopped through the handle
    Stopped,
    /// The driver never became available
    Failed,
}

impl EngineState {
    /// Whether startup is over, one way or another
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Running | Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WaitingForDriver => write!(f, "WaitingForDriver"),
            Self::WakingUp => write!(f, "WakingUp"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// One delivered change on its way to the driver.
///
/// `previous` is the payload of the job queued just before this one, or the
/// hydrated / initial container value for the first job.
pub(crate) struct FlushJob<T> {
    pub id: FlushId,
    pub payload: T,
    pub previous: T,
}
