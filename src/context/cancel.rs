//! Hierarchical cancellation tokens

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Run-level execution status seen through a token
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[default]
    Running,
    /// Finish the current case, start nothing new
    StopRequested,
    /// Abandon in-flight work as well
    AbortRequested,
}

impl ExecutionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExecutionStatus::Running,
            1 => ExecutionStatus::StopRequested,
            _ => ExecutionStatus::AbortRequested,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "Running"),
            ExecutionStatus::StopRequested => write!(f, "StopRequested"),
            ExecutionStatus::AbortRequested => write!(f, "AbortRequested"),
        }
    }
}

#[derive(Debug, Default)]
struct TokenState {
    status: AtomicU8,
    parent: Option<CancelToken>,
}

/// Cancellation token; children observe their ancestors' requests
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled by this one but able to be cancelled on its own
    pub fn child(&self) -> Self {
        Self {
            state: Arc::new(TokenState {
                status: AtomicU8::new(0),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Effective status, the strongest request along the chain
    pub fn status(&self) -> ExecutionStatus {
        let own = ExecutionStatus::from_u8(self.state.status.load(Ordering::SeqCst));
        match &self.state.parent {
            Some(parent) => own.max(parent.status()),
            None => own,
        }
    }

    pub fn request_stop(&self) {
        self.raise(ExecutionStatus::StopRequested);
    }

    pub fn request_abort(&self) {
        self.raise(ExecutionStatus::AbortRequested);
    }

    /// Request stop, or abort when `force` is set
    pub fn cancel(&self, force: bool) {
        if force {
            self.request_abort();
        } else {
            self.request_stop();
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.status() != ExecutionStatus::Running
    }

    pub fn is_abort_requested(&self) -> bool {
        self.status() == ExecutionStatus::AbortRequested
    }

    fn raise(&self, status: ExecutionStatus) {
        self.state.status.fetch_max(status as u8, Ordering::SeqCst);
    }
}
