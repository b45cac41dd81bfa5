//! Process lifecycle: `NotStarted -> Started -> Stopped`, nothing else.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::core::error::{CenterError, CenterResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    NotStarted,
    Started,
    Stopped,
}

impl LifecycleState {
    fn as_u8(self) -> u8 {
        match self {
            LifecycleState::NotStarted => 0,
            LifecycleState::Started => 1,
            LifecycleState::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::NotStarted,
            1 => LifecycleState::Started,
            _ => LifecycleState::Stopped,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::NotStarted => "NOT_STARTED",
            LifecycleState::Started => "STARTED",
            LifecycleState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Atomic lifecycle cell shared by the application and its handlers
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::NotStarted.as_u8()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move `from -> to`; fails if the transition is not allowed or the
    /// current state is not `from`
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> CenterResult<()> {
        let allowed = matches!(
            (from, to),
            (LifecycleState::NotStarted, LifecycleState::Started)
                | (LifecycleState::Started, LifecycleState::Stopped)
        );
        if !allowed {
            return Err(CenterError::Lifecycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|current| CenterError::Lifecycle {
                from: LifecycleState::from_u8(current).to_string(),
                to: to.to_string(),
            })
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
