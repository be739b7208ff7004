//! Lifecycle status enums for jobs and agent runs.
//!
//! Both enums serialize as their snake_case wire names and expose the
//! transition table the job/run managers enforce.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Wire name of the status.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $wire ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $wire => Ok(Self::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        concat!("Unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

define_status_enum! {
    /// Generation job status.
    JobStatus {
        Queued => "queued",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Canceled => "canceled",
    }
}

define_status_enum! {
    /// Agent run status. `Reverted` is reachable from any finished state.
    RunStatus {
        Queued => "queued",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Canceled => "canceled",
        Reverted => "reverted",
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Queued, Self::Canceled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Canceled)
        )
    }
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Reverted
        )
    }

    /// Finished, but not yet reverted.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running | Self::Failed | Self::Canceled) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Canceled) => true,
            (from, Self::Reverted) => from.is_finished(),
            _ => false,
        }
    }
}

/// Reject an illegal transition with an internal error naming both states.
pub fn ensure_job_transition(from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::Internal(format!(
            "Illegal job transition {from} -> {to}"
        )))
    }
}

/// Run counterpart of [`ensure_job_transition`].
pub fn ensure_run_transition(from: RunStatus, to: RunStatus) -> Result<(), CoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::Internal(format!(
            "Illegal run transition {from} -> {to}"
        )))
    }
}
