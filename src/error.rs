use crate::vsc::model::Status;
use thiserror::Error;

/// Process-level failures. Any of these aborts the whole run, reports
/// critical health and leaves the watermark where it was.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("another run holds the lock: {0}")]
    Locked(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("account page unavailable: {0}")]
    AccountPageUnavailable(String),
    #[error("command `{command}` exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl SyncError {
    pub fn code(&self) -> SyncErrorCode {
        match self {
            Self::Locked(_) => SyncErrorCode::E001Locked,
            Self::InvalidConfig(_) => SyncErrorCode::E002ConfigInvalid,
            Self::AccountPageUnavailable(_) => SyncErrorCode::E003AccountPageUnavailable,
            Self::CommandFailed { .. } => SyncErrorCode::E004CommandFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorCode {
    E001Locked,
    E002ConfigInvalid,
    E003AccountPageUnavailable,
    E004CommandFailed,
    E005Unexpected,
}

impl SyncErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ConfigInvalid => "E002_CONFIG_INVALID",
            Self::E003AccountPageUnavailable => "E003_ACCOUNTPAGE_UNAVAILABLE",
            Self::E004CommandFailed => "E004_COMMAND_FAILED",
            Self::E005Unexpected => "E005_UNEXPECTED",
        }
    }

    /// Best code for an error bubbling out of a command run.
    pub fn of(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<SyncError>())
            .map(SyncError::code)
            .unwrap_or(Self::E005Unexpected)
    }
}

/// Raised when the account page refuses to move an entity to `active`.
#[derive(Debug, Error)]
#[error("status of {kind} {id} is {actual:?} after requesting active")]
pub struct StatusUpdateError {
    pub kind: &'static str,
    pub id: String,
    pub actual: Status,
}
