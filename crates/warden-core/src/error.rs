use thiserror::Error;

/// Failure taxonomy for lock/unlock transactions and enforcement.
///
/// Policy refusals (`NotFound`, `AlreadyLocked`, `Policy`) are distinct from
/// unexpected faults (`Io`, `Store`) so callers can decide whether a retry
/// makes sense.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a regular file: {0}")]
    NotRegularFile(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("already locked: {0}")]
    AlreadyLocked(String),

    #[error("authentication failure")]
    AuthenticationFailure,

    #[error("key custody failure: {0}")]
    KeyCustody(String),

    #[error("process unreachable: pid {0}")]
    ProcessRace(u32),

    #[error("password policy: {0}")]
    Policy(#[from] PolicyViolation),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("record store failure: {0}")]
    Store(String),
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::Store(err.to_string())
    }
}

/// First password-policy rule a candidate password fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("password must be at least {0} characters")]
    TooShort(usize),

    #[error("password must contain an uppercase letter")]
    MissingUppercase,

    #[error("password must contain a lowercase letter")]
    MissingLowercase,

    #[error("password must contain a digit")]
    MissingDigit,

    #[error("password must contain a special character")]
    MissingSpecial,
}

pub type Result<T> = std::result::Result<T, WardenError>;
