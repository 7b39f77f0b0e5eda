use thiserror::Error;

use crate::models::AccountStatus;

/// Error taxonomy of the session core.
///
/// Login failures never propagate out of the session manager as errors;
/// they are converted into a persisted [`AccountStatus`] that callers
/// observe through the reactive account stream.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level connect failure: DNS, refused, timed out.
    #[error("endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    /// Any other connect/login failure. Deliberately coarse: TLS and
    /// protocol errors classify here as well.
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// `get_connection` was called with no live session. Callers must not
    /// retry without a prior successful login.
    #[error("no active session")]
    NoActiveSession,

    /// In-band account registration is not implemented.
    #[error("account registration is not supported")]
    Unsupported,
}

impl Error {
    /// The account status a failed login attempt persists.
    pub fn account_status(&self) -> AccountStatus {
        match self {
            Error::EndpointUnreachable(_) => AccountStatus::ServerNotFound,
            _ => AccountStatus::Unauthorized,
        }
    }
}
