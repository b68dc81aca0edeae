//! Domain error taxonomy shared by every layer: config loading, the cloud
//! API client, the SSH executor, the task engine, and the HTTP façade.
use thiserror::Error;

/// The kinds of failure that are allowed to leak their message past the
/// task envelope / HTTP boundary. Anything else collapses to `Opaque`.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    CloudApi(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Ambiguity(String),

    #[error("An unexpected error occurred, please try again later")]
    Opaque,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ControlPlaneError {
    /// Whether this error's `Display` message may be shown to a caller
    /// verbatim (as opposed to folding to the stock opaque message).
    pub fn is_domain(&self) -> bool {
        !matches!(self, ControlPlaneError::Opaque | ControlPlaneError::Io(_))
    }

    /// The message to surface at a task envelope or HTTP boundary: the
    /// real message for domain errors, the stock string for everything else.
    pub fn public_message(&self) -> String {
        if self.is_domain() {
            self.to_string()
        } else {
            "An unexpected error occurred, please try again later".to_string()
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_message() {
        let e = ControlPlaneError::NotFound("server does not exist".into());
        assert_eq!(e.public_message(), "server does not exist");
    }

    #[test]
    fn io_errors_are_masked() {
        let e = ControlPlaneError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(
            e.public_message(),
            "An unexpected error occurred, please try again later"
        );
    }
}
