//! Error taxonomy shared by the resolver, the assembler and the chat step.
//!
//! Every variant has a stable machine-readable [`kind`](DriveError::kind)
//! code that the HTTP layer copies into its error body. Extraction problems
//! are deliberately absent: a file that cannot be read degrades to inline
//! sentinel text (see [`crate::extract`]) instead of failing the request.

use thiserror::Error;

use crate::remote::RemoteError;

/// Why the storage provider refused a request.
///
/// The two cases carry different end-user advice (sign in again vs. ask for
/// access), so they stay distinguishable all the way to the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The bearer credential was rejected (HTTP 401).
    InvalidToken,
    /// The credential is valid but lacks access to the resource (HTTP 403).
    NoAccess,
}

#[derive(Debug, Error)]
pub enum DriveError {
    /// The caller supplied an address that cannot be resolved.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The file selection is empty or an entry is incomplete.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("{message}")]
    AccessDenied {
        reason: DenialReason,
        message: String,
    },

    #[error("{0}")]
    NotFound(String),

    /// Any other non-2xx response, or a transport failure (`status == None`).
    #[error("{}", remote_fetch_message(.file, .status, .body))]
    RemoteFetch {
        status: Option<u16>,
        body: String,
        /// Name of the selected file whose download failed, if any.
        file: Option<String>,
    },

    /// The language-model call failed.
    #[error("model request failed: {0}")]
    Model(String),
}

fn remote_fetch_message(file: &Option<String>, status: &Option<u16>, body: &str) -> String {
    let status = status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no response".to_string());
    match file {
        Some(name) => format!("fetching {} failed | status: {} | body: {}", name, status, body),
        None => format!("remote request failed | status: {} | body: {}", status, body),
    }
}

impl DriveError {
    /// Stable error code for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            DriveError::MalformedInput(_) => "malformed_input",
            DriveError::InvalidSelection(_) => "invalid_selection",
            DriveError::AccessDenied { .. } => "access_denied",
            DriveError::NotFound(_) => "not_found",
            DriveError::RemoteFetch { .. } => "remote_fetch",
            DriveError::Model(_) => "model_error",
        }
    }

    pub fn invalid_token() -> Self {
        DriveError::AccessDenied {
            reason: DenialReason::InvalidToken,
            message: "Invalid or expired token".to_string(),
        }
    }

    pub fn no_access(message: impl Into<String>) -> Self {
        DriveError::AccessDenied {
            reason: DenialReason::NoAccess,
            message: message.into(),
        }
    }

    /// Maps a storage-client failure into the core taxonomy.
    ///
    /// `not_found` is the message used when the provider answers 404; it
    /// differs per call site ("Folder not found", "Unable to resolve site").
    pub fn from_remote(err: RemoteError, not_found: &str) -> Self {
        match err {
            RemoteError::Unauthorized => DriveError::invalid_token(),
            RemoteError::Forbidden => {
                DriveError::no_access("You do not have permission to access this resource")
            }
            RemoteError::NotFound => DriveError::NotFound(not_found.to_string()),
            RemoteError::Status { status, body } => DriveError::RemoteFetch {
                status: Some(status),
                body,
                file: None,
            },
            RemoteError::Transport(message) => DriveError::RemoteFetch {
                status: None,
                body: message,
                file: None,
            },
        }
    }

    /// Attaches the failing file's name to a fetch error.
    pub fn for_file(self, file_name: &str) -> Self {
        match self {
            DriveError::RemoteFetch { status, body, .. } => DriveError::RemoteFetch {
                status,
                body,
                file: Some(file_name.to_string()),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_and_forbidden_are_distinguishable() {
        let a = DriveError::from_remote(RemoteError::Unauthorized, "x");
        let b = DriveError::from_remote(RemoteError::Forbidden, "x");
        assert_eq!(a.kind(), "access_denied");
        assert_eq!(b.kind(), "access_denied");
        assert!(matches!(
            a,
            DriveError::AccessDenied {
                reason: DenialReason::InvalidToken,
                ..
            }
        ));
        assert!(matches!(
            b,
            DriveError::AccessDenied {
                reason: DenialReason::NoAccess,
                ..
            }
        ));
    }

    #[test]
    fn not_found_uses_call_site_message() {
        let err = DriveError::from_remote(RemoteError::NotFound, "Folder not found");
        assert_eq!(err.to_string(), "Folder not found");
    }

    #[test]
    fn fetch_error_is_tagged_with_file() {
        let err = DriveError::from_remote(
            RemoteError::Status {
                status: 500,
                body: "boom".to_string(),
            },
            "unused",
        )
        .for_file("report.pdf");
        let msg = err.to_string();
        assert!(msg.contains("report.pdf"));
        assert!(msg.contains("500"));
        assert!(msg.contains("boom"));
    }
}
