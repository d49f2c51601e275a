use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "accountkey=",
    "storagekey",
    "/destkey:",
    "password",
    "client_secret",
    "sig=",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for the terminal.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Auth ──────────────────────────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    // ── API ───────────────────────────────────────────────────────────────────
    #[error("Azure error: {0}")]
    AzureError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Per-archive ───────────────────────────────────────────────────────────
    #[error("Import of {archive} could not be started: {message}")]
    SubmissionFailed { archive: String, message: String },

    #[error("Status query for {handle} failed: {message}")]
    StatusQueryFailed { handle: String, message: String },

    // ── Batch ─────────────────────────────────────────────────────────────────
    #[error("{}", batch_failure_summary(*failed_imports, *missing_databases, *unresolved))]
    BatchFailed {
        failed_imports: usize,
        missing_databases: usize,
        unresolved: usize,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Upload ────────────────────────────────────────────────────────────────
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Builds the batch failure message, naming every non-zero count.
fn batch_failure_summary(failed_imports: usize, missing_databases: usize, unresolved: usize) -> String {
    let mut parts = Vec::new();
    if failed_imports > 0 {
        parts.push(format!("{} import(s) failed", failed_imports));
    }
    if missing_databases > 0 {
        parts.push(format!("{} database(s) missing", missing_databases));
    }
    if unresolved > 0 {
        parts.push(format!("{} import(s) still in progress", unresolved));
    }
    if parts.is_empty() {
        "Batch failed".to_string()
    } else {
        format!("Batch failed: {}", parts.join(", "))
    }
}

impl AppError {
    /// Converts the error into a user-friendly presentation for the terminal.
    /// Never leaks storage keys, passwords or tokens.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Auth ──────────────────────────────────────────────────────────
            AppError::NotAuthenticated => ErrorPresentation {
                title: "Not Logged In".into(),
                message: "No Azure credentials were available for this run.".into(),
                action: Some("Log in with a service principal or supply an access token".into()),
            },

            AppError::AuthFailed(_) => ErrorPresentation {
                title: "Login Failed".into(),
                message: "Azure rejected the supplied credentials.".into(),
                action: Some("Check the tenant, client id and secret, then log in again".into()),
            },

            // ── API ───────────────────────────────────────────────────────────
            AppError::AzureError(msg) => ErrorPresentation {
                title: "Azure Error".into(),
                message: sanitize_message(msg, "An Azure error occurred."),
                action: None,
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("Azure is throttling requests. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            AppError::NotFound(msg) => ErrorPresentation {
                title: "Not Found".into(),
                message: sanitize_message(msg, "A required Azure resource was not found."),
                action: Some("Check the subscription, resource group and resource names".into()),
            },

            // ── Per-archive ───────────────────────────────────────────────────
            AppError::SubmissionFailed { archive, message } => ErrorPresentation {
                title: "Import Not Started".into(),
                message: format!(
                    "{}: {}",
                    archive,
                    sanitize_message(message, "the import request was rejected.")
                ),
                action: None,
            },

            AppError::StatusQueryFailed { message, .. } => ErrorPresentation {
                title: "Status Unavailable".into(),
                message: sanitize_message(message, "The import status could not be read."),
                action: None,
            },

            // ── Batch ─────────────────────────────────────────────────────────
            AppError::BatchFailed { .. } => ErrorPresentation {
                title: "Migration Failed".into(),
                message: self.to_string(),
                action: Some("Review the failure report above and re-run the affected archives".into()),
            },

            AppError::Cancelled => ErrorPresentation {
                title: "Cancelled".into(),
                message: "The migration was cancelled. Submitted imports keep running in Azure.".into(),
                action: None,
            },

            // ── Upload ────────────────────────────────────────────────────────
            AppError::UploadFailed(msg) => ErrorPresentation {
                title: "Upload Failed".into(),
                message: sanitize_message(msg, "The bulk copy tool reported an error."),
                action: Some("Check the AzCopy path and storage account, or use --skip-upload".into()),
            },

            // ── Configuration ─────────────────────────────────────────────────
            AppError::InvalidConfig(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: sanitize_message(msg, "The supplied options are invalid."),
                action: Some("Run with --help to see the available options".into()),
            },

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not connect to Azure. Please check your network connection.".into(),
                action: Some("Check network and retry".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}
