use miette::Diagnostic;
use thiserror::Error;

use crate::batch::BatchAction;
use crate::vm::Status;

#[derive(Debug, Error, Diagnostic)]
pub enum GceError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    /// Name given on the command line has no entry in the config file.
    #[error("VM {name} not found")]
    UnknownVm { name: String },

    #[error("VM {name}: not found")]
    NotFound { name: String },

    #[error("VM {name}: failed to find: {source}")]
    FindFailed {
        name: String,
        source: Box<GceError>,
    },

    #[error("VM {name}: cannot be {} (current status: {status})", .action.past_participle())]
    PreconditionFailed {
        name: String,
        action: BatchAction,
        status: Status,
    },

    #[error("VM {name}: failed to {}: {source}", .action.verb())]
    ActionFailed {
        name: String,
        action: BatchAction,
        source: Box<GceError>,
    },

    #[error("VM {name} must be stopped before changing machine type (current status: {status})")]
    MustBeStopped { name: String, status: Status },

    /// A provider call failed; `context` names the call.
    #[error("{context}: {source}")]
    ProviderCall {
        context: String,
        source: Box<GceError>,
    },

    #[error("operation {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("{context}")]
    Http {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("compute API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("failed to obtain access token: {message}")]
    #[diagnostic(help(
        "set GCECTL_ACCESS_TOKEN or run `gcloud auth login` so `gcloud auth print-access-token` works"
    ))]
    Auth { message: String },

    #[error("failed to extract {what} from '{uri}'")]
    ResourceUri { what: String, uri: String },
}

impl GceError {
    /// True when the error is, or wraps, a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            GceError::Cancelled => true,
            GceError::FindFailed { source, .. }
            | GceError::ActionFailed { source, .. }
            | GceError::ProviderCall { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Wrap a provider-call failure, leaving cancellation untouched.
    pub(crate) fn provider(context: impl Into<String>, source: GceError) -> GceError {
        match source {
            GceError::Cancelled => GceError::Cancelled,
            other => GceError::ProviderCall {
                context: context.into(),
                source: Box::new(other),
            },
        }
    }
}
