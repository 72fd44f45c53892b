//! Client Error Hierarchy
//!
//! Two layers of errors live here:
//!
//! - [`Error`]: returned synchronously from client calls (unary RPCs, builder,
//!   configuration loading, watch registration).
//! - [`WatchError`]: terminal conditions of a single watch. These are never raised
//!   to the caller of `create`; they are delivered through that watch's sink
//!   (event stream or callback) so sibling watches are unaffected.

use std::time::Duration;

use config::ConfigError;
use tonic::Code;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Watch subsystem failures surfaced synchronously (e.g. manager closed)
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Client configuration loading/validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport and RPC failures
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Caller supplied arguments the server would reject anyway
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Malformed endpoint addresses
    #[error("Invalid URI format: {0}")]
    InvalidURI(String),

    /// None of the configured endpoints accepted a connection
    #[error("No endpoint reachable among {0:?}")]
    NoEndpointAvailable(Vec<String>),

    /// Stream establishment exceeded its deadline
    #[error("Stream establishment timed out after {0:?}")]
    EstablishTimeout(Duration),

    /// The server closed a bidirectional stream without an error status
    #[error("Stream closed by server")]
    StreamEnded,

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    /// gRPC status code errors
    #[error(transparent)]
    TonicStatusError(#[from] Box<tonic::Status>),
}

/// Terminal conditions of a single watch.
///
/// Every variant is final for the watch it is reported on: the sink receives it
/// once, and an [`EventStream`](crate::EventStream) keeps re-raising it on every
/// subsequent poll.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// The stream broke and reconnection exhausted its attempts or deadline
    #[error("Watch connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// The requested start revision is older than the server's retained history.
    /// Re-subscribe at or after `compacted_revision`.
    #[error("Required revision has been compacted, compacted revision: {compacted_revision}")]
    RevisionCompacted { compacted_revision: i64 },

    /// No create acknowledgement arrived within the establishment deadline
    #[error("Watch was not established within {timeout:?}")]
    WatchTimedOut { timeout: Duration },

    /// The manager was shut down or has permanently failed
    #[error("Watch manager is closed")]
    ManagerClosed,

    /// A send was attempted on a stream handle that has already been torn down
    #[error("Watch stream is closed")]
    StreamClosed,

    /// The watch was canceled locally before it produced anything
    #[error("Watch was canceled")]
    Canceled,

    /// The consumer stopped pulling while its bounded queue was full
    #[error("Watch consumer fell behind with {capacity} undelivered responses")]
    SlowConsumer { capacity: usize },
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Network(NetworkError::TonicStatusError(Box::new(status)))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Network(NetworkError::TonicError(Box::new(err)))
    }
}

impl Error {
    /// gRPC status code of an RPC failure, if this error carries one
    pub fn rpc_code(&self) -> Option<Code> {
        match self {
            Error::Network(NetworkError::TonicStatusError(status)) => Some(status.code()),
            _ => None,
        }
    }

    /// Whether the failure is a transient link problem worth a reconnect.
    ///
    /// Status codes that describe the request itself (bad argument, compacted
    /// revision, permission) are not retryable: a new stream would fail the same way.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(NetworkError::TonicStatusError(status)) => matches!(
                status.code(),
                Code::Unavailable
                    | Code::Cancelled
                    | Code::DeadlineExceeded
                    | Code::Unknown
                    | Code::Internal
                    | Code::ResourceExhausted
                    | Code::Aborted
            ),
            Error::Network(_) => true,
            Error::Watch(WatchError::StreamClosed) => true,
            _ => false,
        }
    }
}
