/// Error type returned by trigger callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A blocking wait was started in a way the client cannot honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionViolation {
    /// Another `listen` or `post_rpc` is still outstanding on this client.
    #[error("another synchronous wait is already outstanding")]
    WaiterBusy,

    /// More than one reply was requested without a timeout.
    #[error("waiting for {nreplies} replies requires a timeout")]
    TimeoutRequired { nreplies: usize },

    /// The wait was started from a trigger callback on the receiver thread.
    #[error("cannot block on the receiver thread (called from a trigger callback)")]
    ReceiverThread,
}

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] sosbus_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] sosbus_frame::FrameError),

    /// The call was rejected before any I/O.
    #[error("precondition violated: {0}")]
    Precondition(#[from] PreconditionViolation),

    /// The client is not connected, or its connection has ended.
    #[error("disconnected: {reason}")]
    Disconnected { reason: String },

    /// `connect` was called while a connection is active or being set up.
    #[error("already connected")]
    AlreadyConnected,
}

impl ClientError {
    pub(crate) fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
