use std::io;

/// Failures moving one frame over a connection.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },

    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl WireError {
    /// True when the peer is gone rather than merely confused.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            WireError::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            )
        )
    }
}

/// Errors that stop the server from running at all.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Server has already been stopped")]
    Stopped,
}
