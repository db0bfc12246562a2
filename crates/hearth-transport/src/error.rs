/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listening socket failed.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A socket or file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TLS session failed.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Certificates or keys could not be loaded or generated.
    #[error("invalid TLS material: {0}")]
    Certificate(String),

    /// The peer sent something that is not an acceptable HTTP request.
    #[error("malformed HTTP request: {0}")]
    Http(String),

    /// The worker pool is stopping and takes no new connections.
    #[error("transport shut down")]
    Shutdown,
}
