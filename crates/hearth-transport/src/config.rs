//! Transport tuning knobs.

use std::time::Duration;

use hearth_protocol::DEFAULT_MAX_MESSAGE_LEN;

/// Configuration for the listener and its worker pool.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connections one reader/writer pair serves before a new pair is
    /// spawned.
    pub max_connections_per_worker: usize,

    /// Upper bound on every readiness wait. Stop requests and retired
    /// workers are noticed within one interval.
    pub poll_interval: Duration,

    /// Largest message accepted from an authenticated connection.
    pub max_message_len: usize,

    /// Largest message accepted before authentication succeeds.
    pub max_auth_message_len: usize,

    /// Largest HTTP header block accepted before the request is rejected.
    pub max_http_header_len: usize,

    /// Largest `Content-Length` body accepted on a plain HTTP request.
    pub max_http_body_len: usize,

    /// Whether a connection that is neither raw framed nor TLS may speak
    /// HTTP (and upgrade to WebSocket) in the clear.
    pub allow_plain_http: bool,

    /// Bytes requested from the socket per read.
    pub read_chunk: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_connections_per_worker: 256,
            poll_interval: Duration::from_millis(50),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            max_auth_message_len: 64 * 1024,
            max_http_header_len: 16 * 1024,
            max_http_body_len: 1024 * 1024,
            allow_plain_http: true,
            read_chunk: 16 * 1024,
        }
    }
}

impl TransportConfig {
    /// Smallest poll interval the workers will honor.
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Clamp values that would stall or starve the workers.
    pub fn validated(mut self) -> Self {
        self.max_connections_per_worker = self.max_connections_per_worker.max(1);
        self.poll_interval = self.poll_interval.max(Self::MIN_POLL_INTERVAL);
        self.max_message_len = self.max_message_len.max(1);
        self.max_auth_message_len = self.max_auth_message_len.clamp(1, self.max_message_len);
        self.max_http_header_len = self.max_http_header_len.max(64);
        self.read_chunk = self.read_chunk.max(512);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_already_valid() {
        let config = TransportConfig::default();
        let validated = config.clone().validated();
        assert_eq!(validated.max_connections_per_worker, config.max_connections_per_worker);
        assert_eq!(validated.poll_interval, config.poll_interval);
        assert_eq!(validated.max_auth_message_len, config.max_auth_message_len);
    }

    #[test]
    fn test_validated_clamps_degenerate_values() {
        let config = TransportConfig {
            max_connections_per_worker: 0,
            poll_interval: Duration::ZERO,
            max_message_len: 100,
            max_auth_message_len: 1000,
            read_chunk: 1,
            ..TransportConfig::default()
        }
        .validated();
        assert_eq!(config.max_connections_per_worker, 1);
        assert_eq!(config.poll_interval, TransportConfig::MIN_POLL_INTERVAL);
        assert_eq!(config.max_auth_message_len, 100);
        assert_eq!(config.read_chunk, 512);
    }
}
