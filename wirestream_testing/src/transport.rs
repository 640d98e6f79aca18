//! Connected session pairs over an in-memory pipe.

use std::time::Duration;

use rstest::fixture;
use tokio::io::duplex;
use wirestream::{IncomingRequests, SessionConfig, StreamingSession};

/// Buffer size of the in-memory pipe in each direction.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Upper bound tests wait for any single event.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Default configuration for tests.
#[fixture]
#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
pub fn session_config() -> SessionConfig { SessionConfig::default() }

/// Two sessions connected to each other.
#[derive(Debug)]
pub struct SessionPair {
    /// Session conventionally sending requests.
    pub client: StreamingSession,
    /// Requests the server sends to the client.
    pub client_incoming: IncomingRequests,
    /// Session conventionally answering requests.
    pub server: StreamingSession,
    /// Requests the client sends to the server.
    pub server_incoming: IncomingRequests,
}

impl SessionPair {
    /// Close both ends and wait for their tasks to finish.
    pub async fn shutdown(self) {
        self.client.close();
        self.server.close();
        self.client.closed().await;
        self.server.closed().await;
    }
}

/// Connect two sessions sharing `config`.
///
/// Must be called from within a Tokio runtime.
#[must_use]
pub fn session_pair(config: SessionConfig) -> SessionPair {
    let (client_io, server_io) = duplex(DEFAULT_CAPACITY);
    let (client, client_incoming) = StreamingSession::connect(client_io, config);
    let (server, server_incoming) = StreamingSession::connect(server_io, config);
    SessionPair {
        client,
        client_incoming,
        server,
        server_incoming,
    }
}
