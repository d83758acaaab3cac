//! Consumer configuration

use std::time::Duration;

use emberplus_network::TcpClientConfig;

/// Default deadline for one provider round trip
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub tcp: TcpClientConfig,
    /// Deadline per in-flight request; expired requests fail with a
    /// timeout and the queue advances
    pub request_timeout: Duration,
    /// Capacity of the unsolicited-update event channel
    pub event_buffer: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            tcp: TcpClientConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_buffer: 64,
        }
    }
}

impl ConsumerConfig {
    pub fn for_endpoint(host: impl Into<String>, port: u16) -> Self {
        Self {
            tcp: TcpClientConfig {
                host: host.into(),
                port,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
