use std::time::{Duration, SystemTime};

/// Result of one completed request attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOutcome {
    pub timestamp: SystemTime,
    pub latency: Duration,
    /// `None` when no response was received (network failure or timeout).
    pub status: Option<u16>,
    pub success: bool,
}

impl RequestOutcome {
    /// A response was received. Anything below 500 counts as a success.
    pub fn response(status: u16, latency: Duration) -> Self {
        Self {
            timestamp: SystemTime::now(),
            latency,
            status: Some(status),
            success: status < 500,
        }
    }

    /// No response was received.
    pub fn failure(latency: Duration) -> Self {
        Self {
            timestamp: SystemTime::now(),
            latency,
            status: None,
            success: false,
        }
    }
}
