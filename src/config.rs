//! Relay tunables shared by the client pumps.

use std::time::Duration;

/// Timing and sizing knobs for one relay instance.
///
/// The defaults mirror common WebSocket keepalive settings: the server pings
/// every `ping_period` and expects some frame back within `pong_wait`, so
/// `ping_period` must stay shorter than `pong_wait` for a healthy peer to
/// keep its read deadline renewed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Largest inbound frame accepted, in bytes. Anything bigger is fatal to
    /// the connection.
    pub max_frame_bytes: usize,
    /// Idle-read deadline. A connection that produces no frame (not even a
    /// keepalive pong) for this long is considered half-open and torn down.
    pub pong_wait: Duration,
    /// Interval between keepalive pings sent by the writer pump.
    pub ping_period: Duration,
    /// Deadline for a single outbound frame write.
    pub write_wait: Duration,
    /// Capacity of each client's outbound queue. A full queue drops messages
    /// for that client rather than stalling the sender.
    pub send_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            max_frame_bytes: 1024,
            pong_wait,
            // 9/10 of the pong wait, so a healthy peer always gets a ping
            // before its deadline runs out.
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
            send_queue_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_shorter_than_pong_wait() {
        let config = Config::default();
        assert!(config.ping_period < config.pong_wait);
    }
}
