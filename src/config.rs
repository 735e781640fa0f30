use std::time::Duration;

use tracing::warn;

/// Tunables for the reliable transport and the network layer.
///
/// The defaults reproduce the reference behavior; each value can be
/// overridden through the environment for experiments (e.g. raising the loss
/// rate while shrinking the ACK timeout).
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// TTL stamped on every originated packet.
    pub initial_ttl: u8,
    /// How long a sender waits for an ACK before retransmitting.
    pub ack_timeout: Duration,
    /// Retransmissions of a data segment before the connection is declared
    /// dead.
    pub retry_ceiling: u32,
    /// Retransmissions of a FIN before teardown proceeds without the peer's
    /// ACK. Separate from the data ceiling: the peer may legitimately be
    /// gone already.
    pub fin_retry_ceiling: u32,
    /// Maximum application payload bytes per segment, before Base64 and
    /// framing overhead.
    pub mss: usize,
}

impl Default for StackConfig {
    fn default() -> StackConfig {
        StackConfig {
            initial_ttl: 16,
            ack_timeout: Duration::from_millis(500),
            retry_ceiling: 20,
            fin_retry_ceiling: 8,
            mss: 1024,
        }
    }
}

impl StackConfig {
    /// The defaults, with `NET_INITIAL_TTL`, `NET_ACK_TIMEOUT_MS`,
    /// `NET_RETRY_CEILING` and `NET_MSS` applied on top where set.
    pub fn from_env() -> StackConfig {
        let defaults = StackConfig::default();
        StackConfig {
            initial_ttl: env_parsed("NET_INITIAL_TTL").unwrap_or(defaults.initial_ttl),
            ack_timeout: env_parsed("NET_ACK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ack_timeout),
            retry_ceiling: env_parsed("NET_RETRY_CEILING").unwrap_or(defaults.retry_ceiling),
            fin_retry_ceiling: env_parsed("NET_FIN_RETRY_CEILING")
                .unwrap_or(defaults.fin_retry_ceiling),
            mss: env_parsed("NET_MSS").unwrap_or(defaults.mss),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring unparsable value {:?} for {}", raw, key);
            None
        }
    }
}

/// Fault injection parameters of the noisy channel.
#[derive(Debug, Clone)]
pub struct NoiseConfig {
    /// Probability that a datagram is dropped outright.
    pub loss_probability: f64,
    /// Probability that a surviving datagram has one byte flipped.
    pub corruption_probability: f64,
    /// Surviving datagrams are delayed uniformly in `0..=max_delay`.
    pub max_delay: Duration,
}

impl Default for NoiseConfig {
    fn default() -> NoiseConfig {
        NoiseConfig {
            loss_probability: 0.1,
            corruption_probability: 0.02,
            max_delay: Duration::from_millis(100),
        }
    }
}

impl NoiseConfig {
    /// A perfectly clean channel. Used by tests that exercise logic above
    /// the substrate.
    pub fn off() -> NoiseConfig {
        NoiseConfig {
            loss_probability: 0.0,
            corruption_probability: 0.0,
            max_delay: Duration::ZERO,
        }
    }

    /// The defaults, with `NET_LOSS_PROBABILITY`, `NET_CORRUPTION_PROBABILITY`
    /// and `NET_MAX_DELAY_MS` applied on top where set.
    pub fn from_env() -> NoiseConfig {
        let defaults = NoiseConfig::default();
        NoiseConfig {
            loss_probability: env_parsed("NET_LOSS_PROBABILITY")
                .unwrap_or(defaults.loss_probability),
            corruption_probability: env_parsed("NET_CORRUPTION_PROBABILITY")
                .unwrap_or(defaults.corruption_probability),
            max_delay: env_parsed("NET_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }
}
