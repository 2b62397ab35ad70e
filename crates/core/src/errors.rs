use std::path::PathBuf;

use thiserror::Error;

/// Why an event could not be turned into an estimator sample.
///
/// None of these are fatal: the controller drops the offending sample, keeps its
/// current estimates and carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("ack received at {ack_time}ms precedes send at {send_time}ms")]
    NegativeRtt { send_time: u64, ack_time: u64 },

    #[error("sample observed at {observed_at}ms is older than the newest sample ({newest}ms)")]
    OutOfOrder { observed_at: u64, newest: u64 },

    #[error("delivery interval is empty")]
    ZeroInterval,

    #[error("sample value is not a finite number")]
    NonFinite,

    #[error("event time {now}ms precedes the last processed event ({previous}ms)")]
    TimeWentBackwards { previous: u64, now: u64 },

    #[error("no outstanding datagram with sequence number {0}")]
    UnknownSequence(u64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}
