use core::time::Duration;
use std::time::Instant;
use tonic::metadata::MetadataMap;

pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Point in time by which the caller expects a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestDeadline {
    at: Instant,
}

impl RequestDeadline {
    /// Reads the `grpc-timeout` entry of `metadata`, counting from
    /// `received`. Missing or malformed entries yield `None`.
    pub fn from_metadata(metadata: &MetadataMap, received: Instant) -> Option<Self> {
        let raw = metadata.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
        match parse_grpc_timeout(raw) {
            Some(timeout) => Some(Self {
                at: received + timeout,
            }),
            None => {
                tracing::debug!("Ignoring malformed grpc-timeout {raw:?}");
                None
            }
        }
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Parses a gRPC `TimeoutValue TimeoutUnit` pair: at most eight ASCII digits
/// followed by one of `H`, `M`, `S`, `m`, `u`, `n`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = digits.parse().ok()?;

    let timeout = match unit {
        "H" => Duration::from_secs(n * 60 * 60),
        "M" => Duration::from_secs(n * 60),
        "S" => Duration::from_secs(n),
        "m" => Duration::from_millis(n),
        "u" => Duration::from_micros(n),
        "n" => Duration::from_nanos(n),
        _ => return None,
    };
    Some(timeout)
}
