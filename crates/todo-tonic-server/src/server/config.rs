use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `todo-tonic-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first when present), with defaults suitable for local use.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "todo-tonic-server",
    version,
    about = "A gRPC task service demonstrating the four streaming shapes"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/todo-uds.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a
    /// file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Seconds in-flight calls are given to finish once a shutdown signal is
    /// received. Calls still running afterwards are terminated.
    ///
    /// Environment variable: `SHUTDOWN_GRACE_SECS`
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Capacity of the response channel between a streaming handler and the
    /// gRPC stream. Lower values push backpressure to the store iteration
    /// sooner.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Reject calls that carry no `authorization` metadata.
    ///
    /// Environment variable: `REQUIRE_AUTH`
    #[arg(long, env = "REQUIRE_AUTH", default_value_t = false)]
    pub require_auth: bool,

    /// PEM certificate presented during the TLS handshake.
    ///
    /// Environment variable: `TLS_CERT`
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key matching `TLS_CERT`.
    ///
    /// Environment variable: `TLS_KEY`
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,
}

/// Certificate and key files for serving over TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub shutdown_grace: Duration,
    pub stream_buffer_size: usize,
    pub require_auth: bool,
    pub tls: Option<TlsFiles>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:50051"),
            uds: false,
            shutdown_grace: Duration::from_secs(10),
            stream_buffer_size: 8,
            require_auth: false,
            tls: None,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.shutdown_grace_secs == 0 {
            bail!("SHUTDOWN_GRACE_SECS must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        let tls = match (args.tls_cert, args.tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            (None, None) => None,
            _ => bail!("TLS_CERT and TLS_KEY must be set together"),
        };

        if tls.is_some() && !cfg!(feature = "tls") {
            bail!("TLS_CERT/TLS_KEY require building with the `tls` feature");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
            stream_buffer_size: args.stream_buffer_size,
            require_auth: args.require_auth,
            tls,
        })
    }
}
