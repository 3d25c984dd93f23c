#![doc = include_str!("../README.md")]

use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use todo_tonic_core::{
    Error, FieldMask, Task,
    client::{ClientOptions, TaskClient},
    mask::FIELD_ID,
};
use tonic::Code;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "todo-tonic-client",
    version,
    about = "Adds, lists, updates and deletes tasks against a running todo-tonic-server"
)]
struct CliArgs {
    /// Server endpoint.
    ///
    /// Environment variable: `GRPC_SERVER_ADDR`
    #[arg(long, env = "GRPC_SERVER_ADDR", default_value_t = String::from("http://127.0.0.1:50051"))]
    server_addr: String,

    /// Value sent as `authorization` metadata on every call.
    ///
    /// Environment variable: `AUTH_TOKEN`
    #[arg(long, env = "AUTH_TOKEN", default_value_t = String::from("tk-tk"))]
    auth_token: String,

    /// Deadline for each `AddTask` call, in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    timeout_ms: u64,

    /// Compress requests and accept compressed responses with gzip.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    gzip: bool,

    /// PEM CA certificate used to verify the server.
    ///
    /// Environment variable: `CA_CERT`
    #[arg(long, env = "CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Domain name expected in the server certificate.
    ///
    /// Environment variable: `TLS_DOMAIN`
    #[arg(long, env = "TLS_DOMAIN")]
    tls_domain: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_target(false)
        .init();

    let options = client_options(&args)?;
    let mut client = TaskClient::connect(options).await?;

    // Unary: three tasks that were due yesterday.
    let yesterday = SystemTime::now() - Duration::from_secs(24 * 60 * 60);
    for i in 1..4 {
        match client.add_task(format!("do smth {i}"), yesterday).await {
            Ok(id) => tracing::info!("added task with id: {id}"),
            Err(e) if e.code() == Code::InvalidArgument => {
                anyhow::bail!("invalid argument: {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Server streaming, ids only.
    let listed = client.list_tasks(FieldMask::new([FIELD_ID])).await?;
    let ids: Vec<_> = listed.iter().map(|t| t.task.id).collect();
    for entry in &listed {
        tracing::info!(
            "got task with id: {}, description: {:?}, overdue: {}",
            entry.task.id,
            entry.task.description,
            entry.overdue
        );
    }
    tracing::info!("server done");

    // Client streaming: mark all but the first as done.
    let now = SystemTime::now();
    let updates = ids.iter().skip(1).map(|&id| Task {
        id,
        description: "updated!!".to_string(),
        done: true,
        due_at: now,
    });
    client.update_tasks(updates).await?;
    tracing::info!("updated {} tasks", ids.len().saturating_sub(1));

    // Bidirectional streaming: delete everything listed.
    match client.delete_tasks(ids).await {
        Ok(deleted) => {
            for id in &deleted {
                tracing::info!("deleted task confirmation for {id}");
            }
        }
        Err(e @ Error::Rpc { .. }) => anyhow::bail!("error deleting task: {e}"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

fn client_options(args: &CliArgs) -> anyhow::Result<ClientOptions> {
    let options = ClientOptions::new(args.server_addr.clone())
        .with_auth_token(args.auth_token.clone())
        .with_unary_timeout(Duration::from_millis(args.timeout_ms))
        .with_gzip(args.gzip);

    match (&args.ca_cert, &args.tls_domain) {
        (None, None) => Ok(options),
        #[cfg(feature = "tls")]
        (Some(ca_cert), domain) => {
            use tonic::transport::{Certificate, ClientTlsConfig};
            let pem = std::fs::read(ca_cert)?;
            let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
            if let Some(domain) = domain {
                tls = tls.domain_name(domain.clone());
            }
            Ok(options.with_tls(tls))
        }
        _ => anyhow::bail!("CA_CERT is required for TLS and needs the `tls` feature"),
    }
}
