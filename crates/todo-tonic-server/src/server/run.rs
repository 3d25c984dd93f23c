use crate::server::{
    config::ServerConfig,
    service::{
        auth::AuthInterceptor,
        handler::{TaskService, build_todo_service},
    },
    shutdown::{CallTracker, ShutdownCoordinator, ShutdownOutcome},
    store::TaskStore,
};
use core::future::Future;
use futures::Stream;
use std::sync::Arc;
use todo_tonic_core::proto::{FILE_DESCRIPTOR_SET, todo_service_server::TodoServiceServer};
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::transport::{Server, server::Connected};
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Serves `todo.TodoService` (plus health and reflection) on `incoming` until
/// `signal` resolves, then shuts down within `config.shutdown_grace`.
///
/// The health status is flipped to not-serving as soon as the signal fires.
pub async fn run_with_incoming<I, IO, IE, F>(
    incoming: I,
    config: ServerConfig,
    store: Arc<dyn TaskStore>,
    signal: F,
) -> anyhow::Result<ShutdownOutcome>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
    F: Future<Output = ()>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<TodoServiceServer<TaskService>>()
        .await;

    let tracker = CallTracker::new();
    let coordinator = ShutdownCoordinator::new(Arc::clone(&tracker), config.shutdown_grace);
    let service = TaskService::new(store, tracker, &config);

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let builder = Server::builder();
    #[cfg(feature = "tls")]
    let builder = match &config.tls {
        Some(files) => builder.tls_config(tls::server_config(files)?)?,
        None => builder,
    };

    let serve = builder
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_todo_service(
            service,
            AuthInterceptor::new(config.require_auth),
        ))
        .serve_with_incoming_shutdown(incoming, coordinator.stop_accepting());

    let signal = async {
        signal.await;
        health_reporter
            .set_not_serving::<TodoServiceServer<TaskService>>()
            .await;
    };

    let outcome = coordinator.run(serve, signal).await?;
    match outcome {
        ShutdownOutcome::Graceful => tracing::info!("Service shut down gracefully"),
        ShutdownOutcome::Forced { remaining } => {
            tracing::warn!(remaining, "Service shut down with calls still in flight");
        }
    }
    Ok(outcome)
}

#[cfg(feature = "tls")]
mod tls {
    use crate::server::config::TlsFiles;
    use anyhow::Context;
    use tonic::transport::{Identity, ServerTlsConfig};

    pub fn server_config(files: &TlsFiles) -> anyhow::Result<ServerTlsConfig> {
        let cert = std::fs::read(&files.cert)
            .with_context(|| format!("reading TLS certificate {}", files.cert.display()))?;
        let key = std::fs::read(&files.key)
            .with_context(|| format!("reading TLS key {}", files.key.display()))?;
        Ok(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))
    }
}
