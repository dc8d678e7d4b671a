//! Startup orchestration.
//!
//! # Responsibilities
//! - Bind the listener and launch the backend in order
//! - Hand the readiness result to the supervisor
//! - Run the server and stop the backend once it drains
//!
//! # Design Decisions
//! - A launch failure aborts only when `backend.required` is set
//! - A readiness timeout never aborts; the edge serves degraded
//! - A shutdown signal during warm-up skips straight to teardown

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use url::Url;

use crate::config::EdgeConfig;
use crate::error::EdgeError;
use crate::health::{HealthProbe, HealthStatus};
use crate::http::EdgeServer;
use crate::lifecycle::shutdown::{self, Shutdown};
use crate::lifecycle::signals;
use crate::lifecycle::supervisor::{LaunchSpec, ProcessSupervisor};
use crate::observability::metrics;

/// Launch the managed backend (if any) and wait for it to become ready.
///
/// Returns `Err` only for a launch failure on a required backend.
pub async fn prepare_backend(
    config: &EdgeConfig,
    supervisor: &ProcessSupervisor,
    probe: &HealthProbe,
) -> Result<HealthStatus, EdgeError> {
    let base = Url::parse(&config.backend.url)?;

    if config.backend.managed {
        let port = base.port_or_known_default().unwrap_or(80);
        let spec = LaunchSpec::from_config(&config.backend, port);
        if let Err(e) = supervisor.start(&spec).await {
            supervisor.mark_failed();
            if config.backend.required {
                tracing::error!(error = %e, "Backend launch failed, aborting startup");
                return Err(e);
            }
            tracing::error!(error = %e, "Backend launch failed, continuing degraded");
            metrics::record_backend_ready(false);
            return Ok(HealthStatus {
                ready: false,
                elapsed_attempts: 0,
                last_error: Some(e.to_string()),
            });
        }
    } else {
        tracing::info!(url = %base, "Backend is not managed, probing only");
    }

    let readiness = &config.readiness;
    let status = probe
        .wait_until_ready(&base, &readiness.path, readiness.max_attempts, readiness.interval())
        .await;

    if status.ready {
        supervisor.mark_ready();
    } else {
        supervisor.mark_degraded();
        let err = EdgeError::NotReady {
            attempts: status.elapsed_attempts,
        };
        tracing::warn!(error = %err, "Serving without a ready backend");
    }
    metrics::record_backend_ready(status.ready);

    Ok(status)
}

/// Full edge lifetime: bind, launch, serve until a signal, stop the backend.
pub async fn run(config: EdgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_listener(shutdown.clone());
    let server_shutdown = shutdown.subscribe();

    let supervisor = Arc::new(ProcessSupervisor::new());
    let probe = HealthProbe::from_config(&config.readiness);
    let grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);

    tokio::select! {
        prepared = prepare_backend(&config, &supervisor, &probe) => {
            prepared?;
        }
        _ = shutdown::wait_for(shutdown.subscribe()) => {
            tracing::info!("Shutdown requested during backend warm-up");
            supervisor.stop(grace).await;
            return Ok(());
        }
    }

    let server = EdgeServer::new(config, supervisor.clone())?;
    let served = server.run(listener, server_shutdown).await;

    supervisor.stop(grace).await;
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;

    fn unreachable_config() -> EdgeConfig {
        let mut config = EdgeConfig::default();
        config.backend.url = "http://127.0.0.1:1".to_string();
        config.readiness.max_attempts = 1;
        config.readiness.interval_secs = 0;
        config.readiness.attempt_timeout_secs = 1;
        config
    }

    #[tokio::test]
    async fn launch_failure_degrades_when_optional() {
        let mut config = unreachable_config();
        config.backend.command = vec!["/nonexistent/edge-backend-binary".to_string()];
        config.backend.log_path = std::env::temp_dir()
            .join("edge-proxy-startup-optional.log")
            .display()
            .to_string();

        let supervisor = ProcessSupervisor::new();
        let probe = HealthProbe::from_config(&config.readiness);
        let status = prepare_backend(&config, &supervisor, &probe).await.unwrap();

        assert!(!status.ready);
        assert!(status.last_error.unwrap().contains("failed to launch backend"));
        assert_eq!(supervisor.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn launch_failure_aborts_when_required() {
        let mut config = unreachable_config();
        config.backend.required = true;
        config.backend.command = vec!["/nonexistent/edge-backend-binary".to_string()];
        config.backend.log_path = std::env::temp_dir()
            .join("edge-proxy-startup-required.log")
            .display()
            .to_string();

        let supervisor = ProcessSupervisor::new();
        let probe = HealthProbe::from_config(&config.readiness);
        let err = prepare_backend(&config, &supervisor, &probe).await.unwrap_err();

        assert!(matches!(err, EdgeError::LaunchFailure { .. }));
        assert_eq!(supervisor.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn unmanaged_backend_is_only_probed() {
        let mut config = unreachable_config();
        config.backend.managed = false;

        let supervisor = ProcessSupervisor::new();
        let probe = HealthProbe::from_config(&config.readiness);
        let status = prepare_backend(&config, &supervisor, &probe).await.unwrap();

        assert!(!status.ready);
        assert_eq!(status.elapsed_attempts, 1);
        assert_eq!(supervisor.state(), LifecycleState::NotStarted);
    }
}
