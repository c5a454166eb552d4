use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum_server::Handle;
use state_store::FunctionStore;
use tokio::{self, signal};
use tracing::{error, info};

use crate::{
    config::ServerConfig,
    registry::RegistryService,
    routes::{create_routes, RouteState},
};

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub registry: RegistryService,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let function_store = FunctionStore::new(
            config.state_store_path.clone().into(),
            config.validation_limits(),
        )
        .await
        .context("error initializing function store")?;
        let registry = RegistryService::new(function_store, config.pagination);

        Ok(Self { config, registry })
    }

    pub fn route_state(&self) -> RouteState {
        RouteState {
            registry: self.registry.clone(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let routes = create_routes(self.route_state());
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    info!("signal received, shutting down server gracefully");
}
