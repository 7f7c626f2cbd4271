//! Service wiring and lifecycle.

use crate::adapters::github::GithubEndpoint;
use crate::adapters::notify::{EmailNotifier, GithubStatusNotifier};
use crate::adapters::runner::ShellRunner;
use crate::adapters::storage::{FileStore, InMemoryStore};
use crate::api::{create_router, AppState};
use crate::config::server_config::{ServerConfig, StoreKind};
use crate::core::dispatcher::{Dispatcher, JobQueue};
use crate::core::engine::RegressionEngine;
use crate::core::pipeline::{PipelineSettings, RegressionPipeline, Source};
use crate::core::tracker::Tracker;
use crate::domain::ports::{Notifier, ResultStore};
use crate::utils::error::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct Server {
    config: ServerConfig,
    state: AppState,
    dispatcher: Arc<Dispatcher>,
}

pub async fn open_store(config: &ServerConfig) -> Result<Arc<dyn ResultStore>> {
    let store: Arc<dyn ResultStore> = match config.store.kind {
        StoreKind::File => Arc::new(FileStore::open(config.store.path.clone()).await?),
        StoreKind::Memory => Arc::new(InMemoryStore::new()),
    };
    Ok(store)
}

fn build_notifiers(config: &ServerConfig, github: &Arc<GithubEndpoint>) -> Vec<Arc<dyn Notifier>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    if config.notify.github_status && github.is_authenticated() {
        notifiers.push(Arc::new(GithubStatusNotifier::new(
            github.clone(),
            &config.server.public_url,
        )));
    } else {
        tracing::info!("Commit statuses disabled");
    }

    if let (Some(relay), Some(from)) = (&config.notify.mail_relay_url, &config.notify.mail_from) {
        notifiers.push(Arc::new(EmailNotifier::new(
            relay,
            from,
            &config.server.public_url,
        )));
    }

    notifiers
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let store = open_store(&config).await?;
        let github = Arc::new(GithubEndpoint::new(
            &config.github.api_url,
            config.github_token().map(str::to_string),
        ));
        let notifiers = build_notifiers(&config, &github);

        let pipeline = RegressionPipeline::new(
            store.clone(),
            notifiers.clone(),
            ShellRunner::new(),
            PipelineSettings {
                workspace_root: config.dispatcher.workspace_root.clone(),
                default_timeout_minutes: config.dispatcher.default_timeout_minutes,
                keep_workspaces: config.dispatcher.keep_workspaces,
                ..Default::default()
            },
            Source::Git,
        );
        let engine = Arc::new(RegressionEngine::new_with_monitoring(
            pipeline,
            config.monitoring.system_stats,
        ));
        let dispatcher = Arc::new(Dispatcher::start(
            engine,
            config.dispatcher.workers,
            config.dispatcher.queue_capacity,
        ));

        let queue: Arc<dyn JobQueue> = dispatcher.clone();
        let tracker = Arc::new(Tracker::new(
            github,
            store,
            notifiers,
            queue,
            config.webhook_url(),
            config
                .github
                .webhook_secret
                .clone()
                .filter(|s| !s.is_empty()),
        ));

        Ok(Self {
            state: AppState::new(tracker),
            config,
            dispatcher,
        })
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn run(self) -> Result<()> {
        let addr = self.config.server.listen_addr;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("🌐 OpenCorps listening on {}", addr);
        tracing::info!("Webhook URL: {}", self.config.webhook_url());

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Shutting down, waiting for running jobs");
        self.dispatcher.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
