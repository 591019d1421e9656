//! `Broker`: wires the registry, dispatcher and both listeners together.

use crate::config::BrokerConfig;
use crate::dispatch::{tcp, ws, ConnectionDispatcher};
use crate::question::{PlaceholderQuestions, QuestionSource};
use crate::session::{IdleSweeper, SessionRegistry};
use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

/// The relay broker
pub struct Broker {
    config: Arc<BrokerConfig>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<ConnectionDispatcher>,
}

impl Broker {
    /// Create a broker with the placeholder question source
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_question_source(config, Arc::new(PlaceholderQuestions))
    }

    pub fn with_question_source(config: BrokerConfig, questions: Arc<dyn QuestionSource>) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new(config.clone(), questions));
        let dispatcher = Arc::new(ConnectionDispatcher::new(registry.clone(), config.clone()));
        Self {
            config,
            registry,
            dispatcher,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<ConnectionDispatcher> {
        &self.dispatcher
    }

    /// Router for the WebSocket binding and health endpoint
    pub fn router(&self) -> Router {
        ws::router(self.dispatcher.clone())
    }

    /// Bind both listeners at the configured addresses
    pub async fn bind(&self) -> Result<(TcpListener, TcpListener)> {
        let tcp = TcpListener::bind(&self.config.tcp_addr)
            .await
            .with_context(|| format!("Failed to bind TCP listener on {}", self.config.tcp_addr))?;
        let ws = TcpListener::bind(&self.config.ws_addr)
            .await
            .with_context(|| format!("Failed to bind WebSocket listener on {}", self.config.ws_addr))?;
        Ok((tcp, ws))
    }

    /// Serve the line-oriented TCP binding on `listener`
    pub async fn serve_tcp(&self, listener: TcpListener) {
        tcp::serve(listener, self.dispatcher.clone()).await
    }

    /// Serve the WebSocket binding on `listener`
    pub async fn serve_ws(&self, listener: TcpListener) -> Result<()> {
        info!("WebSocket relay listening on {}", listener.local_addr()?);
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .context("WebSocket server failed")
    }

    /// Start evicting idle sessions in the background
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        IdleSweeper::new(self.registry.clone(), &self.config).spawn()
    }
}
