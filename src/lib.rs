pub mod chatbot;
pub mod config;
pub mod crawler;
pub mod db;
pub mod doc_processor;
pub mod embedding;
pub mod error;
pub mod library;
pub mod llm;
pub mod memory;
pub mod routes;
pub mod search;
pub mod session;

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use chatbot::Chatbot;
use config::ServerConfig;
use db::Database;
use error::{AppError, AppResult};
use library::Library;

/// Shared handles for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db: Arc<Database>,
    pub library: Arc<Library>,
    pub chatbot: Arc<Chatbot>,
    pub client: Client,
}

impl AppState {
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        let db = Arc::new(Database::new(&config.database_path())?);
        let library = Arc::new(Library::open(config.uploads_dir(), config.links_dir())?);
        let client = Client::builder()
            .user_agent(concat!("jamal/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Upstream(e.to_string()))?;
        let config = Arc::new(config);
        let chatbot = Arc::new(Chatbot::new(
            db.clone(),
            library.clone(),
            client.clone(),
            config.clone(),
        ));

        Ok(Self {
            config,
            db,
            library,
            chatbot,
            client,
        })
    }
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config)?;
    tracing::info!(
        provider = state.chatbot.model_settings().provider.name(),
        data_dir = %state.config.data_dir.display(),
        "backend ready"
    );
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
