//! Book Haven - bookstore backend

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bookhaven::api::{self, AppState, JwtKeys};
use bookhaven::config::Config;
use bookhaven::gateways::{HttpMailer, LogMailer, LogNotifier, Mailer, NatsNotifier, Notifier};
use bookhaven::store::{MemoryStore, PgStore, SharedStore};
use bookhaven::workers::{OutboxDispatcher, SaleExpirySweeper};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(config.json_logs);

    let store: SharedStore = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.database_max_connections)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let mailer: Arc<dyn Mailer> = match &config.mail_relay {
        Some(relay) => Arc::new(HttpMailer::new(relay.url.clone(), relay.from.clone())),
        None => Arc::new(LogMailer),
    };
    let notifier: Arc<dyn Notifier> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsNotifier::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, push notifications will only be logged");
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    };

    let dispatcher = Arc::new(OutboxDispatcher::new(store.clone(), mailer, notifier, config.outbox.clone()));
    let sweeper = SaleExpirySweeper::new(store.clone(), config.sweeper.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = vec![
        tokio::spawn(dispatcher.clone().run(shutdown_rx.clone())),
        tokio::spawn(sweeper.run(shutdown_rx)),
    ];

    let jwt = JwtKeys::new(&config.jwt_secret, config.jwt_issuer.clone(), config.jwt_audience.clone());
    let app = api::router(AppState::new(store, dispatcher, jwt)).layer(cors(&config.cors_origins));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Book Haven listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    for result in futures::future::join_all(workers).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Worker task ended abnormally");
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bookhaven=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn cors(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
