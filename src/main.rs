use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cert_ledger::certificate::IssuerKey;
use cert_ledger::config::AppConfig;
use cert_ledger::server::{self, AppState};
use cert_ledger::CertLedger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cert_ledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cert-ledger");

    let config = AppConfig::load()?;

    let app = CertLedger::from_config(&config).await?;
    info!("Services initialized");

    let issuer = match &config.ledger.issuer_key_path {
        Some(path) => {
            let key = IssuerKey::from_file(Path::new(path))?;
            info!("Issuing as {}", key.actor_id());
            Some(Arc::new(key))
        }
        None => {
            warn!("No issuer key configured; issuance is disabled");
            None
        }
    };

    let state = AppState {
        app,
        issuer,
        issuing_authority: config.ledger.issuing_authority.clone(),
    };

    let router = server::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .into_inner(),
    );

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
