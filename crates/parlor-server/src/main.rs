use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use parlor_gateway::auth::JwtAuthenticator;
use parlor_gateway::registry::ConnectionRegistry;
use parlor_gateway::router::MessageRouter;
use parlor_server::{AppState, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parlor_server=debug,parlor_gateway=debug,parlor_db=debug,tower_http=debug".into()
            }),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLOR_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".to_string());
    let db_path = std::env::var("PARLOR_DB_PATH").unwrap_or_else(|_| "parlor.db".to_string());
    let host = std::env::var("PARLOR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PARLOR_PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()?;

    // Init database
    let db = Arc::new(parlor_db::Database::open(&PathBuf::from(&db_path))?);
    info!("Database ready at {}", db_path);

    // Shared state
    let registry = ConnectionRegistry::new();
    let router = MessageRouter::new(registry, db.clone());
    let state = AppState {
        router,
        db,
        auth: Arc::new(JwtAuthenticator::new(&jwt_secret)),
    };

    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parlor server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
