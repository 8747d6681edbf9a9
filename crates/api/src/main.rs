use anyhow::Result;
use enquiry_api::{build_app, ApiConfig};
use enquiry_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("enquiry_api");

    let config = ApiConfig::from_env();
    let app = build_app(&config)?;

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(
        bind = %config.bind,
        origins = ?config.allowed_origins,
        "college enquiry api started"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
