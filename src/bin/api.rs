use portfolio_insights_assistant::{
    api::{start_server, ApiState},
    bootstrap::AssistantContext,
    config::AssistantConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AssistantConfig::from_env()?;
    let port = config.port;

    info!("🚀 Portfolio Insights Assistant - API Server");
    info!("📍 Port: {}", port);

    let context = AssistantContext::bootstrap(config).await?;
    info!("✅ Assistant initialized");
    info!("📡 Starting API server...");

    start_server(ApiState::from_context(&context), port).await?;

    Ok(())
}
