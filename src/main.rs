use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = jotter::config::from_env()?;
    info!("blog backend starting");
    info!("  http_port       = {}", config.http_port);
    info!("  database_url    = {}", config.database_url);
    info!("  pool_size       = {}", config.pool_size);
    info!("  session_cookie  = {}", config.session.cookie_name);
    info!("  session_timeout = {:?}", config.session.timeout);

    jotter::server::run(config).await
}
