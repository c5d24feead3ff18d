use anyhow::Context;
use db::DBService;
use server::{AppState, config::Config, routes};
use services::services::referral_rank::RankProgressionJob;
use tracing::info;
use utils::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("info,server=debug,services=debug");

    let config = Config::from_env()?;
    let db = DBService::new(&config.database_url)
        .await
        .context("failed to open database")?;
    let state = AppState::new(db, config.query_cache_ttl);

    match config.rank_job_interval {
        Some(interval) => {
            RankProgressionJob::spawn(state.ranks.clone(), interval);
        }
        None => info!("Rank progression job disabled"),
    }

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
