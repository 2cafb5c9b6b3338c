mod state;

use state::AppState;
use tokio::time::sleep;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let state = AppState::initialize().await?;
    let interval = state.poll_interval();
    tracing::info!(interval_secs = interval.as_secs(), "mail sync scheduler started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            _ = background_sync_tick(&state, interval) => {}
        }
    }

    state.shutdown().await;
    tracing::info!("mail sync scheduler stopped");
    Ok(())
}

async fn background_sync_tick(state: &AppState, interval: std::time::Duration) {
    if let Err(err) = state.run_sync_cycle().await {
        tracing::error!("background sync run failed: {err:#}");
    }
    sleep(interval).await;
}
