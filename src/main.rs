use std::sync::Arc;

use anyhow::Result;
use tradebias_scheduler::refresh::{HttpSnapshotRefresh, NoopRefresh};
use tradebias_scheduler::scheduler::visibility_channel;
use tradebias_scheduler::{DataRefresh, SchedulerSettings, SessionController, Visibility};

#[tokio::main]
async fn main() -> Result<()> {
    tradebias_scheduler::init_tracing();
    tracing::info!("Starting TradeBias session scheduler...");

    let config = SchedulerSettings::from_env()?.resolve()?;

    let snapshots = match &config.refresh {
        Some(endpoint) => {
            tracing::info!("Refreshing from {}", endpoint.url);
            Some(Arc::new(HttpSnapshotRefresh::new(endpoint)?))
        }
        None => None,
    };
    let refresh: Arc<dyn DataRefresh> = match &snapshots {
        Some(http) => http.clone(),
        None => {
            tracing::warn!("No refresh_url configured, scheduled refreshes are no-ops");
            Arc::new(NoopRefresh)
        }
    };

    let controller = SessionController::new(config, refresh)?;

    let (visibility_tx, visibility_rx) = visibility_channel();
    controller.attach_visibility(visibility_rx)?;
    spawn_signal_visibility(visibility_tx);

    let status = controller.market_status();
    tracing::info!(
        "Market is {} (trading day: {}, next open: {:?})",
        status.message,
        controller.is_trading_day(),
        controller.next_market_open()
    );

    controller.start();
    let outcome = controller.refresh_now().await;
    tracing::info!("Initial refresh: {:?}", outcome);
    if let Some(snapshot) = snapshots.as_ref().and_then(|http| http.latest()) {
        tracing::info!("Latest snapshot fetched at {}", snapshot.fetched_at);
    }

    tokio::signal::ctrl_c().await?;
    controller.stop();
    tracing::info!("Session scheduler shut down");
    Ok(())
}

/// SIGUSR1 backgrounds the scheduler, SIGUSR2 brings it back
#[cfg(unix)]
fn spawn_signal_visibility(tx: tokio::sync::watch::Sender<Visibility>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let (mut background, mut foreground) =
            match (signal(SignalKind::user_defined1()), signal(SignalKind::user_defined2())) {
                (Ok(bg), Ok(fg)) => (bg, fg),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!("Visibility signals unavailable: {}", e);
                    return;
                }
            };

        loop {
            let visibility = tokio::select! {
                Some(()) = background.recv() => Visibility::Background,
                Some(()) = foreground.recv() => Visibility::Foreground,
                else => break,
            };
            if tx.send(visibility).is_err() {
                break;
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_signal_visibility(tx: tokio::sync::watch::Sender<Visibility>) {
    // Keep the channel open so the controller stays in the foreground
    tokio::spawn(async move {
        tx.closed().await;
    });
}
