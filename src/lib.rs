//! TradeBias session scheduler
//!
//! Keeps the market dashboard's data fresh around NSE session boundaries
//! and answers "is the market open, and when does it open next?" from the
//! exchange's wall clock.

pub mod config;
pub mod error;
pub mod market;
pub mod refresh;
pub mod scheduler;

pub use config::{SchedulerSettings, SessionConfig};
pub use error::{AppError, Result};
pub use market::{MarketCalendar, MarketPhase, MarketStatus};
pub use refresh::DataRefresh;
pub use scheduler::{SessionController, Visibility};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "tradebias_scheduler=debug,info";

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
