//! Host visibility signal
//!
//! The host reports whether the dashboard is in the foreground. The
//! controller pauses its timers while backgrounded and rearms them from the
//! current wall clock when brought back.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Foreground,
    Background,
}

/// Channel the host publishes visibility changes on. Starts in the foreground.
pub fn visibility_channel() -> (watch::Sender<Visibility>, watch::Receiver<Visibility>) {
    watch::channel(Visibility::Foreground)
}
