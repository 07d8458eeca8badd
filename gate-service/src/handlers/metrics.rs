use axum::extract::State;

use crate::AppState;

/// Prometheus exposition text; empty when no recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}
