use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::AppError;

/// Install the process-wide Prometheus recorder. The returned handle renders
/// the exposition text for a `/metrics` route.
pub fn install_metrics_recorder() -> Result<PrometheusHandle, AppError> {
    PrometheusBuilder::new().install_recorder().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Failed to install metrics recorder: {}", e))
    })
}
