//! Gateway shared state.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use chat_relay_core::config::Config;
use chat_relay_engine::AgentEngine;
use chat_relay_stream::SharedTelemetry;

use crate::profiles::EndpointProfile;

/// State shared by every request. Read-only after startup.
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<dyn AgentEngine>,
    pub telemetry: SharedTelemetry,
    pub assistant: EndpointProfile,
    pub research: EndpointProfile,
    pub started_at: DateTime<Utc>,
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<dyn AgentEngine>,
        telemetry: SharedTelemetry,
    ) -> Self {
        Self {
            assistant: EndpointProfile::assistant_from(&config),
            research: EndpointProfile::research_from(&config),
            config,
            engine,
            telemetry,
            started_at: Utc::now(),
            #[cfg(feature = "metrics")]
            metrics_handle: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics_handle(
        mut self,
        handle: metrics_exporter_prometheus::PrometheusHandle,
    ) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
