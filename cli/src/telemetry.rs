// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Prometheus exposition of the controller counters.

use anyhow::{Context, Result};
use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, info};

use vela_core::domain::controller_config::MetricsConfig;

/// Reconcile attempts by controller and result.
pub const RECONCILE_TOTAL: &str = "vela_reconcile_total";

/// Version numbers handed out.
pub const VERSIONS_ASSIGNED_TOTAL: &str = "vela_versions_assigned_total";

/// Ledger entries dropped after their template was deleted.
pub const LEDGER_ENTRIES_REMOVED_TOTAL: &str = "vela_ledger_entries_removed_total";

/// Install the Prometheus recorder and its HTTP listener. A missing or
/// disabled `metrics` section leaves the no-op recorder in place.
pub fn install_metrics_exporter(config: Option<&MetricsConfig>) -> Result<()> {
    let Some(config) = config.filter(|config| config.enabled) else {
        debug!("Metrics exporter disabled");
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.port))
        .install()
        .with_context(|| format!("Failed to install Prometheus exporter on port {}", config.port))?;
    describe_metrics();

    info!(port = config.port, "Prometheus metrics exporter listening");
    Ok(())
}

fn describe_metrics() {
    describe_counter!(RECONCILE_TOTAL, Unit::Count, "Reconcile attempts by controller and result");
    describe_counter!(VERSIONS_ASSIGNED_TOTAL, Unit::Count, "Version numbers assigned");
    describe_counter!(
        LEDGER_ENTRIES_REMOVED_TOTAL,
        Unit::Count,
        "Ledger entries removed after template deletion"
    );
}
