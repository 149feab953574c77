//! Observability bootstrap (C18, SPEC_FULL.md §10.4).
//!
//! Installs the global Prometheus recorder that every `counter!`/`gauge!`/
//! `histogram!` call site in this crate writes through, and exposes the
//! rendered text for the `/metrics` HTTP route. Metric names follow spec §6
//! exactly: `upstream_messages_received_total{channel}`,
//! `alerts_fired_total{alert_type}`, `ws_messages_sent_total{channel}`,
//! `trade_classification_duration_seconds`, `db_write_duration_seconds{table}`,
//! `http_request_duration_seconds{method,path,status}`,
//! `ws_connections_active{channel}`, `db_pool_active_connections`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub fn install() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| anyhow::anyhow!("failed to install prometheus recorder: {err}"))?;
    Ok(handle)
}
