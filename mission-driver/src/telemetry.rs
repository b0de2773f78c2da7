//! Prometheus counters and gauges for the mission pipeline.
//!
//! The recorder is global; without [`install_exporter`] every call here is a
//! no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use shared::Notification;

use crate::error::MissionError;
use crate::pipeline::{MissionResult, ProtocolViolation};

/// Serve `/metrics` on `listen`. Must be called from inside a tokio runtime.
pub fn install_exporter(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    log::info!("metrics exporter listening on {listen}");
    Ok(())
}

pub(crate) fn mission_submitted() {
    counter!("udefx_missions_submitted_total").increment(1);
}

pub(crate) fn mission_rejected(err: &MissionError) {
    counter!("udefx_missions_rejected_total", "kind" => err.kind()).increment(1);
}

pub(crate) fn mission_resolved(result: &MissionResult) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    counter!("udefx_missions_resolved_total", "outcome" => outcome).increment(1);
}

pub(crate) fn notification(n: Notification) {
    let kind = if n.is_ready() {
        "ready"
    } else if n.is_pending_pulse() {
        "pending"
    } else {
        "other"
    };
    counter!("udefx_notifications_total", "kind" => kind).increment(1);
}

pub(crate) fn protocol_violation(v: &ProtocolViolation) {
    let kind = match v {
        ProtocolViolation::UncorrelatedReady { .. } => "uncorrelated_ready",
        ProtocolViolation::UndecodableNotification { .. } => "undecodable",
    };
    counter!("udefx_protocol_violations_total", "kind" => kind).increment(1);
}

pub(crate) fn watch_lost() {
    counter!("udefx_interrupt_watch_lost_total").increment(1);
}

pub(crate) fn queue_depth(depth: usize) {
    gauge!("udefx_mission_queue_depth").set(depth as f64);
}
