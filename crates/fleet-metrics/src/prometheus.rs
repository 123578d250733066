//! Prometheus text exposition format.

use crate::registry::{InstanceLabels, MetricsSnapshot};

fn label_set(l: &InstanceLabels) -> String {
    format!(
        "project=\"{}\",instance=\"{}\",kind=\"{}\",tenancy=\"{}\"",
        escape(&l.project),
        escape(&l.instance),
        escape(&l.kind),
        escape(&l.tenancy)
    )
}

fn escape(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn family<V: std::fmt::Display>(
    out: &mut String,
    name: &str,
    help: &str,
    kind: &str,
    samples: &[(InstanceLabels, V)],
) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} {kind}\n"));
    for (labels, value) in samples {
        out.push_str(&format!("{name}{{{}}} {value}\n", label_set(labels)));
    }
}

/// Render a registry snapshot into Prometheus text format.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    family(
        &mut out,
        "fleet_instance_status",
        "Instance running status (running 2, provisioning/syncing/degraded 1, paused/expired 0, error -1).",
        "gauge",
        &snapshot.status,
    );
    family(
        &mut out,
        "fleet_instance_age_seconds",
        "Seconds since the instance was last started.",
        "gauge",
        &snapshot.age_secs,
    );
    family(
        &mut out,
        "fleet_dcu_usage_total",
        "Consumed DCU.",
        "counter",
        &snapshot.usage_dcu,
    );
    family(
        &mut out,
        "fleet_instance_restarts_total",
        "Transitions from paused or provisioning back to running.",
        "counter",
        &snapshot.restarts,
    );
    family(
        &mut out,
        "fleet_instance_last_activity_seconds",
        "Last heartbeat reported by the workload, epoch seconds.",
        "gauge",
        &snapshot.last_activity,
    );

    out
}
