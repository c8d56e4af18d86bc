//! Import run metrics
//!
//! Counters and histograms are recorded through the `metrics` facade. Nothing
//! is exported unless a Prometheus listener address is configured.

use crate::config::MetricsConfig;
use crate::error::{ImportError, Result};
use crate::pipeline::FileOutcome;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub const RUNS_TOTAL: &str = "laserchron_runs_total";
pub const FILES_TOTAL: &str = "laserchron_files_total";
pub const SAMPLES_TOTAL: &str = "laserchron_samples_imported_total";
pub const IMPORT_DURATION: &str = "laserchron_file_import_duration_seconds";

/// Install the Prometheus exporter when a listen address is configured.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    describe();
    let Some(addr) = config.prometheus_addr.as_deref() else {
        return Ok(());
    };
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| ImportError::Config(format!("invalid metrics address '{}': {}", addr, e)))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ImportError::Config(format!("metrics exporter failed: {}", e)))?;
    info!("Prometheus exporter listening at http://{}/metrics", addr);
    Ok(())
}

fn describe() {
    ::metrics::describe_counter!(RUNS_TOTAL, "Pipeline runs started, by kind");
    ::metrics::describe_counter!(FILES_TOTAL, "Files finished, by outcome");
    ::metrics::describe_counter!(SAMPLES_TOTAL, "Sample sessions committed");
    ::metrics::describe_histogram!(
        IMPORT_DURATION,
        ::metrics::Unit::Seconds,
        "Time from decode to commit for one file"
    );
}

/// Metrics for the import pipeline
pub struct ImportMetrics;

impl ImportMetrics {
    pub fn record_run(kind: &'static str) {
        ::metrics::counter!(RUNS_TOTAL, "kind" => kind).increment(1);
    }

    pub fn record_outcome(outcome: &FileOutcome) {
        let label = match outcome {
            FileOutcome::Imported { samples } => {
                ::metrics::counter!(SAMPLES_TOTAL).increment(*samples as u64);
                "imported"
            }
            FileOutcome::AlreadyImported => "skipped",
            FileOutcome::Tracked => "tracked",
            FileOutcome::Failed { .. } => "failed",
        };
        ::metrics::counter!(FILES_TOTAL, "outcome" => label).increment(1);
    }

    pub fn record_import_duration(duration_secs: f64) {
        ::metrics::histogram!(IMPORT_DURATION).record(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FileState;

    #[test]
    fn test_outcomes_are_counted_by_label() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            ImportMetrics::record_run("import");
            ImportMetrics::record_outcome(&FileOutcome::Imported { samples: 3 });
            ImportMetrics::record_outcome(&FileOutcome::AlreadyImported);
            ImportMetrics::record_outcome(&FileOutcome::Failed {
                state: FileState::DecodeFailed,
                error: "Malformed data table: empty data frame".to_string(),
            });
            ImportMetrics::record_import_duration(0.25);
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"laserchron_files_total{outcome="imported"} 1"#), "{}", rendered);
        assert!(rendered.contains(r#"laserchron_files_total{outcome="skipped"} 1"#));
        assert!(rendered.contains(r#"laserchron_files_total{outcome="failed"} 1"#));
        assert!(rendered.contains("laserchron_samples_imported_total 3"));
        assert!(rendered.contains(r#"laserchron_runs_total{kind="import"} 1"#));
        assert!(rendered.contains(IMPORT_DURATION));
    }

    #[test]
    fn test_unset_address_installs_nothing() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
        let bad = MetricsConfig {
            prometheus_addr: Some("not an address".to_string()),
        };
        assert!(matches!(init_metrics(&bad), Err(ImportError::Config(_))));
    }
}
