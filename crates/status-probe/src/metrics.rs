use std::path::Path;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts};

lazy_static::lazy_static! {
    pub static ref FETCH_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        Opts::new(
            "status_probe_fetch_total",
            "Total number of health fetches by result"
        ),
        &["result"]
    )
    .unwrap();

    pub static ref FETCH_DURATION: HistogramVec = prometheus::register_histogram_vec!(
        HistogramOpts::new(
            "status_probe_fetch_duration_seconds",
            "Duration of health fetches in seconds"
        ),
        &["result"]
    )
    .unwrap();
}

/// Record one settled fetch. `result` is `success` or a `FetchError::kind`.
pub fn record_fetch(result: &str, seconds: f64) {
    FETCH_TOTAL.with_label_values(&[result]).inc();
    FETCH_DURATION
        .with_label_values(&[result])
        .observe(seconds);
}

/// Render all registered metrics in the Prometheus text format.
pub fn encode() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Write metrics for a node_exporter textfile collector.
///
/// The file is written next to `path` and renamed into place.
pub fn write_textfile(path: &Path) -> anyhow::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, encode()?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
