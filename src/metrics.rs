use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use strum::{EnumMessage, IntoEnumIterator};

/// A set of gauges declared as a `strum` enum: the serialized name is the metric name and
/// the message is its description.
pub trait MetricsGauge: IntoEnumIterator + EnumMessage + std::fmt::Display + Sized {
    fn register_all() {
        for gauge in Self::iter() {
            describe_gauge!(gauge.to_string(), gauge.get_message().unwrap_or_default());
        }
    }

    fn init_all() {
        for gauge in Self::iter() {
            gauge.set(0.0);
        }
    }

    fn set(&self, value: f64) {
        gauge!(self.to_string()).set(value);
    }

    fn increment(&self, value: f64) {
        gauge!(self.to_string()).increment(value);
    }
}

/// Serves the Prometheus scrape endpoint on `port`.
pub fn init_metrics(port: &u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, *port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install prometheus exporter")?;
    tracing::info!("Metrics exporter listening on {}", addr);
    Ok(())
}
