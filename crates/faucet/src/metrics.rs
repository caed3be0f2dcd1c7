//! Prometheus metrics for the dispense path

use prometheus::{histogram_opts, opts, Encoder, Histogram, IntCounterVec, Registry, TextEncoder};

/// Faucet metrics in a private registry
#[derive(Clone)]
pub struct FaucetMetrics {
    registry: Registry,
    /// Requests by terminal outcome (`committed` or a reason code)
    pub requests_total: IntCounterVec,
    pub transfer_duration: Histogram,
}

impl FaucetMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            opts!("faucet_requests_total", "Dispense requests by outcome"),
            &["outcome"],
        )?;

        let transfer_duration = Histogram::with_opts(histogram_opts!(
            "faucet_transfer_duration_seconds",
            "Time spent submitting transfers",
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(transfer_duration.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            transfer_duration,
        })
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.requests_total.with_label_values(&[outcome]).inc();
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
