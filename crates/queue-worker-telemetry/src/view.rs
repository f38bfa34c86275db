use crate::TelemetryError;
use queue_worker_core::WORKSPACE_COMPUTE_LATENCY_METRIC;

/// Bucket boundaries, in milliseconds, for workspace compute latency
pub const WORKSPACE_COMPUTE_LATENCY_BUCKETS_MS: [f64; 19] = [
    500.0,
    1_000.0,
    1_500.0,
    5_000.0,
    10_000.0,
    15_000.0,
    30_000.0,
    45_000.0,
    60_000.0,
    90_000.0,
    120_000.0,
    180_000.0,
    240_000.0,
    300_000.0,
    600_000.0,
    1_800_000.0,
    3_600_000.0,
    86_400_000.0,
    604_800_000.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    ExplicitBuckets(Vec<f64>),
}

/// Aggregation override for one named instrument
#[derive(Debug, Clone, PartialEq)]
pub struct MetricView {
    pub instrument_name: String,
    pub instrument_kind: InstrumentKind,
    pub aggregation: Aggregation,
}

impl MetricView {
    /// Histogram view with explicit bucket boundaries; boundaries must be strictly ascending.
    pub fn explicit_buckets(
        instrument_name: impl Into<String>,
        buckets: Vec<f64>,
    ) -> Result<Self, TelemetryError> {
        let instrument_name = instrument_name.into();
        if buckets.is_empty() {
            return Err(TelemetryError::InvalidView {
                instrument: instrument_name,
                reason: "no bucket boundaries".to_string(),
            });
        }
        if buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TelemetryError::InvalidView {
                instrument: instrument_name,
                reason: "bucket boundaries must be strictly ascending".to_string(),
            });
        }
        Ok(MetricView {
            instrument_name,
            instrument_kind: InstrumentKind::Histogram,
            aggregation: Aggregation::ExplicitBuckets(buckets),
        })
    }

    pub fn matches(&self, name: &str, kind: InstrumentKind) -> bool {
        self.instrument_name == name && self.instrument_kind == kind
    }
}

pub fn workspace_compute_latency_view() -> MetricView {
    MetricView {
        instrument_name: WORKSPACE_COMPUTE_LATENCY_METRIC.to_string(),
        instrument_kind: InstrumentKind::Histogram,
        aggregation: Aggregation::ExplicitBuckets(WORKSPACE_COMPUTE_LATENCY_BUCKETS_MS.to_vec()),
    }
}

/// Buckets of the first histogram view matching `name`, if any
pub(crate) fn histogram_buckets(views: &[MetricView], name: &str) -> Option<Vec<f64>> {
    views
        .iter()
        .find(|v| v.matches(name, InstrumentKind::Histogram))
        .map(|v| match &v.aggregation {
            Aggregation::ExplicitBuckets(b) => b.clone(),
        })
}
