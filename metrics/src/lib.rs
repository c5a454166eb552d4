use std::time::{Duration, Instant};

use opentelemetry::{metrics::Histogram, KeyValue};

pub mod registry_stats {
    use opentelemetry::metrics::{Counter, Histogram};

    #[derive(Debug)]
    pub struct Metrics {
        pub writes: Histogram<f64>,
        pub reads: Histogram<f64>,
        pub validation_failures: Counter<u64>,
        pub functions_created: Counter<u64>,
        pub functions_updated: Counter<u64>,
        pub functions_deleted: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("fn-registry");

            let writes = meter
                .f64_histogram("fn_registry.store.writes")
                .with_description("function store write latencies in seconds")
                .build();

            let reads = meter
                .f64_histogram("fn_registry.store.reads")
                .with_description("function store read latencies in seconds")
                .build();

            let validation_failures = meter
                .u64_counter("fn_registry.validation_failures")
                .with_description("number of rejected function definitions")
                .build();

            let functions_created = meter
                .u64_counter("fn_registry.functions_created")
                .with_description("number of functions created")
                .build();

            let functions_updated = meter
                .u64_counter("fn_registry.functions_updated")
                .with_description("number of functions updated")
                .build();

            let functions_deleted = meter
                .u64_counter("fn_registry.functions_deleted")
                .with_description("number of functions deleted")
                .build();

            Metrics {
                writes,
                reads,
                validation_failures,
                functions_created,
                functions_updated,
                functions_deleted,
            }
        }
    }
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

/// Records the time between `start_with_labels` and drop into the wrapped metric.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: Vec<KeyValue>,
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start_with_labels(metric: &'a T, labels: &[KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels: labels.to_vec(),
        }
    }
}

impl<'a, T: TimerUpdate + Sync> Drop for Timer<'a, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), &self.labels);
    }
}
