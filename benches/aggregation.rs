/// Benchmarks for the spatial and temporal aggregations.
use airmetrics::models::{BoundingBox, RequestData, Sample};
use airmetrics::operation::{AggregationConfig, Operation};
use airmetrics::operations;
use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn get_test_request_data() -> RequestData {
    RequestData {
        bounds: BoundingBox::new(-15.0, -16.0, -55.0, -57.0),
        start: None,
        end: None,
        filters: None,
    }
}

// Samples spread over the box and over a week, some of them malformed.
fn get_test_samples(count: usize) -> Vec<Sample> {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let latitude = -16.0 + (i % 97) as f64 / 97.0;
            let longitude = -57.0 + (i % 193) as f64 / 96.5;
            let value = if i % 50 == 0 {
                f64::NAN
            } else {
                0.1 + (i % 61) as f64 / 100.0
            };
            let timestamp = start + Duration::minutes((i % 10080) as i64);
            Sample::new(latitude, longitude, value, timestamp)
        })
        .collect()
}

type ExecuteFn = dyn Fn(&AggregationConfig, &RequestData, &[Sample]);

fn spatial(config: &AggregationConfig, request_data: &RequestData, samples: &[Sample]) {
    black_box(operations::Spatial::execute(config, request_data, samples));
}

fn temporal(config: &AggregationConfig, request_data: &RequestData, samples: &[Sample]) {
    black_box(operations::Temporal::execute(config, request_data, samples));
}

fn criterion_benchmark(c: &mut Criterion) {
    let request_data = get_test_request_data();
    let config = AggregationConfig::default();
    for size_k in [1, 16, 256] {
        let samples = get_test_samples(size_k * 1024);
        let operations: [(&str, Box<ExecuteFn>); 2] =
            [("spatial", Box::new(spatial)), ("temporal", Box::new(temporal))];
        for (op_name, execute) in operations {
            let name = format!("{}({}k samples)", op_name, size_k);
            c.bench_function(&name, |b| {
                b.iter(|| execute(black_box(&config), &request_data, black_box(&samples)))
            });
        }
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
