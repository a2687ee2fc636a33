//! Routing performance benchmarks
//!
//! Measures the non-I/O parts of request routing: wrapper scoring, best
//! wrapper selection over registries of different sizes, and configuration
//! parsing.
//!
//! ## Expected Performance Characteristics
//!
//! - Scoring: Single-digit nanoseconds (a handful of float operations)
//! - Selection: Grows linearly with the number of registered wrappers, since
//!   every candidate's enabled flag, health and statistics are read
//! - Config parsing: Tens of microseconds (one-time startup cost)
//!
//! **Note**: Actual measurements vary with compiler version, CPU architecture, and system load.
//!
//! Run with: `cargo bench`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::str::FromStr;
use std::sync::Arc;
use tiergate::{
    backend::CompletionRequest,
    config::Config,
    wrapper::{WrapperConfig, WrapperFactory, WrapperManager, WrapperStatistics, manager::score_wrapper},
};

/// Benchmark the scoring formula on representative statistics
fn bench_score_wrapper(c: &mut Criterion) {
    let cases = vec![
        ("fresh", WrapperStatistics::default(), true),
        (
            "busy",
            WrapperStatistics {
                total_requests: 10_000,
                successful_requests: 9_800,
                failed_requests: 200,
                average_response_time_ms: 850.0,
                requests_per_minute: 45.0,
                ..WrapperStatistics::default()
            },
            true,
        ),
        (
            "struggling",
            WrapperStatistics {
                total_requests: 500,
                successful_requests: 250,
                failed_requests: 250,
                average_response_time_ms: 4_500.0,
                requests_per_minute: 120.0,
                ..WrapperStatistics::default()
            },
            false,
        ),
    ];

    let mut group = c.benchmark_group("score_wrapper");
    for (name, stats, healthy) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), &stats, |b, s| {
            b.iter(|| score_wrapper(black_box(s), black_box(healthy)));
        });
    }
    group.finish();
}

/// Benchmark selection across registries of direct wrappers
///
/// Direct wrappers do no network work during initialization, so the
/// registry can be built without a backend.
fn bench_get_best_wrapper(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let request = CompletionRequest::new("Explain ownership in one sentence.");

    let mut group = c.benchmark_group("get_best_wrapper");
    for size in [1usize, 8, 64] {
        let manager = runtime.block_on(async {
            let factory = Arc::new(WrapperFactory::default());
            for i in 0..size {
                factory
                    .create_wrapper(WrapperConfig::direct(
                        format!("direct-{}", i),
                        "bench-model",
                        "http://localhost:11434/v1",
                    ))
                    .await
                    .expect("direct wrapper should build");
            }
            WrapperManager::new(factory)
        });

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.to_async(&runtime)
                .iter(|| async { black_box(manager.get_best_wrapper(&request).await) });
        });
    }
    group.finish();
}

/// Benchmark configuration parsing and validation
///
/// Runs once at startup and on every reload.
fn bench_config_parsing(c: &mut Criterion) {
    let toml_str = r#"
[server]
host = "127.0.0.1"
port = 3000

[health]
interval_seconds = 30
healthy_threshold = 2
unhealthy_threshold = 3

[[wrappers]]
name = "gpu-pool"
type = "pool"

[wrappers.custom_settings]
pool_name = "gpu"

[[wrappers]]
name = "reasoning"
type = "task_group"

[wrappers.custom_settings]
group_name = "reasoning"
echelon = "premium"

[[wrappers]]
name = "local"
type = "direct"

[wrappers.custom_settings]
base_url = "http://localhost:11434/v1"
model = "bench-model"
"#;

    c.bench_function("config_parsing", |b| {
        b.iter(|| Config::from_str(black_box(toml_str)).expect("valid config"));
    });
}

criterion_group!(
    benches,
    bench_score_wrapper,
    bench_get_best_wrapper,
    bench_config_parsing,
);
criterion_main!(benches);
