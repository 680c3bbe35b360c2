use armature_upstream::{
    BreakerSettings, Registry, Visited, decorrelated_jitter, exponential, select_next,
};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");
    let base = Duration::from_millis(10);
    let cap = Duration::from_millis(50);

    group.bench_function("exponential", |b| {
        b.iter(|| exponential(black_box(4), base, cap, base))
    });

    group.bench_function("decorrelated_jitter", |b| {
        let previous = Duration::from_millis(30);
        b.iter(|| decorrelated_jitter(black_box(4), base, cap, black_box(previous)))
    });

    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_next");
    let hosts: Vec<String> = (0..16).map(|i| format!("http://10.0.0.{}:8080", i)).collect();

    group.bench_function("all_closed", |b| {
        let registry = Registry::new(hosts.clone(), BreakerSettings::default());
        let visited = Visited::new(registry.len());
        b.iter(|| select_next(black_box(&registry), &visited))
    });

    group.bench_function("most_open", |b| {
        let settings = BreakerSettings {
            successive_fail_threshold: 1,
            tripped_base_time: Duration::from_secs(3600),
            tripped_time_max: Duration::from_secs(3600),
            ..BreakerSettings::default()
        };
        let registry = Registry::new(hosts.clone(), settings);
        for resource in &registry.resources()[..15] {
            resource.record_failure();
        }
        let visited = Visited::new(registry.len());
        b.iter(|| select_next(black_box(&registry), &visited))
    });

    group.bench_function("half_visited", |b| {
        let registry = Registry::new(hosts.clone(), BreakerSettings::default());
        let mut visited = Visited::new(registry.len());
        for resource in &registry.resources()[..8] {
            visited.insert(resource);
        }
        b.iter(|| select_next(black_box(&registry), &visited))
    });

    group.finish();
}

criterion_group!(benches, bench_backoff, bench_selection);
criterion_main!(benches);
