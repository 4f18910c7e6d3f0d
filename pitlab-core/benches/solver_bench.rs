//! Criterion benchmarks for PitLab hot paths.
//!
//! Benchmarks:
//! 1. Projected-gradient solve across universe sizes
//! 2. Event queue schedule/pop throughput
//! 3. Slice schedule construction

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::{DMatrix, DVector};
use pitlab_core::allocation::{AllocationProblem, ConvexSolver, ProjectedGradientSolver};
use pitlab_core::clock::{EventPayload, EventQueue, TimerKind};
use pitlab_core::config::{PenaltyConfig, SimAlgo};
use pitlab_core::domain::RunId;
use pitlab_core::execution::build_schedule;
use pitlab_core::rng::RngHierarchy;

// ── Helpers ──────────────────────────────────────────────────────────

/// Diagonal-dominant covariance with a one-factor overlay.
fn problem(n: usize) -> AllocationProblem {
    let beta = DVector::from_fn(n, |i, _| 0.8 + 0.4 * ((i as f64) * 0.37).sin());
    let sigma = &beta * beta.transpose() * 0.0004 + DMatrix::identity(n, n) * 0.0009;
    let mu = DVector::from_fn(n, |i, _| 0.001 * ((i as f64) * 1.3).cos());
    let mut p = AllocationProblem::mean_variance(mu, sigma, 5.0, DVector::zeros(n), 0.1);
    p.linear_cost = DVector::from_element(n, 0.0005);
    p.impact = DVector::from_element(n, 0.002);
    p.penalties = PenaltyConfig::default();
    p
}

// ── 1. Solver ────────────────────────────────────────────────────────

fn bench_solver(c: &mut Criterion) {
    let solver = ProjectedGradientSolver::default();
    let mut group = c.benchmark_group("projected_gradient");
    for n in [10usize, 50, 200] {
        let p = problem(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &p, |b, p| {
            b.iter(|| solver.solve(black_box(p)))
        });
    }
    group.finish();
}

// ── 2. Event queue ───────────────────────────────────────────────────

fn bench_queue(c: &mut Criterion) {
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
    c.bench_function("event_queue_10k", |b| {
        b.iter(|| {
            let mut q = EventQueue::new(start);
            for i in 0..10_000i64 {
                let _ = q.schedule(
                    EventPayload::Timer(TimerKind::Heartbeat),
                    start + Duration::milliseconds((i * 7919) % 100_000),
                );
            }
            while let Some(ev) = q.pop_next() {
                black_box(ev);
            }
        })
    });
}

// ── 3. Slicing ───────────────────────────────────────────────────────

fn bench_schedule(c: &mut Criterion) {
    let rng = RngHierarchy::new(7);
    let curve: Vec<f64> = (0..78).map(|i| 1.0 + ((i as f64) / 12.0).cos().abs()).collect();
    c.bench_function("vwap_schedule_78", |b| {
        let mut r = rng.rng_for(&RunId::from_bytes(b"bench"), "vwap", 0);
        b.iter(|| {
            build_schedule(
                SimAlgo::Vwap,
                black_box(250_000),
                78,
                Duration::minutes(390),
                Some(&curve),
                0.25,
                &mut r,
            )
        })
    });
}

criterion_group!(benches, bench_solver, bench_queue, bench_schedule);
criterion_main!(benches);
