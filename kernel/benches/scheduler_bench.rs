//! Scheduler core benchmarks using Criterion
//!
//! These benchmarks measure the hot paths of the scheduler core on the
//! simulated platform:
//! - Scheduling pass over ready lists of growing length
//! - Suspend/resume round trip
//! - Spinlock acquire/release

use std::hint::black_box;
use std::sync::atomic::AtomicU32;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use strand_api::{CreateFlags, ProcessorId, SchedulerConfig, Vector};
use strand_kernel::Kernel;
use strand_sim::{bind_processor, SimPlatform};

extern "C" fn entry(arg: usize) -> u32 {
    arg as u32
}

fn booted(threads: usize) -> (&'static SimPlatform, &'static Kernel) {
    let sim = SimPlatform::new(1).leak();
    let kernel: &'static Kernel =
        Box::leak(Kernel::new(sim, SchedulerConfig::default()).expect("kernel"));
    bind_processor(ProcessorId(0));
    kernel.start_processor().expect("processor start");
    for _ in 0..threads {
        kernel
            .create(entry, 0, 0, CreateFlags::empty())
            .expect("create");
    }
    (sim, kernel)
}

/// Benchmark a clock interrupt that always ends in a scheduling pass
fn bench_scheduling_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduling_pass");
    for threads in [1usize, 16, 64, 250] {
        let (sim, kernel) = booted(threads);
        let quantum = u64::from(kernel.quantum_length());
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, _| {
            b.iter(|| {
                sim.advance_ms(quantum);
                kernel.dispatch_interrupt(black_box(Vector::CLOCK));
            })
        });
    }
    group.finish();
}

/// Benchmark a suspend/resume pair on a ready thread
fn bench_suspend_resume(c: &mut Criterion) {
    let (_sim, kernel) = booted(0);
    let handle = kernel
        .create(entry, 0, 0, CreateFlags::empty())
        .expect("create");
    c.bench_function("suspend_resume", |b| {
        b.iter(|| {
            black_box(kernel.suspend(handle).expect("suspend"));
            black_box(kernel.resume(handle).expect("resume"));
        })
    });
}

/// Benchmark an uncontended spinlock with its IRQL raise and lower
fn bench_spinlock(c: &mut Criterion) {
    let (_sim, kernel) = booted(0);
    let lock = AtomicU32::new(0);
    c.bench_function("spinlock_uncontended", |b| {
        b.iter(|| {
            let irql = kernel.spinlock(black_box(&lock));
            kernel.unlock(&lock, irql);
        })
    });
}

criterion_group!(
    benches,
    bench_scheduling_pass,
    bench_suspend_resume,
    bench_spinlock
);
criterion_main!(benches);
