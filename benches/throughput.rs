use criterion::{black_box, criterion_group, criterion_main, Criterion};
use papaline::{value, Pipeline, PipelineBuilder, Stage, WorkerPool};
use std::sync::Arc;
use std::time::Duration;

fn passthrough() -> Stage<u64> {
    Stage::new(|args: Vec<u64>| value(args)).with_capacity(1000)
}

fn benchmark_single_stage_throughput(c: &mut Criterion) {
    c.bench_function("single_stage_1000_msgs", |b| {
        b.iter(|| {
            let pipeline = PipelineBuilder::new()
                .stage(passthrough())
                .build()
                .expect("Build failed");

            for i in 0..999u64 {
                pipeline.run(black_box(vec![i]));
            }
            let _ = pipeline.run_wait(vec![999]);
            pipeline.stop();
        });
    });
}

fn benchmark_three_stage_throughput(c: &mut Criterion) {
    c.bench_function("three_stage_1000_msgs", |b| {
        b.iter(|| {
            let pipeline = PipelineBuilder::new()
                .stage(passthrough())
                .stage(passthrough())
                .stage(passthrough())
                .build()
                .expect("Build failed");

            for i in 0..999u64 {
                pipeline.run(black_box(vec![i]));
            }
            let _ = pipeline.run_wait(vec![999]);
            pipeline.stop();
        });
    });
}

fn benchmark_pool_engine_throughput(c: &mut Criterion) {
    c.bench_function("pool_two_stage_1000_msgs", |b| {
        b.iter(|| {
            let pool = Arc::new(WorkerPool::new(4, 1000));
            let pipeline = PipelineBuilder::new()
                .stage(Stage::new(|args: Vec<u64>| value(vec![args[0] + 1])))
                .stage(Stage::new(|args: Vec<u64>| value(vec![args[0] * 2])))
                .build_pooled(Arc::clone(&pool))
                .expect("Build failed");

            for i in 0..999u64 {
                pipeline.run(black_box(vec![i]));
            }
            let _ = pipeline.run_wait(vec![999]);
            pool.close();
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_single_stage_throughput, benchmark_three_stage_throughput, benchmark_pool_engine_throughput
);
criterion_main!(benches);
