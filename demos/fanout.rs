//! Fork/join demo: fan a request out over a range, square each element on
//! its way through, and join the results for a synchronous caller.
//!
//! Usage: cargo run --example fanout

use papaline::{fork, join, value, Pipeline, PipelineBuilder, Stage};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let pipeline = PipelineBuilder::new()
        .stage(Stage::new(|args: Vec<u64>| fork(1..=args[0])).with_name("fan-out"))
        .stage(Stage::new(|args: Vec<u64>| value(vec![args[0] * args[0]])).with_name("square"))
        .stage(Stage::new(|args: Vec<u64>| join(args[0])).with_name("fan-in"))
        .build()?;

    let squares = pipeline.run_wait(vec![10])?;
    println!("squares of 1..=10: {squares:?}");
    println!("sum: {}", squares.iter().sum::<u64>());

    pipeline.stop();
    Ok(())
}
