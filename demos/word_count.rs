//! Word frequency counter pipeline
//!
//! Reads lines from stdin, fans each line out into its words, normalizes
//! them, and counts frequencies, printing the top words at the end.
//!
//! Usage: cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)

use papaline::{fork, value, Pipeline, PipelineBuilder, Stage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("Word Frequency Counter Pipeline");
    println!("================================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let counts = Arc::new(Mutex::new(HashMap::<String, usize>::new()));
    let counts_in_stage = Arc::clone(&counts);

    let pipeline = PipelineBuilder::new()
        .stage(
            Stage::new(|args: Vec<String>| {
                let words: Vec<String> = args[0]
                    .split_whitespace()
                    .map(|w| w.to_lowercase())
                    .collect();
                fork(words)
            })
            .with_name("split"),
        )
        .stage(
            Stage::new(|args: Vec<String>| {
                let cleaned: String = args[0].chars().filter(|c| c.is_alphanumeric()).collect();
                value(vec![cleaned])
            })
            .with_capacity(200)
            .with_name("clean"),
        )
        .stage(
            Stage::new(move |args: Vec<String>| {
                if args[0].len() > 2 {
                    *counts_in_stage.lock().entry(args[0].clone()).or_insert(0) += 1;
                }
                value(args)
            })
            .with_name("count"),
        )
        .build()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        pipeline.run(vec![line?]);
    }

    // Give in-flight words time to drain before shutting down.
    std::thread::sleep(Duration::from_millis(200));
    pipeline.stop();

    let counts = counts.lock();
    let mut items: Vec<_> = counts.iter().collect();
    items.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    println!("\n=== Top {} Words ===", items.len().min(10));
    for (i, (word, count)) in items.into_iter().take(10).enumerate() {
        println!("{:2}. {} ({})", i + 1, word, count);
    }

    Ok(())
}
