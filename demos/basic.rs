//! Basic usage examples for demandweld
//!
//! Run with: cargo run --example basic

use std::time::Duration;

use demandweld::prelude::*;

/// Example 1: Simple number processing
async fn simple_example() -> Result<()> {
    println!("=== Simple Number Processing ===");

    Flow::range(1..11)
        .batch_size(3)
        .for_each(|x| println!("Number: {}", x))
        .await?;

    println!();
    Ok(())
}

/// Example 2: Transform and filter
async fn transform_filter_example() -> Result<()> {
    println!("=== Transform and Filter ===");

    Flow::range(1..21)
        .filter(|x| x % 3 == 0)
        .map(|x| x * x)
        .for_each(|x| println!("Square: {}", x))
        .await?;

    println!();
    Ok(())
}

/// Example 3: A generator written as a plain loop
async fn generator_example() -> Result<()> {
    println!("=== Generator ===");

    let words = Flow::generate(|co| async move {
        for word in ["demand", "drives", "production"] {
            co.emit(word.to_uppercase()).await?;
        }
        Ok(())
    });
    println!("Words: {:?}", words.to_vec().await?);

    println!();
    Ok(())
}

/// Example 4: Collection into a sink
async fn collection_example() -> Result<()> {
    println!("=== Collection ===");

    let collector = CollectSink::new();
    let collector_ref = collector.clone();

    Flow::from_source(FibonacciSource::with_limit(10))
        .sink(collector)
        .await?;

    let items = collector_ref.into_items().await;
    println!("Collected Fibonacci numbers: {:?}", items);

    println!();
    Ok(())
}

/// Example 5: Batching
async fn batching_example() -> Result<()> {
    println!("=== Batching ===");

    Flow::range(1..16)
        .batch(4)
        .for_each(|batch| println!("Batch: {:?}", batch))
        .await?;

    println!();
    Ok(())
}

/// Example 6: Short-circuiting an endless source
async fn short_circuit_example() -> Result<()> {
    println!("=== Short-circuiting ===");

    let endless = Flow::generate(|co| async move {
        let mut i: i64 = 0;
        loop {
            co.emit(i).await?;
            i += 1;
        }
    });
    let found = endless.map(|x| x * 7).any(|x| *x > 100).await?;
    println!("Found a multiple of 7 above 100: {}", found);

    println!();
    Ok(())
}

/// Example 7: Timeouts cancel the whole flow
async fn timeout_example() -> Result<()> {
    println!("=== Timeouts ===");

    let slow = Flow::from_source(IntervalSource::new(
        RangeSource::new(0..100),
        Duration::from_millis(50),
    ));
    match with_timeout(slow.count(), Duration::from_millis(120)).await {
        Ok(count) => println!("Counted {} items", count),
        Err(e) => println!("Gave up: {}", e),
    }

    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("demandweld Basic Usage Examples\n");

    simple_example().await?;
    transform_filter_example().await?;
    generator_example().await?;
    collection_example().await?;
    batching_example().await?;
    short_circuit_example().await?;
    timeout_example().await?;

    println!("All basic examples completed successfully!");
    Ok(())
}
