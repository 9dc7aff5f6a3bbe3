//! Merging, concatenating and concurrent operators
//!
//! Run with: cargo run --example composition

use std::time::Duration;

use demandweld::prelude::*;

/// Example 1: Merging flows as items arrive
async fn merging_example() -> Result<()> {
    println!("=== Merging Flows ===");

    let merged = Flow::merge(vec![
        Flow::range(1..4),
        Flow::range(10..13),
        Flow::range(20..23),
    ]);
    let mut items = merged.to_vec().await?;
    items.sort();
    println!("Merged: {:?}", items);

    println!();
    Ok(())
}

/// Example 2: Concatenation keeps source order
async fn concat_example() -> Result<()> {
    println!("=== Concatenating Flows ===");

    let items = Flow::concat(vec![Flow::range(1..4), Flow::range(10..13)])
        .to_vec()
        .await?;
    println!("Concatenated: {:?}", items);

    println!();
    Ok(())
}

/// Example 3: Errors stop the chain, earlier items still arrive
async fn error_example() -> Result<()> {
    println!("=== Error Propagation ===");

    let result = Flow::range(1..4)
        .concat_with(Flow::failed(Error::custom("source went away")))
        .concat_with(Flow::range(100..103))
        .for_each(|x| println!("Before the error: {}", x))
        .await;
    if let Err(e) = result {
        println!("Flow failed: {}", e);
    }

    println!();
    Ok(())
}

/// Example 4: Bounded concurrency
async fn concurrent_example() -> Result<()> {
    println!("=== Concurrent Map ===");

    let start = std::time::Instant::now();
    let total = Flow::range(0..16)
        .max_concurrency(4)
        .map_concurrent(|x| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(x * 2)
        })
        .fold(0, |acc, x| acc + x)
        .await?;
    println!(
        "Sum {} in {:.2} seconds",
        total,
        start.elapsed().as_secs_f64()
    );

    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("demandweld Composition Examples\n");

    merging_example().await?;
    concat_example().await?;
    error_example().await?;
    concurrent_example().await?;

    println!("All composition examples completed successfully!");
    Ok(())
}
