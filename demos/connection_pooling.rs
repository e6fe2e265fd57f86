//! Connection Pooling Example
//!
//! This example demonstrates registering a node, running concurrent
//! borrows against its pool, and reading back pool status and metrics.
//!
//! Run with: cargo run --example connection_pooling

use redis_pool_manager::{CountingMetrics, Registry, RegistryConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== redis-pool-manager Connection Pooling Example ===\n");

    println!("1. Configuring the registry...");
    let config = RegistryConfig::default()
        .with_pool_bounds(1, 2, 10)
        .with_connection_size(20);
    println!("   min_pools_per_node:     {}", config.min_pools_per_node);
    println!("   initial_pools_per_node: {}", config.initial_pools_per_node);
    println!("   max_pools_per_node:     {}\n", config.max_pools_per_node);

    let metrics = Arc::new(CountingMetrics::new());
    let registry = Registry::new(config, metrics.clone())?;

    println!("2. Registering a node...");
    let url = "redis://127.0.0.1:6379";
    registry.add_node(url).await?;
    println!("   ✓ node registered\n");

    redis_pool_manager::start_background_loops(&registry);

    println!("3. Running 20 concurrent borrows...");
    let start = Instant::now();
    let acquire_timeout = Duration::from_secs(2);
    let mut handles = Vec::new();
    for i in 0..20 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let query_start = Instant::now();
            let result = registry.get_client(url, acquire_timeout).await;
            let elapsed = query_start.elapsed();
            match result {
                Ok(mut client) => {
                    let _: Result<String, _> = redis::cmd("PING").query_async(client.client()).await;
                    println!("   borrow {} completed in {:?}", i + 1, elapsed);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("   borrow {} failed: {}", i + 1, e);
                    Err(e)
                }
            }
        }));
    }

    let mut success = 0;
    let mut failed = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => success += 1,
            Err(_) => failed += 1,
        }
    }
    println!(
        "\n   total time: {:?}, successful: {}, failed: {}\n",
        start.elapsed(),
        success,
        failed
    );

    println!("4. Checking pool status...");
    let report = registry.fetch_pool_status().await;
    for node in &report.nodes {
        println!(
            "   {}: {} pools ({} healthy, {} idle), {}/{} in flight, closing={}",
            node.url,
            node.pool_count,
            node.healthy_count,
            node.idle_count,
            node.in_flight_total,
            node.capacity_total,
            node.closing
        );
    }

    println!("\n5. Checking metrics...");
    let snapshot = metrics.snapshot(url);
    println!("   acquires_ok: {}, acquires_failed: {}", snapshot.acquires_ok, snapshot.acquires_failed);

    println!("\n6. Closing node...");
    registry.close_node(url).await?;
    println!("   ✓ node closed");

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
