//! Fetches a URL twice through a disk-backed cache.
//!
//! ```text
//! RUST_LOG=replay=debug cargo run --example cached_get -- http://127.0.0.1:8080/ip
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use replay::cache::DiskCache;
use replay::transport::{CachingTransport, TransportOptions};
use replay::verify;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:8080/".to_owned());

    let dir = std::env::temp_dir().join("replay-demo");
    let cache = DiskCache::new(&dir, Some(Duration::from_secs(60)))?;
    let client = CachingTransport::new(
        Arc::new(cache),
        TransportOptions::default().verify(verify::status_in_two_hundreds()),
    )
    .client();

    for attempt in 1..=2 {
        let start = Instant::now();
        let mut response = client.get(&url).await?;
        let body = response.bytes().await?;
        println!(
            "#{attempt}: {} — {} bytes in {:?}",
            response.status(),
            body.len(),
            start.elapsed()
        );
    }

    println!("cache directory: {}", dir.display());
    Ok(())
}
