use anyhow::{Context, Result};
use drms::{Client, WaitOptions};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Reattaches to an earlier export: `cargo run --example export_from_id -- JSOC_20240101_001`
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let request_id = std::env::args()
        .nth(1)
        .context("usage: export_from_id <request id>")?;

    let client = Client::from_env()?;
    let mut request = client.export_from_id(&request_id)?;

    let opts = WaitOptions::default().with_timeout(Duration::from_secs(600));
    if !request.wait(&opts)? {
        println!("{request} is still pending");
        return Ok(());
    }

    let location = request.request_url()?.unwrap_or_default();
    println!("{request}: {location}");
    for url in request.urls()? {
        println!("{}\t{}", url.record.as_deref().unwrap_or("-"), url.url);
    }
    Ok(())
}
