use anyhow::Result;
use drms::{Client, DownloadOptions, ExportOptions};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Set DRMS_EMAIL (or `email:` in `.drmsrc`) to an address registered with JSOC.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = Client::from_env()?;
    if let Some(email) = client.email() {
        if !client.check_email(email)? {
            anyhow::bail!("{email} is not registered for JSOC exports");
        }
    }

    let ds = "hmi.m_720s[2014.01.01_00:00:00_TAI/1h]{magnetogram}";
    let opts = ExportOptions::default().method("url").protocol("as-is");
    let mut request = client.export(ds, &opts)?;
    println!("{request}");

    let out_dir = Path::new("downloads");
    std::fs::create_dir_all(out_dir)?;
    for file in request.download(out_dir, &DownloadOptions::default())? {
        match file.path {
            Some(path) => println!("{} -> {}", file.url, path.display()),
            None => println!("{} failed", file.url),
        }
    }
    Ok(())
}
