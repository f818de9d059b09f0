//! A small blocking Rust client for DRMS data export servers such as JSOC.
//!
//! This crate implements the DRMS export flow:
//! submit an export request, poll until the server has staged the files,
//! then resolve download URLs and fetch the files.
//!
//! ## Quick start
//! - Configure the server and notification address via environment variables
//!   (`DRMS_SERVER`, `DRMS_EMAIL`) or a `.drmsrc` file (supported in the current
//!   directory and in your home directory).
//! - Call [`Client::export`] with a record set, then [`ExportRequest::download`].
//!
//! ```no_run
//! use anyhow::Result;
//! use drms::{Client, DownloadOptions, ExportOptions};
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?.with_email("registered@example.org")?;
//!     let mut request = client.export(
//!         "hmi.m_720s[2014.01.01_00:00:00_TAI/1h]{magnetogram}",
//!         &ExportOptions::default().method("url").protocol("fits"),
//!     )?;
//!     request.download(std::path::Path::new("."), &DownloadOptions::default())?;
//!     Ok(())
//! }
//! ```
//!
//! Export requests must use an email address registered with the server;
//! see [`Client::check_email`].

#![forbid(unsafe_code)]

mod client;
mod config;
mod download;
mod error;
mod export;
mod processing;
mod query;
mod records;
mod resolve;
mod series;
mod server;
mod transport;
mod util;

#[cfg(test)]
mod test_support;

pub use client::{Client, ExportOptions, FilenameFormat};
pub use config::ClientConfig;
pub use download::{DownloadOptions, DownloadOutcome};
pub use error::{Error, Result};
pub use export::{ExportRecord, ExportRequest, ExportStatus, WaitOptions};
pub use processing::{PROCESSING_COMMANDS, ProcessingStep};
pub use query::{
    COLOR_TABLES, ExportMethod, ExportProtocol, ExportQuery, ProtocolArgs, Requestor, SCALING_TYPES,
};
pub use records::{RecordSpec, filename_from_record, parse_record, series_name};
pub use resolve::DownloadUrl;
pub use series::{KeywordInfo, SeriesInfo};
pub use server::{Operation, SERVER_CONFIG_KEYS, ServerConfig, ServerRegistry};
pub use transport::{HttpTransport, Transport};
