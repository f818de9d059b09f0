use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result, http_status_error};

/// Network access used by the client: one blocking GET per call, no retries.
pub trait Transport {
    /// Fetches `url` and decodes the reply body as JSON.
    fn get_json(&self, url: &str) -> Result<Value>;

    /// Streams `url` into the file at `target`, returning the number of bytes written.
    fn download(&self, url: &str, target: &Path) -> Result<u64>;
}

/// Character encodings the DRMS CGIs are known to reply in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyEncoding {
    Latin1,
    Utf8,
}

impl ReplyEncoding {
    pub(crate) fn from_label(label: &str) -> Result<Self> {
        match label.to_ascii_lowercase().replace('_', "-").as_str() {
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => Ok(Self::Latin1),
            "utf8" | "utf-8" => Ok(Self::Utf8),
            other => Err(Error::invalid(format!("unsupported reply encoding {other:?}"))),
        }
    }

    pub(crate) fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// [`Transport`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
    encoding: ReplyEncoding,
    progress: bool,
}

impl HttpTransport {
    /// Creates a transport decoding replies with `encoding` (e.g. `latin1`).
    pub fn new(encoding: &str, verify: bool, timeout: Duration) -> Result<Self> {
        let encoding = ReplyEncoding::from_label(encoding)?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("drms-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("drms-rs")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(timeout);
        if !verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| Error::transport("(client setup)", e))?;

        Ok(Self {
            http,
            encoding,
            progress: false,
        })
    }

    /// Shows an `indicatif` progress bar while files are downloaded.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn progress_bar(&self, total: Option<u64>) -> Option<ProgressBar> {
        if !self.progress {
            return None;
        }
        let pb = match total {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::new_spinner(),
        };
        let style = ProgressStyle::with_template(
            "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
        pb.set_style(style);
        Some(pb)
    }
}

impl Transport for HttpTransport {
    fn get_json(&self, url: &str) -> Result<Value> {
        tracing::debug!(%url, "DRMS request");
        let resp = self.http.get(url).send().map_err(|e| Error::transport(url, e))?;

        let status = resp.status();
        let bytes = resp.bytes().map_err(|e| Error::transport(url, e))?;
        let text = self.encoding.decode(&bytes);
        if !status.is_success() {
            return Err(http_status_error(status, url, &text));
        }

        Ok(serde_json::from_str(&text)?)
    }

    fn download(&self, url: &str, target: &Path) -> Result<u64> {
        tracing::debug!(%url, target = %target.display(), "downloading file");
        let resp = self.http.get(url).send().map_err(|e| Error::transport(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(http_status_error(status, url, ""));
        }
        let mut resp = resp;

        let pb = self.progress_bar(resp.content_length());
        let mut out = File::create(target)?;
        let mut written: u64 = 0;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = match resp.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    if let Some(pb) = &pb {
                        pb.abandon();
                    }
                    return Err(Error::transport(url, e));
                }
            };
            out.write_all(&buf[..n])?;
            written += n as u64;
            if let Some(pb) = &pb {
                pb.inc(n as u64);
            }
        }
        out.flush()?;

        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        Ok(written)
    }
}
