//! Export request lifecycle: status tracking, polling and finished-job accessors.
//!
//! Methods taking `&mut self` may issue status queries against the server;
//! those documented as blocking may additionally sleep inside [`ExportRequest::wait`].
//! Methods taking `&self` only read the most recent status reply.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::resolve::{DownloadUrl, ExportListing, resolve_download_urls};
use crate::util::{non_empty_str, urljoin, value_as_f64, value_as_i64};

const STATUS_OK: i64 = 0;
const STATUS_NOT_FOUND: i64 = 6;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_NOT_FOUND_RETRIES: u32 = 5;

/// Export status as classified from the server's numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    /// Finished successfully (code 0).
    Ok,
    /// Queued or being processed (codes 1 and 2).
    Pending(i64),
    /// Not (yet) known to the server (code 6).
    NotFound,
    /// Any other code: the export failed.
    Failed(i64),
}

impl ExportStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            STATUS_OK => ExportStatus::Ok,
            1 | 2 => ExportStatus::Pending(code),
            STATUS_NOT_FOUND => ExportStatus::NotFound,
            other => ExportStatus::Failed(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            ExportStatus::Ok => STATUS_OK,
            ExportStatus::NotFound => STATUS_NOT_FOUND,
            ExportStatus::Pending(c) | ExportStatus::Failed(c) => c,
        }
    }

    /// Codes 1, 2 and 6; the server may still change its answer.
    pub fn is_pending(self) -> bool {
        matches!(self, ExportStatus::Pending(_) | ExportStatus::NotFound)
    }

    pub fn is_ok_or_pending(self) -> bool {
        self == ExportStatus::Ok || self.is_pending()
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One `(record, filename)` row of a finished export.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExportRecord {
    #[serde(default)]
    pub record: Option<String>,
    #[serde(default)]
    pub filename: String,
}

/// Polling parameters for [`ExportRequest::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOptions {
    /// Give up (returning `false`) rather than sleep past this limit.
    pub timeout: Option<Duration>,
    /// Time between status queries; `None` uses the server's suggested `wait`.
    pub poll_interval: Option<Duration>,
    /// How many "not found" answers are tolerated before failing.
    pub not_found_retries: u32,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: Some(DEFAULT_POLL_INTERVAL),
            not_found_retries: DEFAULT_NOT_FOUND_RETRIES,
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_not_found_retries(mut self, retries: u32) -> Self {
        self.not_found_retries = retries;
        self
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    reply: Map<String, Value>,
    captured_at: Instant,
}

/// A submitted export job.
///
/// Created by [`Client::export`] or [`Client::export_from_id`].
#[derive(Debug)]
pub struct ExportRequest<'c> {
    pub(crate) client: &'c Client,
    request_id: Option<String>,
    status: ExportStatus,
    snapshot: Snapshot,
    download_urls: Option<Vec<DownloadUrl>>,
}

impl<'c> ExportRequest<'c> {
    /// Seeds a request from the reply to a submission or status query.
    pub(crate) fn from_reply(client: &'c Client, reply: Value) -> Result<Self> {
        let reply = into_object(reply)?;
        let status = parse_status(&reply, None)?;
        let request_id = parse_request_id(&reply);
        Ok(Self {
            client,
            request_id,
            status,
            snapshot: Snapshot {
                reply,
                captured_at: Instant::now(),
            },
            download_urls: None,
        })
    }

    /// Request identifier; `None` for synchronous `url_quick` exports.
    pub fn id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Status from the most recent reply.
    pub fn status(&self) -> ExportStatus {
        self.status
    }

    /// Export method reported by the server.
    pub fn method(&self) -> Option<&str> {
        non_empty_str(self.snapshot.reply.get("method"))
    }

    /// Export protocol reported by the server.
    pub fn protocol(&self) -> Option<&str> {
        non_empty_str(self.snapshot.reply.get("protocol"))
    }

    /// The full most recent status reply.
    pub fn last_reply(&self) -> &Map<String, Value> {
        &self.snapshot.reply
    }

    /// When the most recent status reply was received.
    pub fn last_refreshed(&self) -> Instant {
        self.snapshot.captured_at
    }

    /// Queries the server for the current status and replaces the stored reply.
    pub fn refresh_status(&mut self) -> Result<()> {
        let Some(id) = self.request_id.clone() else {
            if self.status.is_pending() {
                return Err(Error::UnexpectedReply(
                    "pending export request has no request id to query".to_string(),
                ));
            }
            return Ok(());
        };

        let reply = into_object(self.client.exp_status(&id)?)?;
        let status = parse_status(&reply, Some(self.status))?;
        if status != self.status {
            tracing::info!(request_id = %id, from = %self.status, to = %status, "export status changed");
        }
        if self.request_id.is_none() {
            self.request_id = parse_request_id(&reply);
        }
        self.status = status;
        self.snapshot = Snapshot {
            reply,
            captured_at: Instant::now(),
        };
        Ok(())
    }

    /// Whether the request is no longer pending.
    ///
    /// With `skip_refresh` the cached status is used; otherwise a pending
    /// request triggers exactly one status query.
    pub fn has_finished(&mut self, skip_refresh: bool) -> Result<bool> {
        if !self.status.is_pending() {
            return Ok(true);
        }
        if !skip_refresh {
            self.refresh_status()?;
        }
        Ok(!self.status.is_pending())
    }

    pub fn has_succeeded(&mut self, skip_refresh: bool) -> Result<bool> {
        Ok(self.has_finished(skip_refresh)? && self.status == ExportStatus::Ok)
    }

    pub fn has_failed(&mut self, skip_refresh: bool) -> Result<bool> {
        Ok(self.has_finished(skip_refresh)? && !self.status.is_ok_or_pending())
    }

    /// Returns an [`Error::Export`] if the request has failed.
    ///
    /// A "not found" status only counts as failure when `not_found_ok` is false.
    pub fn error_for_status(&self, not_found_ok: bool) -> Result<()> {
        if self.status.is_ok_or_pending() && (self.status != ExportStatus::NotFound || not_found_ok) {
            return Ok(());
        }
        let message = self
            .snapshot
            .reply
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("DRMS export request failed.")
            .to_string();
        Err(Error::Export {
            message,
            status: self.status.code(),
        })
    }

    /// Polls until the request finishes. Blocking.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` if the next sleep would
    /// exceed `timeout`. A failed export, or more than `not_found_retries`
    /// consecutive "not found" answers, is returned as [`Error::Export`].
    /// Transport errors end the wait immediately.
    pub fn wait(&mut self, opts: &WaitOptions) -> Result<bool> {
        let started = Instant::now();

        if self.has_finished(true)? {
            self.error_for_status(true)?;
            return Ok(true);
        }

        let mut retries_left = opts.not_found_retries;
        loop {
            tracing::debug!(
                request_id = self.id().unwrap_or("none"),
                status = %self.status,
                "export request pending"
            );

            let delay = self.next_poll_delay(opts.poll_interval);
            if let Some(timeout) = opts.timeout {
                if started.elapsed() + delay > timeout {
                    return Ok(false);
                }
            }
            if !delay.is_zero() {
                thread::sleep(delay);
            }

            if self.has_finished(false)? {
                self.error_for_status(true)?;
                return Ok(true);
            }
            if self.status == ExportStatus::NotFound {
                if retries_left == 0 {
                    self.error_for_status(false)?;
                }
                tracing::warn!(
                    request_id = self.id().unwrap_or("none"),
                    retries_left,
                    "export request not found on server"
                );
                retries_left = retries_left.saturating_sub(1);
            }
        }
    }

    fn next_poll_delay(&self, poll_interval: Option<Duration>) -> Duration {
        let interval = poll_interval.unwrap_or_else(|| {
            self.snapshot
                .reply
                .get("wait")
                .and_then(value_as_f64)
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .unwrap_or(DEFAULT_POLL_INTERVAL)
        });
        interval.saturating_sub(self.snapshot.captured_at.elapsed())
    }

    fn ensure_finished(&mut self) -> Result<()> {
        if self.has_finished(true)? {
            self.error_for_status(true)
        } else {
            self.wait(&WaitOptions::default()).map(|_| ())
        }
    }

    fn finished_str(&mut self, key: &str) -> Result<Option<String>> {
        self.ensure_finished()?;
        Ok(non_empty_str(self.snapshot.reply.get(key)).map(str::to_string))
    }

    /// Common server directory of the exported files. Blocking.
    pub fn dir(&mut self) -> Result<Option<String>> {
        self.finished_str("dir")
    }

    /// Tar file path for `url-tar` / `ftp-tar` exports. Blocking.
    pub fn tarfile(&mut self) -> Result<Option<String>> {
        self.finished_str("tarfile")
    }

    /// Name of the text file holding record keywords. Blocking.
    pub fn keywords_file(&mut self) -> Result<Option<String>> {
        self.finished_str("keywords")
    }

    /// Records and filenames of the export. Blocking.
    pub fn data(&mut self) -> Result<Vec<ExportRecord>> {
        self.ensure_finished()?;
        parse_records(self.snapshot.reply.get("data"))
    }

    /// HTTP URL of the export directory, if the server has an HTTP download base. Blocking.
    pub fn request_url(&mut self) -> Result<Option<String>> {
        let Some(dir) = self.dir()? else {
            return Ok(None);
        };
        let Some(base) = self.client.server().http_download_baseurl() else {
            return Ok(None);
        };
        urljoin(base, dir.trim_start_matches('/')).map(Some)
    }

    /// Download URLs of all files of the export. Blocking.
    ///
    /// Computed once per request; a finished export never changes on the server.
    pub fn urls(&mut self) -> Result<&[DownloadUrl]> {
        if self.download_urls.is_none() {
            self.ensure_finished()?;
            let reply = &self.snapshot.reply;
            let listing = ExportListing {
                records: parse_records(reply.get("data"))?,
                dir: non_empty_str(reply.get("dir")),
                tarfile: non_empty_str(reply.get("tarfile")),
                method: non_empty_str(reply.get("method")),
                protocol: non_empty_str(reply.get("protocol")),
            };
            let urls = resolve_download_urls(&listing, self.client.server())?;
            self.download_urls = Some(urls);
        }
        Ok(self.download_urls.as_deref().unwrap_or_default())
    }
}

impl fmt::Display for ExportRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<ExportRequest: id={}, status={}>",
            self.id().unwrap_or("None"),
            self.status
        )
    }
}

fn into_object(reply: Value) -> Result<Map<String, Value>> {
    match reply {
        Value::Object(map) => Ok(map),
        other => Err(Error::UnexpectedReply(format!(
            "expected a JSON object from jsoc_fetch, got {other}"
        ))),
    }
}

fn parse_status(reply: &Map<String, Value>, previous: Option<ExportStatus>) -> Result<ExportStatus> {
    reply
        .get("status")
        .and_then(value_as_i64)
        .map(ExportStatus::from_code)
        .or(previous)
        .ok_or_else(|| Error::UnexpectedReply("export reply has no status".to_string()))
}

// Some protocols (e.g. mpg) report the id as `reqid`; url_quick sends an empty one.
fn parse_request_id(reply: &Map<String, Value>) -> Option<String> {
    non_empty_str(reply.get("requestid"))
        .or_else(|| non_empty_str(reply.get("reqid")))
        .map(str::to_string)
}

fn parse_records(data: Option<&Value>) -> Result<Vec<ExportRecord>> {
    match data {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => Ok(Vec::<ExportRecord>::deserialize(v)?),
    }
}
