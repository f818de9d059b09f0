use crate::error::{Error, Result};
use crate::export::ExportRecord;
use crate::server::ServerConfig;
use crate::util::{basename, urljoin};

/// Filename the server reports for records without a data file.
pub(crate) const NO_DATA_FILE: &str = "NoDataFile";

/// Record names of synthetic movie entries start with this marker.
const MOVIE_RECORD_MARKER: &str = "movie";

/// One downloadable file of a finished export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadUrl {
    /// Source record; `None` for tar bundles and generated movies.
    pub record: Option<String>,
    /// Server-side file name (without directory).
    pub filename: String,
    pub url: String,
}

/// The fields of a finished export reply the resolver works from.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExportListing<'a> {
    pub(crate) records: Vec<ExportRecord>,
    pub(crate) dir: Option<&'a str>,
    pub(crate) tarfile: Option<&'a str>,
    pub(crate) method: Option<&'a str>,
    pub(crate) protocol: Option<&'a str>,
}

pub(crate) fn resolve_download_urls(
    listing: &ExportListing<'_>,
    server: &ServerConfig,
) -> Result<Vec<DownloadUrl>> {
    let method = listing.method.unwrap_or_default();
    let base = if method.starts_with("url") {
        server.require_url(server.http_download_baseurl(), "http_download_baseurl")?
    } else if method.starts_with("ftp") {
        server.require_url(server.ftp_download_baseurl(), "ftp_download_baseurl")?
    } else {
        return Err(Error::OperationNotSupported(format!(
            "download is not supported for export method {method:?}"
        )));
    };

    let mut rows = listing.records.clone();
    let mut dir = listing.dir;

    if matches!(listing.protocol, Some("mpg" | "mp4")) {
        if let Some(first) = rows.first_mut() {
            if first
                .record
                .as_deref()
                .is_some_and(|r| r.starts_with(MOVIE_RECORD_MARKER))
            {
                first.record = None;
            }
        }
    }

    // A tar export is a single file whose name is already a full server path.
    if let Some(tarfile) = listing.tarfile {
        dir = None;
        rows = vec![ExportRecord {
            record: None,
            filename: tarfile.to_string(),
        }];
    }

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let (filename, path) = match dir {
            None => (basename(&row.filename).to_string(), row.filename.clone()),
            Some(dir) => (row.filename.clone(), format!("{dir}/{}", row.filename)),
        };
        if filename == NO_DATA_FILE {
            continue;
        }
        let url = urljoin(base, path.trim_start_matches('/'))?;
        out.push(DownloadUrl {
            record: row.record,
            filename,
            url,
        });
    }
    Ok(out)
}
