use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::export::{ExportRequest, WaitOptions};
use crate::query::ExportMethod;

const PART_SUFFIX: &str = ".part";

/// Selection and naming options for [`ExportRequest::download`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Positions in [`ExportRequest::urls`] to fetch; all files when `None`.
    /// Ignored for tar exports, which consist of a single file.
    pub indices: Option<Vec<usize>>,
    /// Name local files after their records instead of the server filename.
    /// Defaults to `true` for `url_quick` exports only.
    pub filenames_from_records: Option<bool>,
}

impl DownloadOptions {
    pub fn index(mut self, index: usize) -> Self {
        self.indices = Some(vec![index]);
        self
    }

    pub fn indices(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.indices = Some(indices.into_iter().collect());
        self
    }

    pub fn filenames_from_records(mut self, enabled: bool) -> Self {
        self.filenames_from_records = Some(enabled);
        self
    }
}

/// Result of one attempted file download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub record: Option<String>,
    pub url: String,
    /// Local file, or `None` if the transfer failed.
    pub path: Option<PathBuf>,
}

impl ExportRequest<'_> {
    /// Downloads the exported files into `directory`, which must exist. Blocking.
    ///
    /// Waits for the export to finish first. Existing files are never
    /// overwritten: an ascending `.1`, `.2`, ... suffix is appended instead.
    /// Each file is written to a `.part` sibling and renamed when complete.
    /// A failed transfer yields a `None` path for that file and the
    /// remaining files are still fetched.
    pub fn download(&mut self, directory: &Path, opts: &DownloadOptions) -> Result<Vec<DownloadOutcome>> {
        let out_dir = std::path::absolute(directory)?;
        if !out_dir.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("download directory {} does not exist", out_dir.display()),
            )));
        }

        self.wait(&WaitOptions::default())?;

        let from_records = opts
            .filenames_from_records
            .unwrap_or_else(|| self.method() == Some(ExportMethod::UrlQuick.as_str()));
        let is_tar = self.tarfile()?.is_some();

        let urls = self.urls()?.to_vec();
        let selected = match &opts.indices {
            Some(indices) if !is_tar => indices
                .iter()
                .map(|&i| {
                    urls.get(i).cloned().ok_or_else(|| {
                        Error::invalid(format!("file index {i} out of range (0..{})", urls.len()))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            _ => urls,
        };

        let client = self.client;
        let total = selected.len();
        let mut outcomes = Vec::with_capacity(total);
        for (i, file) in selected.into_iter().enumerate() {
            let local_name = match (&file.record, from_records) {
                (Some(record), true) => client
                    .filename_from_export_record(record, Some(&file.filename))
                    .unwrap_or_else(|| file.filename.clone()),
                _ => file.filename.clone(),
            };

            let target = out_dir.join(&local_name);
            let reserved = next_available_path(&target);
            let tmp = next_available_path(&with_suffix(&reserved, PART_SUFFIX));

            tracing::info!(
                file = i + 1,
                of = total,
                record = file.record.as_deref().unwrap_or("-"),
                filename = %file.filename,
                "downloading export file"
            );

            let path = match client.transport().download(&file.url, &tmp) {
                Ok(bytes) => {
                    let final_path = next_available_path(&target);
                    std::fs::rename(&tmp, &final_path)?;
                    tracing::info!(path = %final_path.display(), bytes, "download complete");
                    Some(final_path)
                }
                Err(e) => {
                    tracing::warn!(url = %file.url, error = %e, "could not download file");
                    if tmp.exists() {
                        if let Err(rm) = std::fs::remove_file(&tmp) {
                            tracing::warn!(path = %tmp.display(), error = %rm, "could not remove partial file");
                        }
                    }
                    None
                }
            };

            outcomes.push(DownloadOutcome {
                record: file.record,
                url: file.url,
                path,
            });
        }
        Ok(outcomes)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// `path` itself if unused, otherwise the first free `path.N` (N = 1, 2, ...).
pub(crate) fn next_available_path(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    let mut i: u32 = 1;
    while candidate.exists() {
        candidate = with_suffix(path, &format!(".{i}"));
        i += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportRequest;
    use crate::test_support::{StubTransport, hmi_series_reply, stub_client};
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn quick_export(records: &[(&str, &str)]) -> Value {
        let data: Vec<Value> = records
            .iter()
            .map(|(r, f)| json!({"record": r, "filename": f}))
            .collect();
        json!({
            "status": 0,
            "requestid": "",
            "method": "url_quick",
            "protocol": "as-is",
            "dir": "",
            "data": data
        })
    }

    const REC_A: &str = "hmi.m_720s[2014.01.01_00:00:00_TAI][3]{magnetogram}";
    const REC_B: &str = "hmi.m_720s[2014.01.01_00:12:00_TAI][3]{magnetogram}";

    #[test]
    fn next_available_path_appends_counter() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("x.fits");
        assert_eq!(next_available_path(&p), p);
        std::fs::write(&p, b"1").unwrap();
        assert_eq!(next_available_path(&p), dir.path().join("x.fits.1"));
        std::fs::write(dir.path().join("x.fits.1"), b"2").unwrap();
        assert_eq!(next_available_path(&p), dir.path().join("x.fits.2"));
    }

    #[test]
    fn missing_directory_fails_before_network() {
        let stub = StubTransport::new();
        stub.push_status(json!({"status": 0}));
        let client = stub_client(&stub);
        let mut req = ExportRequest::from_reply(&client, json!({"status": 1, "requestid": "X"})).unwrap();
        let dir = TempDir::new().unwrap();
        let err = req
            .download(&dir.path().join("nope"), &DownloadOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(stub.calls().is_empty());
    }

    #[test]
    fn url_quick_names_files_after_records() {
        let stub = StubTransport::new();
        stub.add_series("hmi.m_720s", hmi_series_reply());
        let client = stub_client(&stub);
        let mut req = ExportRequest::from_reply(
            &client,
            quick_export(&[(REC_A, "/SUM1/D1/S00000/magnetogram.fits")]),
        )
        .unwrap();

        let dir = TempDir::new().unwrap();
        let out = req.download(dir.path(), &DownloadOptions::default()).unwrap();
        assert_eq!(out.len(), 1);
        let path = out[0].path.clone().unwrap();
        assert_eq!(
            path,
            dir.path().join("hmi.m_720s.20140101_000000_TAI.3.magnetogram.fits")
        );
        assert!(path.exists());
        assert_eq!(out[0].url, "http://jsoc.stanford.edu/SUM1/D1/S00000/magnetogram.fits");

        let plain = req
            .download(dir.path(), &DownloadOptions::default().filenames_from_records(false))
            .unwrap();
        assert_eq!(plain[0].path.as_deref(), Some(dir.path().join("magnetogram.fits").as_path()));
    }

    #[test]
    fn unknown_series_falls_back_to_server_filename() {
        let stub = StubTransport::new();
        let client = stub_client(&stub);
        let mut req = ExportRequest::from_reply(
            &client,
            quick_export(&[("no.such[1]{seg}", "/SUM1/D1/S00000/seg.fits")]),
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        let out = req.download(dir.path(), &DownloadOptions::default()).unwrap();
        assert_eq!(out[0].path.as_deref(), Some(dir.path().join("seg.fits").as_path()));
    }

    #[test]
    fn colliding_names_never_overwrite() {
        let stub = StubTransport::new();
        stub.add_series("hmi.m_720s", hmi_series_reply());
        let client = stub_client(&stub);
        // Both records map to the same local name.
        let mut req = ExportRequest::from_reply(
            &client,
            quick_export(&[
                (REC_A, "/SUM1/D1/S00000/magnetogram.fits"),
                (REC_A, "/SUM2/D7/S00000/magnetogram.fits"),
            ]),
        )
        .unwrap();

        let dir = TempDir::new().unwrap();
        let name = "hmi.m_720s.20140101_000000_TAI.3.magnetogram.fits";
        std::fs::write(dir.path().join(name), b"existing").unwrap();

        let out = req.download(dir.path(), &DownloadOptions::default()).unwrap();
        let p1 = out[0].path.clone().unwrap();
        let p2 = out[1].path.clone().unwrap();
        assert_eq!(p1, dir.path().join(format!("{name}.1")));
        assert_eq!(p2, dir.path().join(format!("{name}.2")));
        assert_eq!(std::fs::read(dir.path().join(name)).unwrap(), b"existing");
        assert_ne!(std::fs::read(&p1).unwrap(), std::fs::read(&p2).unwrap());
        assert!(!dir.path().join(format!("{name}.1.part")).exists());
    }

    #[test]
    fn one_failed_transfer_does_not_abort_the_batch() {
        let stub = StubTransport::new();
        let client = stub_client(&stub);
        let mut req = ExportRequest::from_reply(
            &client,
            json!({
                "status": 0,
                "requestid": "JSOC_1",
                "method": "url",
                "protocol": "fits",
                "dir": "/SUM1/D1/S00000",
                "data": [
                    {"record": "a[1]", "filename": "a.fits"},
                    {"record": "a[2]", "filename": "b.fits"},
                    {"record": "a[3]", "filename": "c.fits"}
                ]
            }),
        )
        .unwrap();
        stub.fail_download("http://jsoc.stanford.edu/SUM1/D1/S00000/b.fits");

        let dir = TempDir::new().unwrap();
        let out = req.download(dir.path(), &DownloadOptions::default()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.iter().filter(|o| o.path.is_none()).count(), 1);
        assert!(out[1].path.is_none());
        assert_eq!(out[1].record.as_deref(), Some("a[2]"));
        assert!(out[0].path.as_ref().is_some_and(|p| p.ends_with("a.fits")));
        assert!(out[2].path.as_ref().is_some_and(|p| p.ends_with("c.fits")));
        assert_eq!(stub.downloads().len(), 3);
    }

    #[test]
    fn indices_select_files() {
        let stub = StubTransport::new();
        let client = stub_client(&stub);
        let mut req = ExportRequest::from_reply(
            &client,
            json!({
                "status": 0, "requestid": "JSOC_1", "method": "url", "protocol": "fits",
                "dir": "/d",
                "data": [
                    {"record": "a[1]", "filename": "a.fits"},
                    {"record": "a[2]", "filename": "b.fits"},
                    {"record": "a[3]", "filename": "c.fits"}
                ]
            }),
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        let out = req.download(dir.path(), &DownloadOptions::default().indices([2, 0])).unwrap();
        let names: Vec<_> = out.iter().map(|o| o.record.clone().unwrap()).collect();
        assert_eq!(names, vec!["a[3]", "a[1]"]);

        let err = req.download(dir.path(), &DownloadOptions::default().index(7)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn tar_export_ignores_indices_and_record_naming() {
        let stub = StubTransport::new();
        let client = stub_client(&stub);
        let mut req = ExportRequest::from_reply(
            &client,
            json!({
                "status": 0, "requestid": "JSOC_T", "method": "url-tar", "protocol": "fits",
                "dir": "/SUM5/D5/S00000",
                "tarfile": "/SUM5/D5/S00000/JSOC_T.tar",
                "data": [
                    {"record": "a[1]", "filename": "a.fits"},
                    {"record": "a[2]", "filename": "b.fits"}
                ]
            }),
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        let opts = DownloadOptions::default().index(1).filenames_from_records(true);
        let out = req.download(dir.path(), &opts).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record, None);
        assert_eq!(out[0].path.as_deref(), Some(dir.path().join("JSOC_T.tar").as_path()));
    }

    #[test]
    fn failed_export_is_reported_not_downloaded() {
        let stub = StubTransport::new();
        let client = stub_client(&stub);
        let mut req = ExportRequest::from_reply(
            &client,
            json!({"status": 4, "requestid": "X", "error": "bad"}),
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            req.download(dir.path(), &DownloadOptions::default()),
            Err(Error::Export { status: 4, .. })
        ));
        assert!(stub.downloads().is_empty());
    }
}
