use regex::Regex;
use std::sync::LazyLock;

use crate::series::SeriesInfo;

static RECORD_SET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([\w\.]+)\s*(\[.*\])?\s*(?:\{([\w\s\.,]*)\})?\s*$")
        .unwrap_or_else(|e| panic!("invalid record set pattern: {e}"))
});
static PRIMEKEY_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\[\]]*)\]").unwrap_or_else(|e| panic!("invalid primekey pattern: {e}"))
});
static SEGMENT_SEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s,]+").unwrap_or_else(|e| panic!("invalid separator pattern: {e}")));

/// File extensions carried over from the server filename.
const KNOWN_EXTENSIONS: &[&str] = &[".fits", ".txt", ".jpg", ".mpg", ".mp4", ".tar"];

/// One export record string split into its parts, e.g.
/// `hmi.m_720s[2014.01.01_00:00:00_TAI][3]{magnetogram}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpec {
    pub series: String,
    pub primekeys: Option<Vec<String>>,
    pub segments: Option<Vec<String>>,
}

/// Parses a single export record string; `None` if it does not match.
pub fn parse_record(rs: &str) -> Option<RecordSpec> {
    let caps = RECORD_SET.captures(rs)?;
    let series = caps.get(1)?.as_str().to_string();
    let primekeys = caps.get(2).map(|m| {
        PRIMEKEY_GROUP
            .captures_iter(m.as_str())
            .filter_map(|c| c.get(1).map(|g| g.as_str().to_string()))
            .collect()
    });
    let segments = caps
        .get(3)
        .map(|m| SEGMENT_SEP.split(m.as_str()).map(str::to_string).collect());
    Some(RecordSpec {
        series,
        primekeys,
        segments,
    })
}

/// Series name at the start of a record set query, if any.
pub fn series_name(ds: &str) -> Option<&str> {
    let ds = ds.trim_start();
    let end = ds
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(ds.len());
    if end == 0 { None } else { Some(&ds[..end]) }
}

/// Builds a filesystem-friendly name from a record and its series definition.
///
/// Time primekeys lose their `.`, `:` and `-` characters. When `old_fname`
/// ends in a known extension, that extension is appended. Returns `None` when
/// the number of primekeys does not match the series definition.
pub fn filename_from_record(
    record: &RecordSpec,
    info: &SeriesInfo,
    old_fname: Option<&str>,
) -> Option<String> {
    let mut fname = info.name.clone();

    if let Some(pkeys) = &record.primekeys {
        if pkeys.len() != info.primekeys.len() {
            return None;
        }
        let cleaned: Vec<String> = pkeys
            .iter()
            .zip(&info.primekeys)
            .map(|(value, key)| {
                if info.is_time_key(key) {
                    value.replace(['.', ':', '-'], "")
                } else {
                    value.clone()
                }
            })
            .filter(|v| !v.trim().is_empty())
            .collect();
        if !cleaned.is_empty() {
            fname.push('.');
            fname.push_str(&cleaned.join("."));
        }
    }

    if let Some(segs) = &record.segments {
        let segs: Vec<&str> = segs
            .iter()
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
            .collect();
        if !segs.is_empty() {
            fname.push('.');
            fname.push_str(&segs.join("."));
        }
    }

    if let Some(old) = old_fname {
        if let Some(ext) = KNOWN_EXTENSIONS.iter().find(|ext| old.ends_with(*ext)) {
            fname.push_str(ext);
        }
    }
    Some(fname)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::KeywordInfo;

    fn hmi_info() -> SeriesInfo {
        SeriesInfo {
            name: "hmi.m_720s".to_string(),
            primekeys: vec!["T_REC".to_string(), "CAMERA".to_string()],
            keywords: vec![
                KeywordInfo {
                    name: "T_REC".to_string(),
                    kind: Some("time".to_string()),
                },
                KeywordInfo {
                    name: "CAMERA".to_string(),
                    kind: Some("int".to_string()),
                },
            ],
            note: None,
        }
    }

    #[test]
    fn parses_series_primekeys_and_segments() {
        let spec = parse_record("hmi.m_720s[2014.01.01_00:00:00_TAI][3]{magnetogram}").unwrap();
        assert_eq!(spec.series, "hmi.m_720s");
        assert_eq!(
            spec.primekeys,
            Some(vec!["2014.01.01_00:00:00_TAI".to_string(), "3".to_string()])
        );
        assert_eq!(spec.segments, Some(vec!["magnetogram".to_string()]));

        let bare = parse_record("  aia.lev1  ").unwrap();
        assert_eq!(bare.series, "aia.lev1");
        assert_eq!(bare.primekeys, None);
        assert_eq!(bare.segments, None);

        assert_eq!(parse_record("not a record!"), None);
    }

    #[test]
    fn time_keys_are_cleaned_and_extension_kept() {
        let spec = parse_record("hmi.m_720s[2014.01.01_00:00:00_TAI][3]{magnetogram}").unwrap();
        let name = filename_from_record(&spec, &hmi_info(), Some("abc.magnetogram.fits"));
        assert_eq!(
            name.as_deref(),
            Some("hmi.m_720s.20140101_000000_TAI.3.magnetogram.fits")
        );
    }

    #[test]
    fn unknown_extension_is_dropped() {
        let spec = parse_record("hmi.m_720s[2014.01.01_00:00:00_TAI][3]{magnetogram}").unwrap();
        let name = filename_from_record(&spec, &hmi_info(), Some("x.dat"));
        assert_eq!(name.as_deref(), Some("hmi.m_720s.20140101_000000_TAI.3.magnetogram"));
    }

    #[test]
    fn primekey_count_mismatch_gives_none() {
        let spec = parse_record("hmi.m_720s[2014.01.01_00:00:00_TAI]{magnetogram}").unwrap();
        assert_eq!(filename_from_record(&spec, &hmi_info(), None), None);
    }

    #[test]
    fn several_segments_are_joined() {
        let spec = parse_record("hmi.m_720s[2014.01.01_00:00:00_TAI][3]{magnetogram, bitmap}").unwrap();
        let name = filename_from_record(&spec, &hmi_info(), None);
        assert_eq!(
            name.as_deref(),
            Some("hmi.m_720s.20140101_000000_TAI.3.magnetogram.bitmap")
        );
    }

    #[test]
    fn series_name_prefix() {
        assert_eq!(series_name("hmi.m_45s[2016.01.01]"), Some("hmi.m_45s"));
        assert_eq!(series_name("  aia.lev1_euv_12s"), Some("aia.lev1_euv_12s"));
        assert_eq!(series_name("[x]"), None);
    }
}
