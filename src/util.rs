use serde_json::Value;
use url::Url;
use url::form_urlencoded;

use crate::error::{Error, Result};

/// Resolves `path` against `base` (RFC 3986 reference resolution).
pub(crate) fn urljoin(base: &str, path: &str) -> Result<String> {
    let base = Url::parse(base).map_err(|e| Error::invalid(format!("invalid base URL {base:?}: {e}")))?;
    let joined = base
        .join(path)
        .map_err(|e| Error::invalid(format!("cannot join {path:?} onto {base}: {e}")))?;
    Ok(joined.to_string())
}

/// Appends form-encoded `params` to `endpoint` as its query string.
pub(crate) fn with_query(endpoint: &str, params: &[(&str, &str)]) -> String {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in params {
        ser.append_pair(k, v);
    }
    let query = ser.finish();
    if query.is_empty() {
        return endpoint.to_string();
    }
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{sep}{query}")
}

/// Interprets a JSON number or numeric string as an integer.
pub(crate) fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Interprets a JSON number or numeric string as seconds.
pub(crate) fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-empty string value, `None` for missing, null or empty.
pub(crate) fn non_empty_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Last `/`-separated component of a server path.
pub(crate) fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urljoin_resolves_relative_paths() {
        assert_eq!(
            urljoin("http://jsoc.stanford.edu/", "SUM1/D1/S0/a.fits").unwrap(),
            "http://jsoc.stanford.edu/SUM1/D1/S0/a.fits"
        );
        assert_eq!(
            urljoin("http://jsoc.stanford.edu/cgi-bin/ajax/", "jsoc_fetch").unwrap(),
            "http://jsoc.stanford.edu/cgi-bin/ajax/jsoc_fetch"
        );
        assert_eq!(
            urljoin("ftp://pail.stanford.edu/export/", "JSOC_1/x.tar").unwrap(),
            "ftp://pail.stanford.edu/export/JSOC_1/x.tar"
        );
        assert!(urljoin("not a url", "x").is_err());
    }

    #[test]
    fn with_query_encodes_pairs() {
        let url = with_query(
            "http://x/jsoc_fetch",
            &[("op", "exp_status"), ("requestid", "JSOC_2024 1")],
        );
        assert_eq!(url, "http://x/jsoc_fetch?op=exp_status&requestid=JSOC_2024+1");
        assert_eq!(with_query("http://x/a?b=1", &[("c", "2")]), "http://x/a?b=1&c=2");
        assert_eq!(with_query("http://x/a", &[]), "http://x/a");
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(value_as_i64(&json!(2)), Some(2));
        assert_eq!(value_as_i64(&json!("6")), Some(6));
        assert_eq!(value_as_i64(&json!(null)), None);
        assert_eq!(value_as_f64(&json!("1.5")), Some(1.5));
        assert_eq!(value_as_f64(&json!(3)), Some(3.0));
    }

    #[test]
    fn basename_and_non_empty() {
        assert_eq!(basename("/SUM1/D1/x.tar"), "x.tar");
        assert_eq!(basename("x.tar"), "x.tar");
        assert_eq!(non_empty_str(Some(&json!(""))), None);
        assert_eq!(non_empty_str(Some(&json!("d"))), Some("d"));
        assert_eq!(non_empty_str(None), None);
    }
}
