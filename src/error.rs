use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias for DRMS operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the DRMS client.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument was rejected before any network call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The export request finished with a non-OK status (or was not found).
    #[error("{message} [status={status}]")]
    Export { message: String, status: i64 },

    /// A metadata query was answered with a non-zero status.
    #[error("{message} [status={status}]")]
    Query { message: String, status: i64 },

    /// The server configuration does not provide the requested operation.
    #[error("operation not supported: {0}")]
    OperationNotSupported(String),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// The server answered, but the reply lacks a field the client relies on.
    #[error("unexpected server reply: {0}")]
    UnexpectedReply(String),

    /// Network or HTTP level failure.
    #[error("request failed ({url}): {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to parse JSON reply: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0:#}")]
    Config(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn transport(
        url: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Transport {
            url: url.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Numeric server status carried by export and query errors.
    pub fn status(&self) -> Option<i64> {
        match self {
            Error::Export { status, .. } | Error::Query { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Builds the error for a non-2xx HTTP reply from one of the CGIs.
pub(crate) fn http_status_error(status: StatusCode, url: &str, body: &str) -> Error {
    let body = body.trim();
    let excerpt: String = body.chars().take(200).collect();

    if status == StatusCode::NOT_FOUND {
        return Error::transport(
            url,
            format!(
                "DRMS endpoint not found (HTTP 404).\n- The CGI path may have changed, or the server's cgi_baseurl is incorrect\n- Default JSOC base: http://jsoc.stanford.edu/cgi-bin/ajax/\n\nServer message: {}",
                if excerpt.is_empty() { "(none)" } else { excerpt.as_str() }
            ),
        );
    }

    if status.is_server_error() {
        return Error::transport(
            url,
            format!(
                "DRMS server error (HTTP {}); the server may be overloaded or down for maintenance\n{}",
                status.as_u16(),
                excerpt
            ),
        );
    }

    Error::transport(url, format!("HTTP {}\n{}", status.as_u16(), excerpt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_error_message_carries_status() {
        let e = Error::Export {
            message: "Bad recordset".to_string(),
            status: 4,
        };
        assert_eq!(e.to_string(), "Bad recordset [status=4]");
        assert_eq!(e.status(), Some(4));
    }

    #[test]
    fn not_found_reply_mentions_base_url() {
        let e = http_status_error(StatusCode::NOT_FOUND, "http://x/jsoc_fetch", "");
        let text = format!("{e:#}");
        assert!(text.contains("http://x/jsoc_fetch"));
        assert!(std::error::Error::source(&e)
            .map(|s| s.to_string().contains("cgi_baseurl"))
            .unwrap_or(false));
    }

    #[test]
    fn server_error_includes_code() {
        let e = http_status_error(StatusCode::BAD_GATEWAY, "http://x", "upstream down");
        let src = std::error::Error::source(&e).map(|s| s.to_string());
        assert!(src.unwrap_or_default().contains("HTTP 502"));
        assert_eq!(e.status(), None);
    }
}
