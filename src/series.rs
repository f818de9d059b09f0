use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::util::value_as_i64;

/// Keyword name and DRMS type, as reported by `series_struct`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeywordInfo {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl KeywordInfo {
    pub fn is_time(&self) -> bool {
        self.kind.as_deref() == Some("time")
    }
}

/// The parts of a series definition the export client needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesInfo {
    pub name: String,
    pub primekeys: Vec<String>,
    pub keywords: Vec<KeywordInfo>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesStructReply {
    #[serde(default)]
    primekeys: Vec<String>,
    #[serde(default)]
    keywords: Vec<KeywordInfo>,
    #[serde(default)]
    note: Option<String>,
}

impl SeriesInfo {
    /// Parses a `jsoc_info?op=series_struct` reply.
    pub(crate) fn from_reply(name: &str, reply: Value) -> Result<Self> {
        let status = reply.get("status").and_then(value_as_i64);
        if status != Some(0) {
            return Err(query_error(&reply));
        }
        let parsed: SeriesStructReply = serde_json::from_value(reply)?;
        Ok(Self {
            name: name.to_string(),
            primekeys: parsed.primekeys,
            keywords: parsed.keywords,
            note: parsed.note,
        })
    }

    pub fn keyword(&self, name: &str) -> Option<&KeywordInfo> {
        self.keywords.iter().find(|k| k.name == name)
    }

    /// Whether the keyword `name` is time-typed.
    pub fn is_time_key(&self, name: &str) -> bool {
        self.keyword(name).is_some_and(KeywordInfo::is_time)
    }

    /// Default export filename format built from the series primekeys.
    pub fn filename_format(&self) -> String {
        if self.primekeys.is_empty() {
            return format!("{}.{{recnum:%lld}}.{{segment}}", self.name);
        }
        let pk = self
            .primekeys
            .iter()
            .map(|k| {
                if self.is_time_key(k) {
                    format!("{{{k}:A}}")
                } else {
                    format!("{{{k}}}")
                }
            })
            .collect::<Vec<_>>()
            .join(".");
        format!("{}.{}.{{segment}}", self.name, pk)
    }
}

/// Builds a query error from a CGI reply carrying `status` / `error`.
pub(crate) fn query_error(reply: &Value) -> Error {
    let status = reply.get("status").and_then(value_as_i64).unwrap_or(-1);
    let message = reply
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("DRMS query failed.")
        .to_string();
    Error::Query { message, status }
}
