//! Server endpoint configuration and the registry of known DRMS servers.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::util::urljoin;

/// Every key a [`ServerConfig`] understands.
pub const SERVER_CONFIG_KEYS: &[&str] = &[
    "name",
    "cgi_baseurl",
    "cgi_show_series",
    "cgi_jsoc_info",
    "cgi_jsoc_fetch",
    "cgi_check_address",
    "cgi_show_series_wrapper",
    "show_series_wrapper_dbhost",
    "url_show_series",
    "url_jsoc_info",
    "url_jsoc_fetch",
    "url_check_address",
    "url_show_series_wrapper",
    "encoding",
    "http_download_baseurl",
    "ftp_download_baseurl",
];

/// Operations a server may or may not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Series,
    Info,
    Query,
    Email,
    Export,
}

/// Endpoint configuration of one DRMS server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    name: String,
    cgi_baseurl: Option<String>,
    cgi_show_series: Option<String>,
    cgi_jsoc_info: Option<String>,
    cgi_jsoc_fetch: Option<String>,
    cgi_check_address: Option<String>,
    cgi_show_series_wrapper: Option<String>,
    show_series_wrapper_dbhost: Option<String>,
    url_show_series: Option<String>,
    url_jsoc_info: Option<String>,
    url_jsoc_fetch: Option<String>,
    url_check_address: Option<String>,
    url_show_series_wrapper: Option<String>,
    encoding: String,
    http_download_baseurl: Option<String>,
    ftp_download_baseurl: Option<String>,
}

macro_rules! optional_getters {
    ($($field:ident),+ $(,)?) => {
        $(
            pub fn $field(&self) -> Option<&str> {
                self.$field.as_deref()
            }
        )+
    };
}

impl ServerConfig {
    /// Builds a configuration from `key = value` pairs.
    ///
    /// Unknown keys and a missing `name` are rejected. `encoding` defaults to
    /// `latin1`, and every `url_*` entry that is not given explicitly is derived
    /// from `cgi_baseurl` and the matching `cgi_*` entry.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut d: BTreeMap<&'static str, String> = BTreeMap::new();
        for (k, v) in pairs {
            let k = k.as_ref();
            let key = SERVER_CONFIG_KEYS
                .iter()
                .copied()
                .find(|known| *known == k)
                .ok_or_else(|| Error::invalid(format!("invalid server config key: {k}")))?;
            d.insert(key, v.into());
        }

        let name = d
            .remove("name")
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| Error::invalid("server config entry \"name\" is missing"))?;

        let mut cfg = ServerConfig {
            name,
            encoding: d.remove("encoding").unwrap_or_else(|| "latin1".to_string()),
            cgi_baseurl: d.remove("cgi_baseurl"),
            cgi_show_series: d.remove("cgi_show_series"),
            cgi_jsoc_info: d.remove("cgi_jsoc_info"),
            cgi_jsoc_fetch: d.remove("cgi_jsoc_fetch"),
            cgi_check_address: d.remove("cgi_check_address"),
            cgi_show_series_wrapper: d.remove("cgi_show_series_wrapper"),
            show_series_wrapper_dbhost: d.remove("show_series_wrapper_dbhost"),
            url_show_series: d.remove("url_show_series"),
            url_jsoc_info: d.remove("url_jsoc_info"),
            url_jsoc_fetch: d.remove("url_jsoc_fetch"),
            url_check_address: d.remove("url_check_address"),
            url_show_series_wrapper: d.remove("url_show_series_wrapper"),
            http_download_baseurl: d.remove("http_download_baseurl"),
            ftp_download_baseurl: d.remove("ftp_download_baseurl"),
        };
        cfg.derive_urls()?;
        Ok(cfg)
    }

    fn derive_urls(&mut self) -> Result<()> {
        let Some(base) = self.cgi_baseurl.clone() else {
            return Ok(());
        };
        let pairs = [
            (&self.cgi_show_series, &mut self.url_show_series),
            (&self.cgi_jsoc_info, &mut self.url_jsoc_info),
            (&self.cgi_jsoc_fetch, &mut self.url_jsoc_fetch),
            (&self.cgi_check_address, &mut self.url_check_address),
            (&self.cgi_show_series_wrapper, &mut self.url_show_series_wrapper),
        ];
        for (cgi, url) in pairs {
            if url.is_none() {
                if let Some(cgi) = cgi {
                    *url = Some(urljoin(&base, cgi)?);
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Character encoding of CGI replies (`latin1` unless configured).
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    optional_getters!(
        cgi_baseurl,
        cgi_show_series,
        cgi_jsoc_info,
        cgi_jsoc_fetch,
        cgi_check_address,
        cgi_show_series_wrapper,
        show_series_wrapper_dbhost,
        url_show_series,
        url_jsoc_info,
        url_jsoc_fetch,
        url_check_address,
        url_show_series_wrapper,
        http_download_baseurl,
        ftp_download_baseurl,
    );

    /// Whether the server provides the CGIs needed for `op`.
    pub fn supports(&self, op: Operation) -> bool {
        match op {
            Operation::Series => {
                self.cgi_show_series.is_some() || self.cgi_show_series_wrapper.is_some()
            }
            Operation::Info | Operation::Query => self.cgi_jsoc_info.is_some(),
            Operation::Email => self.cgi_check_address.is_some(),
            Operation::Export => self.cgi_jsoc_info.is_some() && self.cgi_jsoc_fetch.is_some(),
        }
    }

    pub(crate) fn ensure_supported(&self, op: Operation) -> Result<()> {
        if self.supports(op) {
            return Ok(());
        }
        let what = match op {
            Operation::Series => "series listing",
            Operation::Info => "series info access",
            Operation::Query => "DRMS queries",
            Operation::Email => "user emails",
            Operation::Export => "export requests",
        };
        Err(Error::OperationNotSupported(format!(
            "server {} does not support {what}",
            self.name
        )))
    }

    pub(crate) fn require_url<'a>(&'a self, url: Option<&'a str>, key: &str) -> Result<&'a str> {
        url.ok_or_else(|| {
            Error::OperationNotSupported(format!("server {} has no {key} configured", self.name))
        })
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ServerConfig: {}>", self.name)
    }
}

/// Named server configurations, looked up case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    servers: BTreeMap<String, ServerConfig>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the public JSOC and KIS servers.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(ServerConfig::from_pairs([
            ("name", "JSOC"),
            ("cgi_baseurl", "http://jsoc.stanford.edu/cgi-bin/ajax/"),
            ("cgi_show_series", "show_series"),
            ("cgi_jsoc_info", "jsoc_info"),
            ("cgi_jsoc_fetch", "jsoc_fetch"),
            ("cgi_check_address", "checkAddress.sh"),
            ("cgi_show_series_wrapper", "showextseries"),
            ("show_series_wrapper_dbhost", "hmidb2"),
            ("http_download_baseurl", "http://jsoc.stanford.edu/"),
            ("ftp_download_baseurl", "ftp://pail.stanford.edu/export/"),
        ])?)?;
        registry.register(ServerConfig::from_pairs([
            ("name", "KIS"),
            ("cgi_baseurl", "http://drms.leibniz-kis.de/cgi-bin/"),
            ("cgi_show_series", "show_series"),
            ("cgi_jsoc_info", "jsoc_info"),
        ])?)?;
        Ok(registry)
    }

    /// Adds a configuration; a name that is already registered is an error.
    pub fn register(&mut self, config: ServerConfig) -> Result<()> {
        let key = config.name().to_lowercase();
        if self.servers.contains_key(&key) {
            return Err(Error::invalid(format!(
                "server config {key} already registered"
            )));
        }
        self.servers.insert(key, config);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(&name.to_lowercase())
    }

    pub(crate) fn resolve(&self, name: &str) -> Result<ServerConfig> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownServer(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }
}
