use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::config::load_config;
use crate::error::{Error, Result};
use crate::export::ExportRequest;
use crate::processing::ProcessingStep;
use crate::query::{ExportMethod, ExportProtocol, ExportQuery, Requestor, status_url};
use crate::records::{filename_from_record, parse_record, series_name};
use crate::series::SeriesInfo;
use crate::server::{Operation, ServerConfig, ServerRegistry};
use crate::transport::{HttpTransport, Transport};
use crate::util::{value_as_i64, with_query};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How the `filenamefmt` parameter of an export request is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FilenameFormat {
    /// Generated from the series primekeys; left out if the series is unknown.
    #[default]
    Auto,
    Custom(String),
    /// Leave the parameter out and let the server choose.
    Omit,
}

/// Options for [`Client::export`]. Defaults to a `url_quick` / `as-is` export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub method: String,
    pub protocol: String,
    /// `ct`, `scaling`, `min`, `max` and `size` for image protocols.
    pub protocol_args: Option<Vec<(String, String)>>,
    pub filename_format: FilenameFormat,
    pub record_limit: Option<i64>,
    /// Notification address; the client default when `None`.
    pub email: Option<String>,
    pub requestor: Requestor,
    pub processing: Vec<ProcessingStep>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            method: ExportMethod::UrlQuick.as_str().to_string(),
            protocol: ExportProtocol::AsIs.as_str().to_string(),
            protocol_args: None,
            filename_format: FilenameFormat::Auto,
            record_limit: None,
            email: None,
            requestor: Requestor::FromEmail,
            processing: Vec::new(),
        }
    }
}

impl ExportOptions {
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn protocol_arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.protocol_args
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.to_string()));
        self
    }

    pub fn filename_format(mut self, fmt: FilenameFormat) -> Self {
        self.filename_format = fmt;
        self
    }

    pub fn record_limit(mut self, n: i64) -> Self {
        self.record_limit = Some(n);
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn requestor(mut self, requestor: Requestor) -> Self {
        self.requestor = requestor;
        self
    }

    pub fn process(mut self, step: ProcessingStep) -> Self {
        self.processing.push(step);
        self
    }
}

/// Client for one DRMS server.
pub struct Client {
    server: ServerConfig,
    email: Option<String>,
    transport: Box<dyn Transport>,
    info_cache: RefCell<HashMap<String, SeriesInfo>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("server", &self.server.name())
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client using environment variables and/or `.drmsrc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client for one of the default servers (`jsoc`, `kis`).
    ///
    /// Each setting is taken, in order of precedence, from the explicit
    /// argument, the `DRMS_SERVER` / `DRMS_EMAIL` / `DRMS_VERIFY` environment
    /// variables, then the rc file from `DRMS_RC` or `.drmsrc`.
    pub fn new(server: Option<String>, email: Option<String>, verify: Option<bool>) -> Result<Self> {
        Self::with_registry(&ServerRegistry::with_defaults()?, server, email, verify)
    }

    /// Like [`Client::new`], resolving the server name in `registry`.
    pub fn with_registry(
        registry: &ServerRegistry,
        server: Option<String>,
        email: Option<String>,
        verify: Option<bool>,
    ) -> Result<Self> {
        let cfg = load_config(server, email, verify)?;
        let server = registry.resolve(&cfg.server)?;
        let transport = HttpTransport::new(server.encoding(), cfg.verify, DEFAULT_TIMEOUT)?.with_progress(true);
        tracing::debug!(server = server.name(), verify = cfg.verify, "created DRMS client");

        let mut client = Self::with_transport(server, transport);
        client.email = cfg.email;
        Ok(client)
    }

    /// Creates a client that sends every request through `transport`.
    pub fn with_transport(server: ServerConfig, transport: impl Transport + 'static) -> Self {
        Self {
            server,
            email: None,
            transport: Box::new(transport),
            info_cache: RefCell::new(HashMap::new()),
        }
    }

    /// Sets the default notification address for exports.
    pub fn with_email(mut self, email: impl Into<String>) -> Result<Self> {
        let email = email.into();
        if !email.contains('@') {
            return Err(Error::invalid(format!("{email:?} is not a valid email address")));
        }
        self.email = Some(email);
        Ok(self)
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    fn get_json(&self, url: &str) -> Result<Value> {
        tracing::debug!(%url, "DRMS query");
        self.transport.get_json(url)
    }

    /// Primekeys and keyword types of the series named at the start of `ds`.
    ///
    /// Series names are case-insensitive and reported in lower case.
    /// Results are cached per series for the lifetime of the client.
    pub fn info(&self, ds: &str) -> Result<SeriesInfo> {
        self.server.ensure_supported(Operation::Info)?;
        let name = series_name(ds)
            .ok_or_else(|| Error::invalid(format!("no series name in {ds:?}")))?;
        let name = name.to_lowercase();
        if let Some(info) = self.info_cache.borrow().get(&name) {
            return Ok(info.clone());
        }

        let endpoint = self
            .server
            .require_url(self.server.url_jsoc_info(), "url_jsoc_info")?;
        let url = with_query(endpoint, &[("op", "series_struct"), ("ds", name.as_str())]);
        let info = SeriesInfo::from_reply(&name, self.get_json(&url)?)?;
        self.info_cache.borrow_mut().insert(name, info.clone());
        Ok(info)
    }

    /// Whether `email` is registered for exports on this server.
    pub fn check_email(&self, email: &str) -> Result<bool> {
        self.server.ensure_supported(Operation::Email)?;
        let endpoint = self
            .server
            .require_url(self.server.url_check_address(), "url_check_address")?;
        let url = with_query(endpoint, &[("address", email), ("checkonly", "1")]);
        let reply = self.get_json(&url)?;
        Ok(reply.get("status").and_then(value_as_i64) == Some(2))
    }

    /// Submits an export request for the record set `ds`.
    ///
    /// Arguments are validated before anything is sent. The returned request
    /// may still be pending; see [`ExportRequest::wait`].
    pub fn export(&self, ds: &str, opts: &ExportOptions) -> Result<ExportRequest<'_>> {
        self.server.ensure_supported(Operation::Export)?;
        let email = opts
            .email
            .as_deref()
            .or(self.email.as_deref())
            .ok_or_else(|| {
                Error::invalid("an email address is required when no default email is set")
            })?;

        let mut query = ExportQuery {
            record_set: ds.to_string(),
            notify: email.to_string(),
            method: opts.method.clone(),
            protocol: opts.protocol.clone(),
            protocol_args: opts.protocol_args.clone(),
            filename_format: None,
            record_limit: opts.record_limit,
            requestor: opts.requestor.clone(),
            processing: opts.processing.clone(),
        };
        query.params()?;

        query.filename_format = match &opts.filename_format {
            FilenameFormat::Custom(fmt) => Some(fmt.clone()),
            FilenameFormat::Omit => None,
            FilenameFormat::Auto => match self.info(ds) {
                Ok(info) => Some(info.filename_format()),
                Err(e) => {
                    tracing::debug!(error = %e, "no filename format for unknown series");
                    None
                }
            },
        };

        let url = query.to_url(self.fetch_endpoint()?)?;
        let request = ExportRequest::from_reply(self, self.get_json(&url)?)?;
        tracing::info!(
            request_id = request.id().unwrap_or("none"),
            status = %request.status(),
            ds,
            "submitted export request"
        );
        Ok(request)
    }

    /// Reattaches to an export request submitted earlier.
    pub fn export_from_id(&self, request_id: &str) -> Result<ExportRequest<'_>> {
        self.server.ensure_supported(Operation::Export)?;
        ExportRequest::from_reply(self, self.exp_status(request_id)?)
    }

    fn fetch_endpoint(&self) -> Result<&str> {
        self.server
            .require_url(self.server.url_jsoc_fetch(), "url_jsoc_fetch")
    }

    pub(crate) fn exp_status(&self, request_id: &str) -> Result<Value> {
        let url = status_url(self.fetch_endpoint()?, request_id);
        self.get_json(&url)
    }

    /// Local filename derived from an export record; `None` if it cannot be built.
    pub(crate) fn filename_from_export_record(&self, rs: &str, old_fname: Option<&str>) -> Option<String> {
        let record = parse_record(rs)?;
        match self.info(&record.series) {
            Ok(info) => filename_from_record(&record, &info, old_fname),
            Err(e) => {
                tracing::debug!(record = rs, error = %e, "cannot derive filename from record");
                None
            }
        }
    }
}
