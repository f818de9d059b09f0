//! Construction and validation of `jsoc_fetch` export queries.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::processing::{ProcessingStep, encode_process_directive};
use crate::util::with_query;

/// Delivery methods for exported data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportMethod {
    UrlQuick,
    Url,
    UrlTar,
    Ftp,
    FtpTar,
}

impl ExportMethod {
    pub const ALL: [ExportMethod; 5] = [
        ExportMethod::UrlQuick,
        ExportMethod::Url,
        ExportMethod::UrlTar,
        ExportMethod::Ftp,
        ExportMethod::FtpTar,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExportMethod::UrlQuick => "url_quick",
            ExportMethod::Url => "url",
            ExportMethod::UrlTar => "url-tar",
            ExportMethod::Ftp => "ftp",
            ExportMethod::FtpTar => "ftp-tar",
        }
    }
}

/// Data formats an export can be delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportProtocol {
    AsIs,
    Fits,
    Jpg,
    Mpg,
    Mp4,
}

impl ExportProtocol {
    pub const ALL: [ExportProtocol; 5] = [
        ExportProtocol::AsIs,
        ExportProtocol::Fits,
        ExportProtocol::Jpg,
        ExportProtocol::Mpg,
        ExportProtocol::Mp4,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExportProtocol::AsIs => "as-is",
            ExportProtocol::Fits => "fits",
            ExportProtocol::Jpg => "jpg",
            ExportProtocol::Mpg => "mpg",
            ExportProtocol::Mp4 => "mp4",
        }
    }

    /// Image and movie protocols take color table / scaling arguments.
    pub fn is_image(self) -> bool {
        matches!(self, ExportProtocol::Jpg | ExportProtocol::Mpg | ExportProtocol::Mp4)
    }
}

fn quoted_list<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.map(|s| format!("'{s}'")).collect::<Vec<_>>().join(", ")
}

impl FromStr for ExportMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == lower)
            .ok_or_else(|| {
                Error::invalid(format!(
                    "method '{lower}' is not supported, valid methods are: {}",
                    quoted_list(Self::ALL.iter().map(|m| m.as_str()))
                ))
            })
    }
}

impl FromStr for ExportProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| {
                Error::invalid(format!(
                    "protocol '{lower}' is not supported, valid protocols are: {}",
                    quoted_list(Self::ALL.iter().map(|p| p.as_str()))
                ))
            })
    }
}

impl fmt::Display for ExportMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ExportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Color tables known to the export system (from `jsoc.Color_Tables`).
pub const COLOR_TABLES: &[&str] = &[
    "HMI_mag.lut",
    "aia_131.lut",
    "aia_1600.lut",
    "aia_1700.lut",
    "aia_171.lut",
    "aia_193.lut",
    "aia_211.lut",
    "aia_304.lut",
    "aia_335.lut",
    "aia_4500.lut",
    "aia_94.lut",
    "aia_mixed",
    "bb.sao",
    "grey.sao",
    "heat.sao",
];

/// Scaling types known to the export system.
pub const SCALING_TYPES: &[&str] = &["LOG", "MINMAX", "MINMAXGIVEN", "SQRT", "mag"];

const DEFAULT_COLOR_TABLE: &str = "grey.sao";
const DEFAULT_SCALING: &str = "MINMAX";
const DEFAULT_SIZE: i64 = 1;

/// Validated arguments for the `jpg`, `mpg` and `mp4` protocols.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolArgs {
    pub ct: Option<String>,
    pub scaling: Option<String>,
    pub size: Option<i64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ProtocolArgs {
    /// Parses `key = value` pairs; accepted keys are `ct` (any case),
    /// `scaling`, `size`, `min` and `max`.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut args = ProtocolArgs::default();
        for (k, v) in pairs {
            let (k, v) = (k.as_ref(), v.as_ref().trim());
            if k.eq_ignore_ascii_case("ct") {
                args.ct = Some(canonical_name(v, COLOR_TABLES, "color table")?);
            } else if k == "scaling" {
                args.scaling = Some(canonical_name(v, SCALING_TYPES, "scaling type")?);
            } else if k == "size" {
                args.size = Some(parse_number(k, v)?);
            } else if k == "min" {
                args.min = Some(parse_number(k, v)?);
            } else if k == "max" {
                args.max = Some(parse_number(k, v)?);
            } else {
                return Err(Error::invalid(format!("unknown protocol argument: '{k}'")));
            }
        }
        Ok(args)
    }

    fn encode(&self, protocol: ExportProtocol) -> String {
        let mut out = format!(
            "{},CT={},scaling={},size={}",
            protocol,
            self.ct.as_deref().unwrap_or(DEFAULT_COLOR_TABLE),
            self.scaling.as_deref().unwrap_or(DEFAULT_SCALING),
            self.size.unwrap_or(DEFAULT_SIZE),
        );
        if let Some(min) = self.min {
            out.push_str(&format!(",min={}", format_g(min)));
        }
        if let Some(max) = self.max {
            out.push_str(&format!(",max={}", format_g(max)));
        }
        out
    }
}

fn canonical_name(value: &str, allowed: &[&str], what: &str) -> Result<String> {
    allowed
        .iter()
        .find(|name| name.eq_ignore_ascii_case(value))
        .map(|name| name.to_string())
        .ok_or_else(|| {
            Error::invalid(format!(
                "{value} is not a valid {what}, available: {}",
                allowed.join(", ")
            ))
        })
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::invalid(format!("protocol argument '{key}' must be numeric, got {value:?}")))
}

/// `printf("%g")`-style formatting: six significant digits, trailing zeros dropped.
fn format_g(x: f64) -> String {
    if x == 0.0 || !x.is_finite() {
        return format!("{x}");
    }
    let sci = format!("{x:.5e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if (-4..6).contains(&exp) {
        let decimals = (5 - exp).max(0) as usize;
        trim_fraction(&format!("{x:.decimals$}")).to_string()
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.abs())
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Who is recorded as the requestor of an export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Requestor {
    /// Local part of the notification address.
    #[default]
    FromEmail,
    Named(String),
    /// Leave the `requestor` parameter out of the request.
    Omit,
}

/// A logical export request, turned into a `jsoc_fetch` URL by [`ExportQuery::to_url`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExportQuery {
    pub record_set: String,
    pub notify: String,
    pub method: String,
    pub protocol: String,
    pub protocol_args: Option<Vec<(String, String)>>,
    pub filename_format: Option<String>,
    pub record_limit: Option<i64>,
    pub requestor: Requestor,
    pub processing: Vec<ProcessingStep>,
}

impl ExportQuery {
    /// A `url_quick` / `as-is` export of `record_set`, notifying `notify`.
    pub fn new(record_set: impl Into<String>, notify: impl Into<String>) -> Self {
        Self {
            record_set: record_set.into(),
            notify: notify.into(),
            method: ExportMethod::UrlQuick.as_str().to_string(),
            protocol: ExportProtocol::AsIs.as_str().to_string(),
            protocol_args: None,
            filename_format: None,
            record_limit: None,
            requestor: Requestor::FromEmail,
            processing: Vec::new(),
        }
    }

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

    pub fn filename_format(mut self, fmt: impl Into<String>) -> Self {
        self.filename_format = Some(fmt.into());
        self
    }

    /// First `n` records for positive values, last `|n|` for negative ones.
    pub fn record_limit(mut self, n: i64) -> Self {
        self.record_limit = Some(n);
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

    /// Effective method after validation (`url_quick` only applies to `as-is`).
    pub fn resolved_method(&self) -> Result<ExportMethod> {
        let method: ExportMethod = self.method.parse()?;
        let protocol: ExportProtocol = self.protocol.parse()?;
        if method == ExportMethod::UrlQuick && protocol != ExportProtocol::AsIs {
            return Ok(ExportMethod::Url);
        }
        Ok(method)
    }

    /// Validated parameter list, in the order the server expects.
    pub(crate) fn params(&self) -> Result<Vec<(&'static str, String)>> {
        let method = self.resolved_method()?;
        let protocol: ExportProtocol = self.protocol.parse()?;

        let protocol_str = if protocol.is_image() {
            let args = match &self.protocol_args {
                Some(pairs) => ProtocolArgs::from_pairs(pairs.iter().map(|(k, v)| (k, v)))?,
                None => ProtocolArgs::default(),
            };
            args.encode(protocol)
        } else {
            if self.protocol_args.is_some() {
                return Err(Error::invalid(format!(
                    "protocol arguments are not supported for protocol '{protocol}'"
                )));
            }
            protocol.as_str().to_string()
        };

        let process = encode_process_directive(self.record_limit, &self.processing)?;

        let mut params = vec![
            ("op", "exp_request".to_string()),
            ("format", "json".to_string()),
            ("ds", self.record_set.clone()),
            ("notify", self.notify.clone()),
            ("method", method.as_str().to_string()),
            ("protocol", protocol_str),
        ];
        if let Some(fmt) = &self.filename_format {
            params.push(("filenamefmt", fmt.clone()));
        }
        params.push(("process=n", process));

        match &self.requestor {
            Requestor::FromEmail => {
                let local = self.notify.split('@').next().unwrap_or_default();
                params.push(("requestor", local.to_string()));
            }
            Requestor::Named(name) if !name.is_empty() => {
                params.push(("requestor", name.clone()));
            }
            Requestor::Named(_) | Requestor::Omit => {}
        }
        Ok(params)
    }

    /// Builds the absolute export-request URL against the `jsoc_fetch` endpoint.
    pub fn to_url(&self, fetch_endpoint: &str) -> Result<String> {
        let params = self.params()?;
        let borrowed: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        Ok(with_query(fetch_endpoint, &borrowed))
    }
}

/// Status query URL for an existing export request.
pub(crate) fn status_url(fetch_endpoint: &str, request_id: &str) -> String {
    with_query(fetch_endpoint, &[("op", "exp_status"), ("requestid", request_id)])
}
