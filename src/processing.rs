use crate::error::{Error, Result};

/// Processing commands the export system accepts.
pub const PROCESSING_COMMANDS: &[&str] = &[
    "im_patch",
    "resize",
    "rebin",
    "aia_scale_aialev1",
    "aia_scale_orig",
    "aia_scale_other",
    "maproj",
    "HmiB2ptr",
];

/// One server-side processing command and its options.
///
/// Only the command name is validated; malformed options are passed through
/// and may be ignored by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingStep {
    pub name: String,
    pub options: Vec<(String, String)>,
}

impl ProcessingStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
        }
    }

    pub fn option(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.options.push((key.into(), value.to_string()));
        self
    }

    fn encode(&self) -> String {
        let opts = self
            .options
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{},{}", self.name, opts)
    }
}

/// Encodes the `process=n` value: record limit, then each command (at most once each).
pub(crate) fn encode_process_directive(limit: Option<i64>, steps: &[ProcessingStep]) -> Result<String> {
    for (i, step) in steps.iter().enumerate() {
        if steps[..i].iter().any(|prev| prev.name == step.name) {
            return Err(Error::invalid(format!(
                "processing command {} is given more than once",
                step.name
            )));
        }
        if !PROCESSING_COMMANDS.contains(&step.name.as_str()) {
            return Err(Error::invalid(format!(
                "{} is not an allowed processing command, allowed commands are: {}",
                step.name,
                PROCESSING_COMMANDS.join(", ")
            )));
        }
    }

    let mut out = limit.unwrap_or(0).to_string();
    if !steps.is_empty() {
        let cmds = steps.iter().map(ProcessingStep::encode).collect::<Vec<_>>();
        out.push('|');
        out.push_str(&cmds.join("|"));
    }
    Ok(out)
}
