use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

/// Client-side settings resolved from arguments, environment and `.drmsrc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Registered server name, e.g. `jsoc` or `kis`.
    pub server: String,
    /// Default notification address used for export requests.
    pub email: Option<String>,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct RcConfig {
    server: Option<String>,
    email: Option<String>,
    verify: Option<bool>,
}

pub(crate) const DEFAULT_SERVER: &str = "jsoc";

pub(crate) fn load_config(
    server: Option<String>,
    email: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let mut server = server.or_else(|| std::env::var("DRMS_SERVER").ok());
    let mut email = email.or_else(|| std::env::var("DRMS_EMAIL").ok());
    let verify = match verify {
        Some(v) => Some(v),
        None => match std::env::var("DRMS_VERIFY") {
            Ok(v) => Some(parse_flag(&v).with_context(|| format!("invalid DRMS_VERIFY value {v:?}"))?),
            Err(_) => None,
        },
    };

    let mut file_verify: Option<bool> = None;
    if server.is_none() || email.is_none() || verify.is_none() {
        for rc_path in rc_candidates() {
            if rc_path.exists() {
                let cfg = read_rc(&rc_path).with_context(|| {
                    format!("failed to read configuration file {}", rc_path.display())
                })?;
                tracing::debug!(path = %rc_path.display(), "loaded DRMS rc file");

                server = server.or(cfg.server);
                email = email.or(cfg.email);
                file_verify = cfg.verify;
                break;
            }
        }
    }

    let server = server
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());
    let email = email.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    if let Some(addr) = &email {
        if !addr.contains('@') {
            bail!("configured email {addr:?} is not a valid address");
        }
    }

    Ok(ClientConfig {
        server,
        email,
        verify: verify.or(file_verify).unwrap_or(true),
    })
}

fn parse_flag(v: &str) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean flag, got {other:?}"),
    }
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_rc(&text)
}

fn parse_rc(text: &str) -> Result<RcConfig> {
    let mut cfg = RcConfig::default();

    // `email:` may be followed by its value on the next line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') {
                assign(&mut cfg, pk, strip_quotes(line))?;
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            match k {
                "server" | "email" | "verify" => {
                    if v.is_empty() {
                        pending_key = Some(k);
                    } else {
                        assign(&mut cfg, k, v)?;
                    }
                }
                _ => {}
            }
        }
    }

    Ok(cfg)
}

fn assign(cfg: &mut RcConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "server" => cfg.server = Some(value.to_string()),
        "email" => cfg.email = Some(value.to_string()),
        "verify" => cfg.verify = Some(parse_flag(value)?),
        _ => {}
    }
    Ok(())
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) DRMS_RC (explicit)
    // 2) ./.drmsrc
    // 3) ~/.drmsrc
    if let Ok(p) = std::env::var("DRMS_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".drmsrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".drmsrc"));
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_values_and_comments() {
        let cfg = parse_rc(
            "# drms settings\nserver: KIS\nemail: \"someone@example.org\"\nverify: 0\n",
        )
        .unwrap();
        assert_eq!(cfg.server.as_deref(), Some("KIS"));
        assert_eq!(cfg.email.as_deref(), Some("someone@example.org"));
        assert_eq!(cfg.verify, Some(false));
    }

    #[test]
    fn value_on_following_line() {
        let cfg = parse_rc("email:\n  'a@b.org'\nserver: jsoc\n").unwrap();
        assert_eq!(cfg.email.as_deref(), Some("a@b.org"));
        assert_eq!(cfg.server.as_deref(), Some("jsoc"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = parse_rc("colour: blue\n").unwrap();
        assert_eq!(cfg, RcConfig::default());
    }

    #[test]
    fn bad_verify_flag_is_rejected() {
        assert!(parse_rc("verify: maybe\n").is_err());
    }

    #[test]
    fn read_rc_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".drmsrc");
        std::fs::write(&path, "server: kis\n").unwrap();
        let cfg = read_rc(&path).unwrap();
        assert_eq!(cfg.server.as_deref(), Some("kis"));
    }

    #[test]
    fn explicit_arguments_win() {
        let cfg = load_config(
            Some("kis".to_string()),
            Some("me@example.org".to_string()),
            Some(false),
        )
        .unwrap();
        assert_eq!(
            cfg,
            ClientConfig {
                server: "kis".to_string(),
                email: Some("me@example.org".to_string()),
                verify: false,
            }
        );
    }

    #[test]
    fn explicit_email_must_look_like_an_address() {
        let err = load_config(Some("jsoc".into()), Some("nobody".into()), Some(true));
        assert!(err.is_err());
    }
}
