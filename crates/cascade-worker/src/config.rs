//! Worker configuration: a YAML file provides defaults, command-line flags
//! override individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

/// Lease cascade worker — keeps a session token, a derived service-account
/// key, and a bucket-listing client refreshed on independent TTLs.
#[derive(Parser, Debug)]
#[command(
    name = "cascade-worker",
    version,
    about = "Refreshes a session token, an issued cloud key, and a bucket-listing client on independent TTLs",
    long_about = None,
)]
pub struct CliArgs {
    /// Path to a YAML config file. Missing keys fall back to built-in
    /// defaults; flags below override whatever the file sets.
    #[arg(long, env = "CASCADE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Broker path of the derived service-account key secret.
    #[arg(long, env = "CASCADE_SECRETS_PATH")]
    pub secrets_path: Option<String>,

    /// Cloud project ID to list buckets in.
    #[arg(long, env = "CASCADE_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Worker controller's healthy interval, in seconds.
    #[arg(long, env = "CASCADE_INTERVAL")]
    pub interval: Option<u64>,

    /// Seconds of slack to renew the issued key before its TTL expires.
    #[arg(long = "early-renewal", env = "CASCADE_EARLY_RENEWAL")]
    pub early_renewal: Option<u64>,

    /// Secrets broker address.
    #[arg(long = "vault.address", env = "VAULT_ADDR")]
    pub vault_address: Option<String>,

    /// AppRole role name to authenticate as.
    #[arg(long = "vault.role", env = "VAULT_ROLE")]
    pub vault_role: Option<String>,

    /// AppRole role ID. Required at startup; never logged.
    #[arg(long = "vault.role-id", env = "VAULT_ROLE_ID")]
    pub vault_role_id: Option<String>,

    /// AppRole secret ID. Required at startup; never logged.
    #[arg(long = "vault.secret-id", env = "VAULT_SECRET_ID")]
    pub vault_secret_id: Option<String>,

    /// Log level: `debug`, `info`, `warn`, or `error`.
    #[arg(long = "log.level", env = "CASCADE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format: `text` or `json`.
    #[arg(long = "log.format", env = "CASCADE_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Path to the TLS CA bundle used to verify the broker.
    #[arg(long = "tls.ca", env = "VAULT_CACERT")]
    pub tls_ca: Option<String>,

    /// Path to the client TLS certificate.
    #[arg(long = "tls.cert", env = "VAULT_CLIENT_CERT")]
    pub tls_cert: Option<String>,

    /// Path to the client TLS private key.
    #[arg(long = "tls.key", env = "VAULT_CLIENT_KEY")]
    pub tls_key: Option<String>,
}

/// Nested `vault.*` config section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VaultSection {
    pub address: String,
    pub role_name: String,
    pub role_id: String,
    pub secret_id: String,
}

/// Nested `log.*` config section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "text".to_owned(),
        }
    }
}

/// Nested `tls.*` config section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsSection {
    pub ca: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
}

/// The fully resolved worker configuration: built-in defaults, overlaid by
/// the YAML file (if any), overlaid by CLI flags / environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub secrets_path: String,
    pub project_id: String,
    pub interval: u64,
    pub early_renewal: u64,
    pub vault: VaultSection,
    pub log: LogSection,
    pub tls: TlsSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secrets_path: "secret/data/gcs-lister".to_owned(),
            project_id: String::new(),
            interval: 60,
            early_renewal: 120,
            vault: VaultSection::default(),
            log: LogSection::default(),
            tls: TlsSection::default(),
        }
    }
}

/// Errors building the final configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("TLS path for {field} does not exist: {path}")]
    TlsPathMissing { field: &'static str, path: String },
}

impl Config {
    /// Load the YAML file at `path`, or return built-in defaults if `path`
    /// is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if a path
    /// was given but could not be read or parsed.
    pub fn from_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay CLI/env flags onto this config, field by field.
    pub fn apply_cli(&mut self, cli: &CliArgs) {
        if let Some(ref v) = cli.secrets_path {
            self.secrets_path = v.clone();
        }
        if let Some(ref v) = cli.project_id {
            self.project_id = v.clone();
        }
        if let Some(v) = cli.interval {
            self.interval = v;
        }
        if let Some(v) = cli.early_renewal {
            self.early_renewal = v;
        }
        if let Some(ref v) = cli.vault_address {
            self.vault.address = v.clone();
        }
        if let Some(ref v) = cli.vault_role {
            self.vault.role_name = v.clone();
        }
        if let Some(ref v) = cli.vault_role_id {
            self.vault.role_id = v.clone();
        }
        if let Some(ref v) = cli.vault_secret_id {
            self.vault.secret_id = v.clone();
        }
        if let Some(ref v) = cli.log_level {
            self.log.level = v.clone();
        }
        if let Some(ref v) = cli.log_format {
            self.log.format = v.clone();
        }
        if let Some(ref v) = cli.tls_ca {
            self.tls.ca = Some(v.clone());
        }
        if let Some(ref v) = cli.tls_cert {
            self.tls.cert = Some(v.clone());
        }
        if let Some(ref v) = cli.tls_key {
            self.tls.key = Some(v.clone());
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    #[must_use]
    pub fn early_renewal(&self) -> Duration {
        Duration::from_secs(self.early_renewal)
    }

    /// Expand `$VARS` and `~` in each configured TLS path and confirm it
    /// exists. A fatal startup error if any configured path is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TlsPathMissing`] for the first path that does
    /// not exist after expansion.
    pub fn validate_tls_paths(&mut self) -> Result<(), ConfigError> {
        self.tls.ca = validate_one("tls.ca", self.tls.ca.take())?;
        self.tls.cert = validate_one("tls.cert", self.tls.cert.take())?;
        self.tls.key = validate_one("tls.key", self.tls.key.take())?;
        Ok(())
    }
}

fn validate_one(field: &'static str, path: Option<String>) -> Result<Option<String>, ConfigError> {
    let Some(raw) = path else {
        return Ok(None);
    };
    let expanded = expand_path(&raw);
    if !Path::new(&expanded).exists() {
        return Err(ConfigError::TlsPathMissing {
            field,
            path: expanded,
        });
    }
    Ok(Some(expanded))
}

/// Expand `$VAR`/`${VAR}` environment references and a leading `~` home
/// directory reference in `path`.
fn expand_path(path: &str) -> String {
    let env_expanded = expand_env_vars(path);
    if let Some(rest) = env_expanded.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home.trim_end_matches('/'), rest);
        }
    } else if env_expanded == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return home;
        }
    }
    env_expanded
}

fn expand_env_vars(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = chars.peek().is_some_and(|&(_, c)| c == '{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if braced && chars.peek().is_some_and(|&(_, c)| c == '}') {
            chars.next();
        }
        if name.is_empty() {
            out.push('$');
        } else {
            out.push_str(&std::env::var(&name).unwrap_or_default());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn defaults_survive_with_no_file() {
        let cfg = Config::from_file(None).unwrap();
        assert_eq!(cfg.interval, 60);
        assert_eq!(cfg.early_renewal, 120);
        assert_eq!(cfg.log.format, "text");
    }

    #[test]
    fn yaml_file_overrides_and_unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cascade.yaml");
        std::fs::write(
            &path,
            "project_id: acme-prod\ninterval: 30\nsomething_unrecognized: 1\nvault:\n  address: https://vault.internal:8200\n",
        )
        .unwrap();

        let cfg = Config::from_file(Some(&path)).unwrap();
        assert_eq!(cfg.project_id, "acme-prod");
        assert_eq!(cfg.interval, 30);
        assert_eq!(cfg.early_renewal, 120);
        assert_eq!(cfg.vault.address, "https://vault.internal:8200");
    }

    #[test]
    fn cli_flags_override_file_values() {
        let mut cfg = Config::default();
        let cli = CliArgs {
            config: None,
            secrets_path: None,
            project_id: Some("from-cli".to_owned()),
            interval: Some(15),
            early_renewal: None,
            vault_address: None,
            vault_role: None,
            vault_role_id: None,
            vault_secret_id: None,
            log_level: None,
            log_format: None,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
        };
        cfg.apply_cli(&cli);
        assert_eq!(cfg.project_id, "from-cli");
        assert_eq!(cfg.interval, 15);
        assert_eq!(cfg.early_renewal, 120);
    }

    #[test]
    fn missing_tls_path_is_rejected() {
        let mut cfg = Config::default();
        cfg.tls.ca = Some("/nonexistent/path/ca.pem".to_owned());
        assert!(cfg.validate_tls_paths().is_err());
    }

    #[test]
    #[allow(unsafe_code)]
    fn env_var_expansion_in_tls_path() {
        // SAFETY: test-only, single-threaded access to a test-private var name.
        unsafe {
            std::env::set_var("CASCADE_TEST_DIR_XYZ", "/tmp");
        }
        let expanded = expand_path("$CASCADE_TEST_DIR_XYZ/does-not-exist.pem");
        assert_eq!(expanded, "/tmp/does-not-exist.pem");
        // SAFETY: test-only cleanup of the var set above.
        unsafe {
            std::env::remove_var("CASCADE_TEST_DIR_XYZ");
        }
    }
}
