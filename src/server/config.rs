//! Server configuration.
//!
//! Loaded from a line-oriented `Key value` text file; CLI flags
//! override file values. The password is held behind a lock because it
//! may be changed at runtime and is re-read on every command — the
//! `Config` object, not the session, is the source of truth for
//! authentication.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Server configuration.
#[derive(Debug)]
pub struct Config {
    /// Listen address
    pub bind: String,
    /// Listen port
    pub port: u16,
    /// Working directory for temp files
    pub dir: PathBuf,
    /// Host name announced in INFO
    pub announce_host: String,
    /// Admission limit; 0 disables the guard
    pub max_clients: usize,
    /// Reserved: a single logical database is implemented
    pub databases: u16,
    /// Reserved
    pub repl_timeout: u64,
    /// Random id generated at startup, reported by INFO
    pub run_id: String,
    /// Path the configuration was loaded from, if any
    pub config_file: Option<PathBuf>,
    /// Password gate; `None` means no authentication required
    require_pass: RwLock<Option<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: crate::DEFAULT_PORT,
            dir: PathBuf::from("."),
            announce_host: String::new(),
            max_clients: crate::MAX_CLIENTS,
            databases: 1,
            repl_timeout: 0,
            run_id: generate_run_id(40),
            config_file: None,
            require_pass: RwLock::new(None),
        }
    }
}

impl Config {
    /// Load configuration from a `Key value` text file. Lines starting
    /// with `#` and blank lines are skipped; unknown keys are warned
    /// about and ignored.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let mut config = Self::parse(&content)?;
        config.config_file = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Config::default();
        for (line_number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next().unwrap_or_default();
            let value = parts.next().map(str::trim).unwrap_or_default();
            config
                .apply(key, value)
                .map_err(|e| Error::Config(format!("line {}: {e}", line_number + 1)))?;
        }
        Ok(config)
    }

    /// Apply one directive. Keys match case-insensitively; the file
    /// conventionally uses CamelCase (Bind, Port, MaxClients, ...).
    fn apply(&mut self, key: &str, value: &str) -> std::result::Result<(), String> {
        match key.to_ascii_lowercase().as_str() {
            "bind" => self.bind = value.to_string(),
            "port" => self.port = parse(value)?,
            "dir" => self.dir = PathBuf::from(value),
            "announcehost" => self.announce_host = value.to_string(),
            "maxclients" => self.max_clients = parse(value)?,
            "requirepass" => self.set_require_pass(Some(value.to_string())),
            "databases" => self.databases = parse(value)?,
            "repltimeout" => self.repl_timeout = parse(value)?,
            _ => warn!(key, "ignoring unknown configuration key"),
        }
        Ok(())
    }

    /// The configured password, if any. Re-read on every command.
    pub fn require_pass(&self) -> Option<String> {
        self.require_pass.read().clone()
    }

    /// Change the password at runtime. `None` (or empty) disables
    /// authentication.
    pub fn set_require_pass(&self, password: Option<String>) {
        *self.require_pass.write() = password.filter(|p| !p.is_empty());
    }

    /// `host:port` as announced in INFO.
    pub fn announce_address(&self) -> String {
        format!("{}:{}", self.announce_host, self.port)
    }

    /// `Dir`-relative temp directory.
    pub fn temp_dir(&self) -> PathBuf {
        self.dir.join("tmp")
    }
}

fn parse<T: std::str::FromStr>(value: &str) -> std::result::Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value: {value}"))
}

fn generate_run_id(length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("ID_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognized_keys() {
        let config = Config::parse(
            "# comment\n\
             Bind 0.0.0.0\n\
             Port 6380\n\
             Dir /var/lib/kv\n\
             AnnounceHost cache-1\n\
             MaxClients 128\n\
             RequirePass sekrit\n\
             Databases 1\n\
             ReplTimeout 30\n",
        )
        .expect("config parses");

        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 6380);
        assert_eq!(config.dir, PathBuf::from("/var/lib/kv"));
        assert_eq!(config.announce_host, "cache-1");
        assert_eq!(config.max_clients, 128);
        assert_eq!(config.require_pass(), Some("sekrit".to_string()));
        assert_eq!(config.announce_address(), "cache-1:6380");
        assert_eq!(config.temp_dir(), PathBuf::from("/var/lib/kv/tmp"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = Config::parse("NotAKey whatever\nPort 7000\n").expect("config parses");
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn invalid_numbers_error() {
        assert!(Config::parse("Port not-a-number\n").is_err());
    }

    #[test]
    fn empty_password_disables_auth() {
        let config = Config::default();
        config.set_require_pass(Some(String::new()));
        assert_eq!(config.require_pass(), None);
        config.set_require_pass(Some("pw".to_string()));
        assert_eq!(config.require_pass(), Some("pw".to_string()));
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(Config::default().run_id, Config::default().run_id);
        assert!(Config::default().run_id.starts_with("ID_"));
    }
}
