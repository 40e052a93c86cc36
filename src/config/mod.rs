//! Service configuration.
//!
//! [`ServiceConfig`] is the explicit record handed to the router: where each
//! backend lives, how to launch it, where outputs go, how long to wait.
//! It starts from built-in defaults, is overlaid with persisted
//! [`Settings`] (a SQLite key-value table), and finally with CLI flags.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::Connection;

use crate::consts::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_INVOCATION_TIMEOUT, DEFAULT_OUTPUT_ROOT, MAX_OUTPUT_BYTES,
};
use crate::request::BackendKind;

/// How to reach one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Interpreter or executable, e.g. `python`.
    pub program: String,
    /// First argument, e.g. `inference_codeformer.py`. Empty to omit.
    pub script: String,
    /// The backend's checkout; the script runs from here.
    pub work_dir: PathBuf,
    /// When set, requests are forwarded to a `restora` instance at this URL
    /// instead of being run locally.
    pub url: Option<String>,
}

impl BackendConfig {
    pub fn defaults_for(kind: BackendKind) -> Self {
        let script = match kind {
            BackendKind::CodeFormer => "inference_codeformer.py",
            BackendKind::Gfpgan => "inference_gfpgan.py",
            BackendKind::RefLdm => "inference.py",
        };
        Self {
            program: "python".to_string(),
            script: script.to_string(),
            work_dir: PathBuf::from("."),
            url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub output_root: PathBuf,
    pub invocation_timeout: Duration,
    pub connect_timeout: Duration,
    /// Overall deadline for a forwarded request, inference included.
    pub remote_timeout: Duration,
    pub max_output_bytes: usize,
    codeformer: BackendConfig,
    gfpgan: BackendConfig,
    refldm: BackendConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            remote_timeout: DEFAULT_INVOCATION_TIMEOUT + Duration::from_secs(60),
            max_output_bytes: MAX_OUTPUT_BYTES,
            codeformer: BackendConfig::defaults_for(BackendKind::CodeFormer),
            gfpgan: BackendConfig::defaults_for(BackendKind::Gfpgan),
            refldm: BackendConfig::defaults_for(BackendKind::RefLdm),
        }
    }
}

/// Top-level keys; per-backend keys are `<kind>.<field>`.
const GLOBAL_KEYS: &[&str] = &[
    "output_root",
    "timeout_secs",
    "connect_timeout_secs",
    "remote_timeout_secs",
    "max_output_bytes",
];
const BACKEND_FIELDS: &[&str] = &["program", "script", "work_dir", "url"];

impl ServiceConfig {
    pub fn backend(&self, kind: BackendKind) -> &BackendConfig {
        match kind {
            BackendKind::CodeFormer => &self.codeformer,
            BackendKind::Gfpgan => &self.gfpgan,
            BackendKind::RefLdm => &self.refldm,
        }
    }

    pub fn backend_mut(&mut self, kind: BackendKind) -> &mut BackendConfig {
        match kind {
            BackendKind::CodeFormer => &mut self.codeformer,
            BackendKind::Gfpgan => &mut self.gfpgan,
            BackendKind::RefLdm => &mut self.refldm,
        }
    }

    /// Every key `set` accepts.
    pub fn known_keys() -> Vec<String> {
        let mut keys: Vec<String> = GLOBAL_KEYS.iter().map(|k| k.to_string()).collect();
        for kind in BackendKind::ALL {
            for field in BACKEND_FIELDS {
                keys.push(format!("{kind}.{field}"));
            }
        }
        keys
    }

    /// Apply one `key = value` pair. Unknown keys and unparsable values fail.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "output_root" => self.output_root = PathBuf::from(value),
            "timeout_secs" => self.invocation_timeout = parse_secs(key, value)?,
            "connect_timeout_secs" => self.connect_timeout = parse_secs(key, value)?,
            "remote_timeout_secs" => self.remote_timeout = parse_secs(key, value)?,
            "max_output_bytes" => {
                self.max_output_bytes = value
                    .parse()
                    .with_context(|| format!("{key}: expected a byte count, got '{value}'"))?
            }
            _ => {
                let (kind, field) = key
                    .split_once('.')
                    .ok_or_else(|| anyhow!("unknown config key: {key}"))?;
                let kind: BackendKind = kind
                    .parse()
                    .map_err(|_| anyhow!("unknown config key: {key}"))?;
                let backend = self.backend_mut(kind);
                match field {
                    "program" => backend.program = value.to_string(),
                    "script" => backend.script = value.to_string(),
                    "work_dir" => backend.work_dir = PathBuf::from(value),
                    "url" => {
                        let url = value.trim().trim_end_matches('/');
                        backend.url = (!url.is_empty()).then(|| url.to_string());
                    }
                    _ => bail!("unknown config key: {key}"),
                }
            }
        }
        Ok(())
    }

    /// Overlay every persisted setting.
    pub fn apply_settings(&mut self, settings: &Settings) -> Result<()> {
        for (key, value) in settings.list()? {
            self.set(&key, &value)
                .with_context(|| format!("invalid persisted setting '{key}'"))?;
        }
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: u64 = value
        .parse()
        .with_context(|| format!("{key}: expected whole seconds, got '{value}'"))?;
    if secs == 0 {
        bail!("{key}: must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}

/// Persistent key-value settings store.
pub struct Settings {
    conn: Mutex<Connection>,
}

impl Settings {
    /// Open or create the settings table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open settings database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .context("failed to create settings table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("settings connection poisoned"))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Store a value (upsert). The key must be one [`ServiceConfig`] understands.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        ServiceConfig::default().set(key, value)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(())
    }

    /// All settings, ordered by key.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read settings")
    }
}
