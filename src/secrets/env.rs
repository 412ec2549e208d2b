//! Dotenv-backed secret provider.
//!
//! `$` in a dotenv value is literal: nothing is substituted from the process
//! environment, so every lookup goes through the injected [`EnvLookup`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use crate::error::BerthError;

/// Ambient values shorter than this are not used for redaction. The process
/// environment carries flags like `1` or `yes` that are not secrets.
pub const MIN_AMBIENT_REDACTION_LEN: usize = 4;

/// Ambient key/value source consulted alongside the dotenv file.
pub trait EnvLookup: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn snapshot(&self) -> BTreeMap<String, String>;
}

/// The running process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        std::env::vars().collect()
    }
}

impl EnvLookup for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        self.clone()
    }
}

pub struct EnvProvider {
    environment: String,
    values: BTreeMap<String, String>,
    /// Keys whose current value came from the ambient snapshot.
    ambient_keys: BTreeSet<String>,
    ambient: Arc<dyn EnvLookup>,
}

impl std::fmt::Debug for EnvProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values stay out of debug output.
        f.debug_struct("EnvProvider")
            .field("environment", &self.environment)
            .field("keys", &self.values.len())
            .finish()
    }
}

impl EnvProvider {
    /// Load from an optional dotenv file, then the process environment.
    pub fn load(environment: &str, source: Option<&Path>) -> crate::Result<Self> {
        Self::load_with(environment, source, Arc::new(ProcessEnv))
    }

    /// Seed from `source` (a missing file is fine), then overlay the ambient
    /// snapshot. Ambient values win on collision.
    pub fn load_with(
        environment: &str,
        source: Option<&Path>,
        ambient: Arc<dyn EnvLookup>,
    ) -> crate::Result<Self> {
        let mut values = BTreeMap::new();

        if let Some(path) = source {
            let env_file_error =
                |detail: String| BerthError::EnvFile(path.display().to_string(), detail);
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    let escaped = literal_dollars(&contents);
                    for entry in dotenvy::from_read_iter(escaped.as_bytes()) {
                        let (key, value) = entry.map_err(|e| env_file_error(e.to_string()))?;
                        values.insert(key, value);
                    }
                    tracing::debug!(
                        environment = %environment,
                        path = %path.display(),
                        keys = values.len(),
                        "Loaded env file"
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(
                        environment = %environment,
                        path = %path.display(),
                        "Env file not found, using ambient environment only"
                    );
                }
                Err(e) => return Err(env_file_error(e.to_string())),
            }
        }

        let snapshot = ambient.snapshot();
        let ambient_keys = snapshot.keys().cloned().collect();
        values.extend(snapshot);

        Ok(Self {
            environment: environment.to_string(),
            values,
            ambient_keys,
            ambient,
        })
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Captured values first, then a live ambient lookup. Empty ambient
    /// values count as absent.
    pub fn get(&self, key: &str) -> crate::Result<String> {
        if let Some(value) = self.values.get(key) {
            return Ok(value.clone());
        }
        self.ambient
            .get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BerthError::SecretNotFound(self.environment.clone(), key.to_string()))
    }

    pub fn get_all(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }

    /// Stores in this provider only; the process environment is untouched.
    pub fn set(&mut self, key: &str, value: &str) {
        self.ambient_keys.remove(key);
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Values to redact: every non-empty file or `set` value, plus ambient
    /// values of at least [`MIN_AMBIENT_REDACTION_LEN`] characters.
    pub fn redaction_values(&self) -> Vec<String> {
        self.values
            .iter()
            .filter(|(key, value)| {
                if self.ambient_keys.contains(key.as_str()) {
                    value.chars().count() >= MIN_AMBIENT_REDACTION_LEN
                } else {
                    !value.is_empty()
                }
            })
            .map(|(_, value)| value.clone())
            .collect()
    }
}

/// Escape every `$` the dotenv parser would treat as a substitution. Single
/// quoted values, comments and already-escaped characters pass through.
fn literal_dollars(contents: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let mut out = String::with_capacity(contents.len());
    let mut quote = Quote::None;
    for line in contents.split_inclusive('\n') {
        if quote == Quote::None && line.trim_start().starts_with('#') {
            out.push_str(line);
            continue;
        }
        let mut prev_is_space = true;
        let mut chars = line.chars();
        while let Some(c) = chars.next() {
            match (quote, c) {
                (Quote::Single, '\'') => quote = Quote::None,
                (Quote::Single, _) => {}
                (_, '\\') => {
                    out.push(c);
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                    prev_is_space = false;
                    continue;
                }
                (Quote::None, '#') if prev_is_space => {
                    out.push(c);
                    out.extend(chars.by_ref());
                    break;
                }
                (Quote::None, '\'') => quote = Quote::Single,
                (Quote::None, '"') => quote = Quote::Double,
                (Quote::Double, '"') => quote = Quote::None,
                (_, '$') => out.push('\\'),
                _ => {}
            }
            prev_is_space = c.is_whitespace();
            out.push(c);
        }
    }
    out
}
