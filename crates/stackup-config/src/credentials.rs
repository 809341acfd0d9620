//! Environment snapshot and credential validation.
//!
//! Credentials are read exactly once, before any service is launched, into an
//! [`EnvSnapshot`]. The snapshot layers the process environment over an
//! optional `.env` file so operators can keep keys next to the deployment.
//! [`Credentials::from_snapshot`] is the only way to obtain the values handed
//! to managed services, which makes launching without a validated key
//! impossible.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Variable holding the required model provider key.
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Variable holding the optional tracing platform key.
pub const SECONDARY_KEY_VAR: &str = "LANGSMITH_API_KEY";

/// Variable exported to later stages once the tunnel announces its URL.
pub const PUBLIC_URL_VAR: &str = "PUBLIC_URL";

/// Errors raised while reading or validating environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required credential was absent or empty.
    #[error("required environment variable {variable} is not set")]
    MissingCredential {
        /// Name of the missing variable.
        variable: &'static str,
    },
    /// The `.env` file existed but could not be parsed.
    #[error("failed to read environment file '{path}': {source}")]
    DotEnv {
        /// Location of the environment file.
        path: PathBuf,
        /// Underlying parser error.
        #[source]
        source: dotenvy::Error,
    },
}

/// Immutable view of the environment taken at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    values: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Captures the process environment, layered over `dotenv` when given.
    ///
    /// A missing file is not an error. Values already present in the process
    /// environment win over the file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DotEnv`] when the file exists but is malformed.
    pub fn capture(dotenv: Option<&Path>) -> Result<Self, ConfigError> {
        let mut values = match dotenv {
            Some(path) => read_dotenv(path)?,
            None => BTreeMap::new(),
        };
        values.extend(env::vars());
        Ok(Self { values })
    }

    /// Builds a snapshot from explicit key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Returns the value recorded for `key`, treating blank values as unset.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

fn read_dotenv(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let to_error = |source| ConfigError::DotEnv {
        path: path.to_path_buf(),
        source,
    };
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(error) if error.not_found() => return Ok(BTreeMap::new()),
        Err(error) => return Err(to_error(error)),
    };
    iter.collect::<Result<BTreeMap<_, _>, _>>().map_err(to_error)
}

/// Validated credentials forwarded to every managed service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    secondary_key: Option<String>,
}

impl Credentials {
    /// Validates the credentials recorded in `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredential`] naming [`API_KEY_VAR`] when
    /// the required key is missing or blank.
    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self, ConfigError> {
        let api_key = snapshot
            .get(API_KEY_VAR)
            .ok_or(ConfigError::MissingCredential {
                variable: API_KEY_VAR,
            })?
            .to_owned();
        let secondary_key = snapshot.get(SECONDARY_KEY_VAR).map(str::to_owned);
        Ok(Self {
            api_key,
            secondary_key,
        })
    }

    /// Returns true when the optional secondary key was supplied.
    #[must_use]
    pub const fn has_secondary_key(&self) -> bool {
        self.secondary_key.is_some()
    }

    /// Environment assignments that expose the credentials to a child process.
    #[must_use]
    pub fn env_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = vec![(API_KEY_VAR, self.api_key.as_str())];
        if let Some(key) = self.secondary_key.as_deref() {
            pairs.push((SECONDARY_KEY_VAR, key));
        }
        pairs
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("secondary_key", &self.secondary_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_api_key_names_the_variable() {
        let snapshot = EnvSnapshot::from_pairs([(SECONDARY_KEY_VAR, "ls-key")]);
        let error = Credentials::from_snapshot(&snapshot).expect_err("key is missing");
        assert!(matches!(
            error,
            ConfigError::MissingCredential {
                variable: API_KEY_VAR
            }
        ));
        assert!(error.to_string().contains(API_KEY_VAR));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_api_key_counts_as_missing(#[case] value: &str) {
        let snapshot = EnvSnapshot::from_pairs([(API_KEY_VAR, value)]);
        assert!(Credentials::from_snapshot(&snapshot).is_err());
    }

    #[test]
    fn secondary_key_is_optional() {
        let snapshot = EnvSnapshot::from_pairs([(API_KEY_VAR, "sk-test")]);
        let credentials = Credentials::from_snapshot(&snapshot).expect("valid credentials");
        assert!(!credentials.has_secondary_key());
        assert_eq!(credentials.env_pairs(), vec![(API_KEY_VAR, "sk-test")]);
    }

    #[test]
    fn env_pairs_include_secondary_key_when_present() {
        let snapshot =
            EnvSnapshot::from_pairs([(API_KEY_VAR, "sk-test"), (SECONDARY_KEY_VAR, "ls-key")]);
        let credentials = Credentials::from_snapshot(&snapshot).expect("valid credentials");
        assert_eq!(
            credentials.env_pairs(),
            vec![(API_KEY_VAR, "sk-test"), (SECONDARY_KEY_VAR, "ls-key")]
        );
    }

    #[test]
    fn debug_output_redacts_keys() {
        let snapshot = EnvSnapshot::from_pairs([(API_KEY_VAR, "sk-secret")]);
        let credentials = Credentials::from_snapshot(&snapshot).expect("valid credentials");
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn capture_reads_dotenv_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join(".env");
        fs::write(&path, "STACKUP_TEST_DOTENV_ONLY=from-file\n").expect("write .env");
        let snapshot = EnvSnapshot::capture(Some(&path)).expect("capture");
        assert_eq!(snapshot.get("STACKUP_TEST_DOTENV_ONLY"), Some("from-file"));
    }

    #[test]
    fn capture_tolerates_missing_dotenv_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("absent.env");
        assert!(EnvSnapshot::capture(Some(&path)).is_ok());
    }

    #[test]
    fn capture_rejects_malformed_dotenv_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join(".env");
        fs::write(&path, "this line has no assignment\n").expect("write .env");
        let error = EnvSnapshot::capture(Some(&path)).expect_err("malformed file");
        assert!(matches!(error, ConfigError::DotEnv { .. }));
    }
}
