use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default command deadline: 24 hours
pub const DEFAULT_TIMEOUT_SECS: u64 = 86_400;

fn default_shell_path() -> PathBuf {
    which::which("bash").unwrap_or_else(|_| PathBuf::from("/bin/bash"))
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Configuration for a [`Shell`](crate::Shell)
///
/// Environment variables are merged on top of the inherited process
/// environment; repeated additions merge with last write winning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Path to the shell binary driven by the engine
    #[serde(default = "default_shell_path")]
    pub shell_path: PathBuf,

    /// Initial working directory; defaults to the process's current
    /// directory when unset
    pub cwd: Option<PathBuf>,

    /// Extra environment variables for the shell process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Deadline in seconds for each command's sentinel to be observed
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell_path: default_shell_path(),
            cwd: None,
            env: HashMap::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ShellConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the shell binary cannot be found or the
    /// timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if which::which(&self.shell_path).is_err() && !self.shell_path.exists() {
            return Err(Error::config(format!(
                "shell not found: {}",
                self.shell_path.display()
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::config("timeout must be non-zero"));
        }
        Ok(())
    }

    /// The working directory scripts start in
    pub fn initial_cwd(&self) -> Result<PathBuf> {
        match &self.cwd {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Merge one environment variable (last write wins)
    pub fn insert_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Merge a batch of environment variables (last write wins)
    pub fn merge_envs<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
    }

    pub(crate) fn set_cwd(&mut self, dir: impl AsRef<Path>) {
        self.cwd = Some(dir.as_ref().to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ShellConfig::default().validate().expect("bash available");
    }

    #[test]
    fn missing_shell_fails_validation() {
        let config = ShellConfig {
            shell_path: PathBuf::from("/nonexistent/shell-binary"),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn env_merging_is_last_write_wins() {
        let mut config = ShellConfig::default();
        config.merge_envs([("AAA", "one"), ("BBB", "two")]);
        config.merge_envs([("CCC", "three"), ("AAA", "four")]);
        assert_eq!(config.env["AAA"], "four");
        assert_eq!(config.env["BBB"], "two");
        assert_eq!(config.env["CCC"], "three");
    }
}
