//! Configuration management for provisor.
//!
//! Reads configuration from environment variables; `main` loads a `.env`
//! file into the environment first, so real environment variables take
//! precedence over `.env`. Command-line flags override both.

use std::time::Duration;

use anyhow::{Context, Result};

/// Default shell for string commands.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Provisor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Shell used for string commands (PROVISOR_SHELL)
    pub shell: String,
    /// Default per-step timeout (PROVISOR_STEP_TIMEOUT, seconds)
    pub step_timeout: Option<Duration>,
    /// Log filter when RUST_LOG is unset (PROVISOR_LOG)
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            step_timeout: None,
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let shell = lookup("PROVISOR_SHELL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.shell);

        let step_timeout = match lookup("PROVISOR_STEP_TIMEOUT") {
            Some(raw) if !raw.trim().is_empty() => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("PROVISOR_STEP_TIMEOUT must be whole seconds, got '{}'", raw))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            _ => None,
        };

        let log_filter = lookup("PROVISOR_LOG")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.log_filter);

        Ok(Self {
            shell,
            step_timeout,
            log_filter,
        })
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  PROVISOR_SHELL: {}", self.shell);
        match self.step_timeout {
            Some(t) => println!("  PROVISOR_STEP_TIMEOUT: {}s", t.as_secs()),
            None => println!("  PROVISOR_STEP_TIMEOUT: (none)"),
        }
        println!("  PROVISOR_LOG: {}", self.log_filter);
        if which::which(&self.shell).is_err() {
            println!("  Shell: NOT FOUND");
        }
    }
}
