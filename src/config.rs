//! Runtime configuration.
//!
//! `Settings` is parsed from CLI flags with environment fallbacks (a `.env`
//! file is loaded by the binary first) and split into the per-component
//! configs below.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

pub const DEFAULT_OUTPUT_DIR: &str = "docs/generated";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    /// Session directories and persisted reports live here.
    pub output_dir: PathBuf,
    pub navigation_timeout: Duration,
    /// How long `type` waits for its selector to show up.
    pub selector_timeout: Duration,
    pub default_wait: Duration,
    pub auth_timeout: Duration,
    pub auth_poll_interval: Duration,
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            navigation_timeout: Duration::from_secs(30),
            selector_timeout: Duration::from_secs(10),
            default_wait: Duration::from_millis(crate::types::DEFAULT_WAIT_MS),
            auth_timeout: Duration::from_secs(300),
            auth_poll_interval: Duration::from_secs(5),
            retention: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChromeConfig {
    /// DevTools endpoint of an already running (possibly hosted) browser,
    /// e.g. `http://127.0.0.1:9222`. When unset a local Chrome is launched.
    pub debug_url: Option<String>,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Args)]
pub struct Settings {
    #[arg(long, env = "EXPLORER_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    #[arg(long, env = "BROWSER_DEBUG_URL")]
    pub browser_debug_url: Option<String>,

    #[arg(long, env = "BROWSER_HEADLESS", default_value_t = true, action = clap::ArgAction::Set)]
    pub headless: bool,

    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    pub openai_model: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, env = "EXPLORER_NAVIGATION_TIMEOUT_SECS", default_value_t = 30)]
    pub navigation_timeout_secs: u64,

    #[arg(long, env = "EXPLORER_AUTH_TIMEOUT_SECS", default_value_t = 300)]
    pub auth_timeout_secs: u64,

    #[arg(long, env = "EXPLORER_AUTH_POLL_SECS", default_value_t = 5)]
    pub auth_poll_secs: u64,

    #[arg(long, env = "EXPLORER_RETENTION_SECS", default_value_t = 3600)]
    pub retention_secs: u64,

    #[arg(long, env = "EXPLORER_SWEEP_INTERVAL_SECS", default_value_t = 1800)]
    pub sweep_interval_secs: u64,
}

impl Settings {
    pub fn explorer(&self) -> ExplorerConfig {
        ExplorerConfig {
            output_dir: self.output_dir.clone(),
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
            auth_poll_interval: Duration::from_secs(self.auth_poll_secs.max(1)),
            retention: Duration::from_secs(self.retention_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            ..ExplorerConfig::default()
        }
    }

    pub fn chrome(&self) -> ChromeConfig {
        ChromeConfig {
            debug_url: self.browser_debug_url.clone().filter(|u| !u.trim().is_empty()),
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
        }
    }

    /// `None` when no API key is configured; `act` then degrades to a no-op.
    pub fn planner(&self) -> Option<PlannerConfig> {
        let api_key = self.openai_api_key.clone().filter(|k| !k.trim().is_empty())?;
        Some(PlannerConfig {
            api_key,
            model: self.openai_model.clone(),
            base_url: self.openai_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        settings: Settings,
    }

    fn parse(args: &[&str]) -> Settings {
        let mut argv = vec!["explorer"];
        argv.extend_from_slice(args);
        Wrapper::try_parse_from(argv).unwrap().settings
    }

    #[test]
    fn flags_map_onto_component_configs() {
        let settings = parse(&[
            "--output-dir",
            "/tmp/out",
            "--auth-timeout-secs",
            "120",
            "--headless",
            "false",
            "--openai-api-key",
            "sk-test",
            "--openai-base-url",
            "http://localhost:9999/v1/",
        ]);

        let explorer = settings.explorer();
        assert_eq!(explorer.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(explorer.auth_timeout, Duration::from_secs(120));
        assert_eq!(explorer.auth_poll_interval, Duration::from_secs(5));
        assert!(!settings.chrome().headless);

        let planner = settings.planner().unwrap();
        assert_eq!(planner.api_key, "sk-test");
        assert_eq!(planner.base_url, "http://localhost:9999/v1");
    }

    #[test]
    fn blank_api_key_disables_the_planner() {
        let settings = parse(&["--openai-api-key", "  "]);
        assert!(settings.planner().is_none());
    }
}
