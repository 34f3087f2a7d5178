//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use rho_agent::parallel::ParallelConfig;
use rho_agent::{CompressionConfig, LoopLimits, RetryConfig};
use rho_tools::ToolsConfig;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_BIND: &str = "127.0.0.1:7878";

/// Configuration for rho. Every field is optional; unset values fall back
/// to the library defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: Option<String>,
    /// OpenAI-compatible endpoint, e.g. `http://localhost:11434/v1`
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Dollars per million input tokens, for cost reporting
    pub input_cost: Option<f64>,
    /// Dollars per million output tokens
    pub output_cost: Option<f64>,
    pub system_prompt_file: Option<String>,
    pub limits: LimitsSettings,
    pub compression: CompressionSettings,
    pub retry: RetrySettings,
    pub parallel: ParallelSettings,
    pub server: ServerSettings,
    pub tools: ToolsSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSettings {
    pub max_tool_calls: Option<u32>,
    pub max_consecutive_failures: Option<u32>,
    pub max_total_failures: Option<u32>,
    pub max_iterations: Option<u32>,
    pub max_tool_result_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub max_entries: Option<usize>,
    pub keep_recent: Option<usize>,
    pub max_tool_message_chars: Option<usize>,
    pub older_tool_prefix_chars: Option<usize>,
    pub older_assistant_prefix_chars: Option<usize>,
    pub char_budget: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelSettings {
    pub max_parallel_lanes: Option<usize>,
    pub lane_failure_ceiling: Option<u32>,
    /// Defaults to the main model
    pub worker_model: Option<String>,
    /// Defaults to the worker model
    pub verifier_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSettings {
    pub web_search_endpoint: Option<String>,
    pub lint_command: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
}

impl Config {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rho")
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("RHO_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load the config file, falling back to defaults when it is missing or invalid
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config file");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Write the example config if no file exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    pub fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn bind(&self) -> &str {
        self.server.bind.as_deref().unwrap_or(DEFAULT_BIND)
    }

    /// API key from the config, then `OPENAI_API_KEY`
    pub fn api_key(&self) -> Option<String> {
        rho_ai::providers::get_api_key(self.api_key.as_deref().map(str::trim), "OPENAI_API_KEY").ok()
    }

    pub fn loop_limits(&self) -> LoopLimits {
        let d = LoopLimits::default();
        let s = &self.limits;
        LoopLimits {
            max_tool_calls: s.max_tool_calls.unwrap_or(d.max_tool_calls),
            max_consecutive_failures: s.max_consecutive_failures.unwrap_or(d.max_consecutive_failures),
            max_total_failures: s.max_total_failures.unwrap_or(d.max_total_failures),
            max_iterations: s.max_iterations.unwrap_or(d.max_iterations),
            max_tool_result_chars: s.max_tool_result_chars.unwrap_or(d.max_tool_result_chars),
        }
    }

    pub fn compression_config(&self) -> CompressionConfig {
        let d = CompressionConfig::default();
        let s = &self.compression;
        CompressionConfig {
            max_entries: s.max_entries.unwrap_or(d.max_entries),
            keep_recent: s.keep_recent.unwrap_or(d.keep_recent),
            max_tool_message_chars: s.max_tool_message_chars.unwrap_or(d.max_tool_message_chars),
            older_tool_prefix_chars: s.older_tool_prefix_chars.unwrap_or(d.older_tool_prefix_chars),
            older_assistant_prefix_chars: s
                .older_assistant_prefix_chars
                .unwrap_or(d.older_assistant_prefix_chars),
            char_budget: s.char_budget.unwrap_or(d.char_budget),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        let d = RetryConfig::default();
        let s = &self.retry;
        RetryConfig {
            max_retries: s.max_retries.unwrap_or(d.max_retries),
            initial_delay: s.initial_delay_ms.map(Duration::from_millis).unwrap_or(d.initial_delay),
            max_delay: s.max_delay_ms.map(Duration::from_millis).unwrap_or(d.max_delay),
            ..d
        }
    }

    pub fn parallel_config(&self) -> ParallelConfig {
        let d = ParallelConfig::default();
        let s = &self.parallel;
        ParallelConfig {
            max_parallel_lanes: s.max_parallel_lanes.unwrap_or(d.max_parallel_lanes).max(1),
            lane_failure_ceiling: s.lane_failure_ceiling.unwrap_or(d.lane_failure_ceiling).max(1),
        }
    }

    pub fn tools_config(&self) -> ToolsConfig {
        let d = ToolsConfig::default();
        let s = &self.tools;
        ToolsConfig {
            web_search_endpoint: s.web_search_endpoint.clone(),
            lint_command: s.lint_command.clone(),
            fetch_timeout: s.fetch_timeout_secs.map(Duration::from_secs).unwrap_or(d.fetch_timeout),
            ..d
        }
    }
}

/// Example config content
pub fn example_config() -> &'static str {
    r#"# rho configuration file
# Place at ~/.config/rho/config.toml or point RHO_CONFIG_PATH at it

# Model and OpenAI-compatible endpoint
model = "gpt-4o-mini"
base_url = "https://api.openai.com/v1"
# api_key = "sk-..."   # falls back to OPENAI_API_KEY

# Prices in dollars per million tokens, used for cost reporting
# input_cost = 0.15
# output_cost = 0.60

# system_prompt_file = "~/.config/rho/system_prompt.txt"

[limits]
max_tool_calls = 50
max_consecutive_failures = 3
max_total_failures = 8
max_iterations = 25
max_tool_result_chars = 10000

[compression]
max_entries = 40
keep_recent = 12
max_tool_message_chars = 10000
older_tool_prefix_chars = 500
older_assistant_prefix_chars = 800
char_budget = 120000

[retry]
max_retries = 3
initial_delay_ms = 1000
max_delay_ms = 30000

[parallel]
max_parallel_lanes = 4
lane_failure_ceiling = 2
# worker_model = "gpt-4o-mini"
# verifier_model = "gpt-4o"

[server]
bind = "127.0.0.1:7878"

[tools]
# web_search_endpoint = "http://localhost:8888/search"
# lint_command = "cargo clippy --quiet"
fetch_timeout_secs = 30
"#
}
