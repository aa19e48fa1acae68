use std::path::PathBuf;

use regex::Regex;
use regex::RegexBuilder;
use serde::Deserialize;
use serde::Serialize;

use super::dedup::DEFAULT_DEDUP_RETAIN;
use super::dedup::DEFAULT_DEDUP_THRESHOLD;
use super::error::TetherError;
use super::stream::CommitPolicy;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub pipeline: PipelineConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub default_model: Option<String>,
    pub default_provider: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub dedup_threshold: usize,
    pub dedup_retain: usize,
    pub stream_commit: CommitPolicy,
    /// Tool-call begin events are shown only for tool names containing one of
    /// these (case-insensitive).
    pub tool_allow_list: Vec<String>,
    /// Prefixes the frontend puts in front of bare session ids.
    pub session_alias_prefixes: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            dedup_retain: DEFAULT_DEDUP_RETAIN,
            stream_commit: CommitPolicy::Immediate,
            tool_allow_list: ["read", "edit", "write", "glob", "grep"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            session_alias_prefixes: vec!["codex-event-".to_string()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub codex_path: Option<PathBuf>,
    pub codex_home: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ToolAllowList {
    pattern: Option<Regex>,
}

impl ToolAllowList {
    pub fn new(names: &[String]) -> Result<Self, TetherError> {
        let alternatives: Vec<String> = names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }
        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()
            .map_err(|err| TetherError::Config(format!("tool allow-list: {err}")))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn allows(&self, tool: &str) -> bool {
        self.pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(tool))
    }
}
