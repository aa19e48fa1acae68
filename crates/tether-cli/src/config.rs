use std::path::Path;
use std::path::PathBuf;

use tether_core::config::Config;

pub const CONFIG_ENV: &str = "TETHER_CONFIG";

pub fn config_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(explicit));
    }
    dirs::config_dir().map(|dir| dir.join("tether").join("config.toml"))
}

/// Reads the TOML config at `path`. A missing file means defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)
        .map_err(|err| format!("invalid config {}: {err}", path.display()))?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Where the conversation store and the recorded event log live.
pub fn data_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let base = dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .ok_or("cannot determine a data directory")?;
    Ok(base.join("tether"))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use tether_core::stream::CommitPolicy;

    use super::load_config;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tmpdir");
        let config = load_config(Some(&dir.path().join("absent.toml"))).expect("load");
        assert_eq!(config, Default::default());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[model]
default_model = "gpt-5"

[pipeline]
stream_commit = "complete_lines"
tool_allow_list = ["read", "search"]

[backend]
codex_path = "/opt/codex/bin/codex"
"#,
        )
        .expect("write");

        let config = load_config(Some(&path)).expect("load");
        assert_eq!(config.model.default_model.as_deref(), Some("gpt-5"));
        assert_eq!(config.pipeline.stream_commit, CommitPolicy::CompleteLines);
        assert_eq!(config.pipeline.tool_allow_list, vec!["read", "search"]);
        assert_eq!(config.pipeline.dedup_threshold, 1_000);
        assert_eq!(
            config.backend.codex_path.as_deref(),
            Some(std::path::Path::new("/opt/codex/bin/codex"))
        );
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pipeline\n").expect("write");
        assert!(load_config(Some(&path)).is_err());
    }
}
