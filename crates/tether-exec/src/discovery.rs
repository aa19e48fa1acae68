use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use super::error::BackendError;

/// The parts of the process environment codex discovery looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryEnv {
    pub home: Option<PathBuf>,
    pub codex_path: Option<PathBuf>,
    pub path_var: Option<String>,
    pub appdata: Option<PathBuf>,
}

impl DiscoveryEnv {
    pub fn from_process() -> Self {
        Self {
            home: dirs::home_dir().or_else(|| std::env::current_dir().ok()),
            codex_path: std::env::var_os("CODEX_PATH")
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
            path_var: std::env::var("PATH").ok(),
            appdata: std::env::var_os("APPDATA").map(PathBuf::from),
        }
    }
}

pub fn platform_binary_name() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("macos", "aarch64") => "codex-aarch64-apple-darwin",
        ("macos", "x86_64") => "codex-x86_64-apple-darwin",
        ("linux", "x86_64") => "codex-x86_64-unknown-linux-musl",
        ("linux", "aarch64") => "codex-aarch64-unknown-linux-musl",
        ("windows", "x86_64") => "codex-x86_64-pc-windows-msvc.exe",
        _ => "codex",
    }
}

/// Locates a codex executable, preferring native binaries over the node
/// wrapper scripts npm installs.
///
/// Order: `CODEX_PATH`, platform binaries inside global `node_modules`
/// installs, native cargo/homebrew installs, then `PATH`.
pub fn discover_codex_command(env: &DiscoveryEnv) -> Option<PathBuf> {
    if let Some(explicit) = env.codex_path.as_ref() {
        if explicit.exists() {
            tracing::debug!(path = %explicit.display(), "using CODEX_PATH override");
            return Some(explicit.clone());
        }
        tracing::warn!(path = %explicit.display(), "CODEX_PATH set but not found");
    }

    let binary = platform_binary_name();
    let mut bundled: Vec<PathBuf> = Vec::new();
    if let Some(home) = env.home.as_ref() {
        bundled.push(home.join(".bun/install/global/node_modules/@openai/codex/bin"));
        bundled.push(home.join(".local/share/npm/lib/node_modules/@openai/codex/bin"));
    }
    bundled.push(PathBuf::from("/usr/local/lib/node_modules/@openai/codex/bin"));
    bundled.push(PathBuf::from("/opt/homebrew/lib/node_modules/@openai/codex/bin"));
    if let Some(found) = bundled
        .into_iter()
        .map(|dir| dir.join(binary))
        .find(|path| path.exists())
    {
        tracing::debug!(path = %found.display(), "found bundled codex binary");
        return Some(found);
    }

    if cfg!(windows) {
        if let Some(appdata) = env.appdata.as_ref() {
            let npm = appdata.join("npm");
            for name in ["codex.cmd", "codex.ps1", "codex"] {
                let candidate = npm.join(name);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
    }

    let mut native: Vec<PathBuf> = Vec::new();
    if let Some(home) = env.home.as_ref() {
        native.push(home.join(".cargo/bin/codex"));
        native.push(home.join(".cargo/bin/codex.exe"));
    }
    native.push(PathBuf::from("/usr/local/bin/codex"));
    native.push(PathBuf::from("/opt/homebrew/bin/codex"));
    for candidate in native {
        if !candidate.exists() {
            continue;
        }
        if is_wrapper_script(&candidate) {
            tracing::debug!(path = %candidate.display(), "skipping node wrapper");
            continue;
        }
        tracing::debug!(path = %candidate.display(), "found native codex binary");
        return Some(candidate);
    }

    let found = env.path_var.as_deref().and_then(search_path);
    if found.is_none() {
        tracing::warn!("no codex binary found in common locations or PATH");
    }
    found
}

/// Runs `<program> --version` and returns its first output line.
pub fn codex_version(program: &Path) -> Result<String, BackendError> {
    let output = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .map_err(|source| BackendError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BackendError::VersionCheck(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            stderr.trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BackendError::VersionCheck(format!("{} printed no version", program.display())))
}

fn search_path(path_var: &str) -> Option<PathBuf> {
    let names: &[&str] = if cfg!(windows) {
        &["codex.exe", "codex.cmd", "codex.ps1", "codex"]
    } else {
        &["codex"]
    };
    let mut wrapper: Option<PathBuf> = None;
    for dir in std::env::split_paths(path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        for name in names {
            let candidate = dir.join(name);
            if !candidate.exists() {
                continue;
            }
            if is_wrapper_script(&candidate) {
                if wrapper.is_none() {
                    wrapper = Some(candidate);
                }
                continue;
            }
            tracing::debug!(path = %candidate.display(), "found codex on PATH");
            return Some(candidate);
        }
    }
    if let Some(wrapper) = wrapper.as_ref() {
        tracing::debug!(path = %wrapper.display(), "falling back to wrapper on PATH");
    }
    wrapper
}

/// Node launchers are small text files; native binaries fail UTF-8 decoding.
fn is_wrapper_script(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            content.contains("codex.js")
                || content.starts_with("#!/usr/bin/env node")
                || content.contains("import")
        }
        Err(_) => false,
    }
}
