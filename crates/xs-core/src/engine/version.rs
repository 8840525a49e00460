//! `xray version` probing.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tokio::process::Command;

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

lazy_static! {
    // Xray 1.8.4 (Xray, Penetrates Everything.) 2cba2c4 (go1.24.1 linux/amd64)
    static ref VERSION_LINE: Option<Regex> = Regex::new(
        r"^Xray\s+([0-9]+\.[0-9]+\.[0-9]+)[^\n]*?(?:\s+([0-9a-f]{7,}))?\s*\((go[0-9.]+)\s+([^\s)]+)\)"
    )
    .ok();
    static ref GO_VERSION: Option<Regex> = Regex::new(r"(?i)go version ([^\s]+)").ok();
    static ref ARCH: Option<Regex> = Regex::new(r"(amd64|arm64|386|arm)").ok();
}

/// Engine availability as reported by `GET /system/engine`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct EngineInfo {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub go_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineInfo {
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

fn arch_in(line: &str) -> Option<String> {
    ARCH.as_ref()?.captures(line).map(|c| c[1].to_owned())
}

/// Parse the stdout of a successful `xray version`.
pub fn parse_version(output: &str) -> EngineInfo {
    let mut info = EngineInfo {
        available: true,
        ..EngineInfo::default()
    };
    for line in output.lines().map(str::trim) {
        if let Some(caps) = VERSION_LINE.as_ref().and_then(|re| re.captures(line)) {
            info.version = Some(caps[1].to_owned());
            info.commit = caps.get(2).map(|m| m.as_str().to_owned());
            info.go_version = Some(caps[3].to_owned());
            info.arch = Some(caps[4].to_owned());
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if lower.contains("commit:") {
            if let Some((_, commit)) = line.split_once(':') {
                info.commit = Some(commit.trim().to_owned());
            }
        } else if lower.contains("go version") {
            if let Some(caps) = GO_VERSION.as_ref().and_then(|re| re.captures(line)) {
                info.go_version = Some(caps[1].to_owned());
            }
            if let Some(arch) = arch_in(line) {
                info.arch = Some(arch);
            }
        } else if line.contains('/') {
            if let Some(arch) = arch_in(line) {
                info.arch = Some(arch);
            }
        }
    }
    info
}

/// Run `<binary> version` and parse the result. Never fails; problems are
/// reported through `EngineInfo::error`.
pub async fn probe_version(binary: &Path) -> EngineInfo {
    let child = Command::new(binary)
        .arg("version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(VERSION_TIMEOUT, child).await {
        Err(_) => EngineInfo::unavailable(format!("{} version timed out", binary.display())),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            EngineInfo::unavailable(format!("xray binary not found: {}", binary.display()))
        }
        Ok(Err(e)) => EngineInfo::unavailable(e.to_string()),
        Ok(Ok(out)) if out.status.success() => parse_version(&String::from_utf8_lossy(&out.stdout)),
        Ok(Ok(out)) => EngineInfo::unavailable(String::from_utf8_lossy(&out.stderr).trim().to_owned()),
    }
}
