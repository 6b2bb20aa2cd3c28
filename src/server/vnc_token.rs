//! Viewer access tokens, managed by an external script keyed by sandbox id.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::errors::{DeskPilotError, DeskPilotResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub sandbox_id: Option<String>,
    #[serde(default)]
    pub vm_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenAction {
    Add { sandbox_id: String, vm_ip: String },
    Remove { sandbox_id: String },
    List,
}

impl TokenAction {
    pub fn name(&self) -> &'static str {
        match self {
            TokenAction::Add { .. } => "add",
            TokenAction::Remove { .. } => "remove",
            TokenAction::List => "list",
        }
    }

    fn args(&self) -> Vec<&str> {
        match self {
            TokenAction::Add { sandbox_id, vm_ip } => vec!["add", sandbox_id, vm_ip],
            TokenAction::Remove { sandbox_id } => vec!["remove", sandbox_id],
            TokenAction::List => vec!["list"],
        }
    }
}

impl TryFrom<&TokenRequest> for TokenAction {
    /// Client-facing validation message.
    type Error = String;

    fn try_from(req: &TokenRequest) -> Result<Self, Self::Error> {
        let (Some(action), Some(sandbox_id)) = (
            req.action.as_deref().filter(|a| !a.is_empty()),
            req.sandbox_id.as_deref().filter(|s| !s.is_empty()),
        ) else {
            return Err("Missing required fields: action, sandboxId".into());
        };

        match action {
            "add" => match req.vm_ip.as_deref().filter(|ip| !ip.is_empty()) {
                Some(vm_ip) => Ok(TokenAction::Add {
                    sandbox_id: sandbox_id.to_string(),
                    vm_ip: vm_ip.to_string(),
                }),
                None => Err("Missing vmIp for add action".into()),
            },
            "remove" => Ok(TokenAction::Remove {
                sandbox_id: sandbox_id.to_string(),
            }),
            "list" => Ok(TokenAction::List),
            other => Err(format!("Unknown action: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VncToken {
    pub sandbox_id: String,
    pub vm_ip: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
}

pub struct TokenScript {
    path: PathBuf,
}

impl TokenScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs the script with argv (no shell). A non-zero exit is an error.
    pub async fn run(&self, action: &TokenAction) -> DeskPilotResult<ScriptOutput> {
        tracing::info!(script = %self.path.display(), action = action.name(), "running token script");
        let output = Command::new(&self.path)
            .args(action.args())
            .output()
            .await
            .map_err(|e| {
                DeskPilotError::TokenScript(format!("failed to run {}: {e}", self.path.display()))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(DeskPilotError::TokenScript(format!(
                "{} exited with {}: {}",
                self.path.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(ScriptOutput { stdout, stderr })
    }

    pub async fn list(&self) -> DeskPilotResult<Vec<VncToken>> {
        let output = self.run(&TokenAction::List).await?;
        Ok(parse_token_list(&output.stdout))
    }
}

fn token_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\S+):\s*(\S+):(\d+)").ok())
        .as_ref()
}

/// Parses `<sandboxId>: <vmIp>:<port>` lines; anything else is skipped.
pub fn parse_token_list(stdout: &str) -> Vec<VncToken> {
    let Some(re) = token_line() else {
        return Vec::new();
    };
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#') && !line.starts_with("==="))
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(VncToken {
                sandbox_id: caps[1].to_string(),
                vm_ip: caps[2].to_string(),
                port: caps[3].parse().ok()?,
            })
        })
        .collect()
}
