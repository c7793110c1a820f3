// file: src/tools/docker.rs
// description: docker engine information and compose lifecycle
// reference: https://docs.docker.com/reference/cli/docker/compose/

use crate::error::{BnaError, Result};
use crate::tools::process::ToolCommand;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DockerInfo {
    #[serde(rename = "NCPU")]
    pub cpus: usize,
    #[serde(rename = "MemTotal")]
    pub memory_bytes: u64,
}

impl DockerInfo {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / (1024 * 1024)
    }
}

pub async fn docker_info() -> Result<DockerInfo> {
    let output = ToolCommand::new("docker")
        .args(["info", "--format", "json"])
        .output()
        .await?;
    DockerInfo::from_json(&output.stdout).map_err(|e| {
        BnaError::Validation(format!("unexpected `docker info` output: {e}"))
    })
}

pub async fn compose_up() -> Result<()> {
    info!("Starting the database container");
    ToolCommand::new("docker")
        .args(["compose", "up", "-d", "--wait"])
        .run()
        .await
}

pub async fn compose_down(volume: &str) -> Result<()> {
    info!("Removing the database container and volume {volume}");
    ToolCommand::new("docker")
        .args(["compose", "rm", "-sfv"])
        .run()
        .await?;
    ToolCommand::new("docker")
        .args(["volume", "rm", "-f", volume])
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_docker_info_from_json() {
        let info = DockerInfo::from_json(
            r#"{"ID":"abc","NCPU":8,"MemTotal":16777216000,"ServerVersion":"27.3.1"}"#,
        )
        .unwrap();
        assert_eq!(info.cpus, 8);
        assert_eq!(info.memory_mb(), 16000);
    }

    #[test]
    fn test_docker_info_missing_fields() {
        assert!(DockerInfo::from_json(r#"{"ID":"abc"}"#).is_err());
    }
}
