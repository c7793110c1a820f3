// file: src/tools/process.rs
// description: async wrapper around external command line tools
// reference: https://docs.rs/tokio/latest/tokio/process/

use crate::error::{BnaError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

const SECRET_FLAGS: &[&str] = &["--password", "-P"];

lazy_static! {
    static ref URL_PASSWORD: Regex = Regex::new(r"(postgres(?:ql)?://[^:/@\s]*:)[^@\s]*@")
        .expect("URL_PASSWORD regex is valid");
    static ref KEYWORD_PASSWORD: Regex =
        Regex::new(r"(password=)\S+").expect("KEYWORD_PASSWORD regex is valid");
}

/// Hides the password of connection URLs and `PG:` keyword strings.
pub fn mask_secrets(arg: &str) -> String {
    let masked = URL_PASSWORD.replace_all(arg, "${1}****@");
    KEYWORD_PASSWORD
        .replace_all(&masked, "${1}****")
        .into_owned()
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    fn log(&self, program: &str) {
        for line in self.stdout.lines().chain(self.stderr.lines()) {
            trace!("{program}: {line}");
        }
    }
}

/// A program plus its arguments, spawned on the tokio runtime.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Command line for logs, with secrets masked.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                parts.push("****".to_string());
            } else {
                parts.push(mask_secrets(arg));
            }
            mask_next = SECRET_FLAGS.contains(&arg.as_str());
        }
        parts.join(" ")
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> BnaError {
        BnaError::CommandSpawn {
            program: self.program.clone(),
            source,
        }
    }

    /// Runs to completion. A non-zero exit status is an error.
    pub async fn output(&self) -> Result<ToolOutput> {
        debug!("{}", self.display());
        let output = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        result.log(&self.program);

        if !output.status.success() {
            return Err(BnaError::Command {
                program: self.program.clone(),
                code: output.status.code(),
                output: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }

    pub async fn run(&self) -> Result<()> {
        self.output().await.map(|_| ())
    }
}

/// Feeds the standard output of `producer` into `consumer`, like a shell pipe.
pub async fn run_piped(producer: &ToolCommand, consumer: &ToolCommand) -> Result<ToolOutput> {
    debug!("{} | {}", producer.display(), consumer.display());
    let mut upstream = producer
        .command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| producer.spawn_error(e))?;

    let pipe: Stdio = upstream
        .stdout
        .take()
        .ok_or_else(|| BnaError::Validation(format!("{} has no stdout", producer.program)))?
        .try_into()
        .map_err(|e| producer.spawn_error(e))?;

    let downstream = consumer
        .command()
        .stdin(pipe)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let (upstream, downstream) = tokio::join!(upstream.wait_with_output(), downstream);
    let upstream = upstream.map_err(|e| producer.spawn_error(e))?;
    let downstream = downstream.map_err(|e| consumer.spawn_error(e))?;

    let producer_stderr = String::from_utf8_lossy(&upstream.stderr).into_owned();
    if !upstream.status.success() {
        return Err(BnaError::Command {
            program: producer.program.clone(),
            code: upstream.status.code(),
            output: producer_stderr.trim().to_string(),
        });
    }

    let result = ToolOutput {
        stdout: String::from_utf8_lossy(&downstream.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&downstream.stderr).into_owned(),
    };
    result.log(&consumer.program);
    if !downstream.status.success() {
        return Err(BnaError::Command {
            program: consumer.program.clone(),
            code: downstream.status.code(),
            output: result.stderr.trim().to_string(),
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_masks_passwords() {
        let command = ToolCommand::new("osm2pgrouting")
            .args(["--username", "postgres", "--password", "secret", "--clean"]);
        assert_eq!(
            command.display(),
            "osm2pgrouting --username postgres --password **** --clean"
        );
    }

    #[test]
    fn test_display_masks_connection_strings() {
        let command = ToolCommand::new("psql")
            .arg("postgresql://bna:s3cr3t@db:5432/bna")
            .args(["-c", "SELECT 1"]);
        assert_eq!(command.display(), "psql postgresql://bna:****@db:5432/bna -c SELECT 1");

        let command = ToolCommand::new("ogr2ogr")
            .arg("PG:host=db port=5433 user=bna password=pw dbname=bna");
        assert_eq!(
            command.display(),
            "ogr2ogr PG:host=db port=5433 user=bna password=**** dbname=bna"
        );
    }

    #[test]
    fn test_mask_secrets_keeps_urls_without_password() {
        assert_eq!(
            mask_secrets("postgres://bna@localhost/bna"),
            "postgres://bna@localhost/bna"
        );
        assert_eq!(mask_secrets("--database"), "--database");
    }

    #[tokio::test]
    async fn test_output_captures_stdout() {
        let output = ToolCommand::new("echo").arg("hello").output().await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let result = ToolCommand::new("false").run().await;
        assert!(matches!(result, Err(BnaError::Command { code: Some(1), .. })));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let result = ToolCommand::new("bna-no-such-tool").run().await;
        assert!(matches!(result, Err(BnaError::CommandSpawn { .. })));
    }

    #[tokio::test]
    async fn test_run_piped() {
        let producer = ToolCommand::new("printf").arg("abc");
        let consumer = ToolCommand::new("wc").arg("-c");
        let output = run_piped(&producer, &consumer).await.unwrap();
        assert_eq!(output.stdout.trim(), "3");
    }

    #[tokio::test]
    async fn test_run_in_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "").unwrap();
        let output = ToolCommand::new("ls")
            .current_dir(temp.path())
            .output()
            .await
            .unwrap();
        assert!(output.stdout.contains("marker.txt"));
    }
}
