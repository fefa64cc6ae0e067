//! Docker/Podman command-line engine

use super::{ExportStream, ImageEngine, ProgressMessage, ProgressStream, RemovedImage};
use crate::images::auth::RegistryAuth;
use crate::utils::Cancellation;
use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;

/// How often a waiting stream checks for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Output lines of a running command, from either pipe
type LineSender = Sender<io::Result<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Detect a runtime, trying `preferred` ("docker" or "podman") first
    pub fn detect_with(preferred: Option<&str>) -> Result<Self> {
        let order = match preferred {
            Some("podman") => [ContainerRuntime::Podman, ContainerRuntime::Docker],
            Some("docker") | None => [ContainerRuntime::Docker, ContainerRuntime::Podman],
            Some(other) => {
                return Err(anyhow!(
                    "Unknown container runtime '{}', expected docker or podman",
                    other
                ));
            }
        };

        for runtime in order {
            if which::which(runtime.command()).is_ok() {
                crate::log_info!("Using container runtime: {}", runtime);
                return Ok(runtime);
            }
        }

        Err(anyhow!(
            "Neither docker nor podman found. Please install one of them:\n  \
             - Docker: https://docs.docker.com/get-docker/\n  \
             - Podman: https://podman.io/getting-started/installation"
        ))
    }

    /// Get the command name for this runtime
    pub fn command(&self) -> &str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(self.command());
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Build the push command, pointing it at a throwaway auth file when
    /// credentials were given
    fn push_command(&self, reference: &str, auth_dir: Option<&Path>) -> Command {
        let mut cmd = self.base_command();
        match (self, auth_dir) {
            (ContainerRuntime::Docker, Some(dir)) => {
                cmd.arg("--config").arg(dir).args(["push", reference]);
            }
            (ContainerRuntime::Podman, Some(dir)) => {
                cmd.args(["push", "--authfile"])
                    .arg(dir.join("config.json"))
                    .arg(reference);
            }
            (_, None) => {
                cmd.args(["push", reference]);
            }
        }
        cmd
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command())
    }
}

impl ImageEngine for ContainerRuntime {
    fn pull(&self, reference: &str, cancel: &Cancellation) -> Result<ProgressStream> {
        crate::log_info!("Pulling image: {}", reference);

        let mut cmd = self.base_command();
        cmd.args(["pull", reference]);
        let stream = LineStream::spawn(cmd, format!("pull {}", reference), cancel.clone())?;

        Ok(Box::new(stream))
    }

    fn tag(&self, source: &str, target: &str, cancel: &Cancellation) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(anyhow!("cancelled before tagging {}", target));
        }
        crate::log_info!("Tagging image: {} to {}", source, target);

        let output = self
            .base_command()
            .args(["tag", source, target])
            .output()
            .with_context(|| format!("Failed to run {} tag", self))?;

        if !output.status.success() {
            return Err(anyhow!(
                "{} tag failed: {}",
                self,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(())
    }

    fn push(
        &self,
        reference: &str,
        registry_auth: &str,
        cancel: &Cancellation,
    ) -> Result<ProgressStream> {
        crate::log_info!("Pushing image: {}", reference);

        let auth_dir = if registry_auth.is_empty() {
            None
        } else {
            let auth = RegistryAuth::decode(registry_auth)?;
            if auth.is_anonymous() {
                None
            } else {
                let base = match self {
                    ContainerRuntime::Docker => docker_config_dir(),
                    ContainerRuntime::Podman => None,
                };
                Some(write_auth_file(&auth, registry_host(reference), base.as_deref())?)
            }
        };

        let cmd = self.push_command(reference, auth_dir.as_ref().map(TempDir::path));
        let mut stream = LineStream::spawn(cmd, format!("push {}", reference), cancel.clone())?;
        // Deleted once the push has been drained
        stream.auth_dir = auth_dir;

        Ok(Box::new(stream))
    }

    fn remove(&self, reference: &str, cancel: &Cancellation) -> Result<Vec<RemovedImage>> {
        if cancel.is_cancelled() {
            return Err(anyhow!("cancelled before removing {}", reference));
        }
        crate::log_info!("Removing image: {}", reference);

        let output = self
            .base_command()
            .args(["rmi", reference])
            .output()
            .with_context(|| format!("Failed to run {} rmi", self))?;

        if !output.status.success() {
            return Err(anyhow!(
                "{} rmi failed: {}",
                self,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(RemovedImage::parse_output(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    fn export(&self, references: &[String], cancel: &Cancellation) -> Result<ExportStream> {
        crate::log_info!("Exporting {} image(s)", references.len());

        let mut cmd = self.base_command();
        cmd.arg("save").args(references);
        let mut process =
            ChildProcess::spawn(cmd, format!("{} save", self), cancel.clone(), None)?;
        let stdout = process.take_stdout()?;

        Ok(Box::new(ExportReader {
            stdout,
            process,
            finished: false,
        }))
    }
}

/// Registry host of a reference, following the docker rules for implicit
/// Docker Hub references
fn registry_host(reference: &str) -> &str {
    match reference.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            first
        }
        _ => "docker.io",
    }
}

/// Docker's own config directory: `$DOCKER_CONFIG`, else `~/.docker`
fn docker_config_dir() -> Option<PathBuf> {
    std::env::var_os("DOCKER_CONFIG")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".docker")))
}

/// Write a throwaway engine config holding the push credentials.
///
/// For docker the temp dir replaces the whole config dir, so the user's
/// `config.json` from `base` is carried over (current context, proxies,
/// other auths) and its `contexts` store is linked in. Credential helpers
/// are dropped for `host` so the inline auth entry is the one used.
fn write_auth_file(auth: &RegistryAuth, host: &str, base: Option<&Path>) -> Result<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix("conformance-images-auth")
        .tempdir()
        .context("Failed to create registry auth directory")?;

    let mut config = base
        .and_then(|base| std::fs::read(base.join("config.json")).ok())
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    config.remove("credsStore");
    if let Some(Value::Object(helpers)) = config.get_mut("credHelpers") {
        helpers.remove(host);
    }

    let token = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
    let auths = config
        .entry("auths")
        .or_insert_with(|| Value::Object(Map::new()));
    if !auths.is_object() {
        *auths = Value::Object(Map::new());
    }
    if let Some(auths) = auths.as_object_mut() {
        auths.insert(host.to_string(), serde_json::json!({ "auth": token }));
    }

    std::fs::write(
        dir.path().join("config.json"),
        serde_json::to_vec(&Value::Object(config))?,
    )
    .context("Failed to write registry auth file")?;

    if let Some(contexts) = base.map(|base| base.join("contexts")).filter(|c| c.is_dir()) {
        link_contexts(&contexts, &dir.path().join("contexts"))?;
    }

    Ok(dir)
}

#[cfg(unix)]
fn link_contexts(contexts: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(contexts, link).context("Failed to link docker contexts")
}

#[cfg(not(unix))]
fn link_contexts(_contexts: &Path, _link: &Path) -> Result<()> {
    Ok(())
}

/// A running engine command whose stderr is collected in the background.
///
/// With a `progress` sender, stderr lines are also forwarded as they
/// arrive; podman reports transfer progress there.
struct ChildProcess {
    child: Child,
    stderr: Option<JoinHandle<String>>,
    description: String,
    cancel: Cancellation,
}

impl ChildProcess {
    fn spawn(
        mut cmd: Command,
        description: String,
        cancel: Cancellation,
        progress: Option<LineSender>,
    ) -> Result<Self> {
        if cancel.is_cancelled() {
            return Err(anyhow!("cancelled before {}", description));
        }

        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", description))?;

        let stderr = child.stderr.take().map(|pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                for line in BufReader::new(pipe).lines() {
                    let Ok(line) = line else { break };
                    if let Some(tx) = &progress {
                        let _ = tx.send(Ok(line.clone()));
                    }
                    text.push_str(&line);
                    text.push('\n');
                }
                text
            })
        });

        Ok(Self {
            child,
            stderr,
            description,
            cancel,
        })
    }

    fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("{} has no stdout", self.description))
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Wait for exit and turn a failure status into an error carrying stderr
    fn finish(&mut self) -> Result<()> {
        let status = self
            .child
            .wait()
            .with_context(|| format!("Failed to wait for {}", self.description))?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if self.cancel.is_cancelled() {
            return Err(anyhow!("{} cancelled", self.description));
        }
        if !status.success() {
            let detail = stderr.trim();
            return Err(if detail.is_empty() {
                anyhow!("{} failed with {}", self.description, status)
            } else {
                anyhow!("{} failed: {}", self.description, detail)
            });
        }

        Ok(())
    }
}

/// Progress lines of a pull/push from stdout and stderr; the exit status is
/// the last item
struct LineStream {
    lines: Receiver<io::Result<String>>,
    process: ChildProcess,
    auth_dir: Option<TempDir>,
    done: bool,
}

impl LineStream {
    fn spawn(cmd: Command, description: String, cancel: Cancellation) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut process = ChildProcess::spawn(cmd, description, cancel, Some(tx.clone()))?;
        let stdout = process.take_stdout()?;

        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });

        Ok(Self {
            lines: rx,
            process,
            auth_dir: None,
            done: false,
        })
    }

    fn end(&mut self) {
        self.done = true;
        self.auth_dir = None;
    }
}

impl Iterator for LineStream {
    type Item = Result<ProgressMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.process.cancel.is_cancelled() {
                self.process.kill();
                self.end();
                return Some(Err(anyhow!("{} cancelled", self.process.description)));
            }

            match self.lines.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(line)) if line.trim().is_empty() => continue,
                Ok(Ok(line)) => return Some(Ok(ProgressMessage::from_line(&line))),
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(Err(e)) => {
                    self.process.kill();
                    self.end();
                    return Some(Err(anyhow::Error::new(e).context(format!(
                        "Failed to read output of {}",
                        self.process.description
                    ))));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let result = self.process.finish();
                    self.end();
                    return result.err().map(Err);
                }
            }
        }

        None
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        if !self.done {
            self.process.kill();
        }
    }
}

/// Tar bytes of `save`; a failed exit surfaces as a read error at EOF
struct ExportReader {
    stdout: ChildStdout,
    process: ChildProcess,
    finished: bool,
}

impl Read for ExportReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }
        if self.process.cancel.is_cancelled() {
            self.process.kill();
            self.finished = true;
            return Err(io::Error::other("export cancelled"));
        }

        let n = self.stdout.read(buf)?;
        if n == 0 {
            self.finished = true;
            self.process.finish().map_err(io::Error::other)?;
        }
        Ok(n)
    }
}

impl Drop for ExportReader {
    fn drop(&mut self) {
        if !self.finished {
            self.process.kill();
        }
    }
}
