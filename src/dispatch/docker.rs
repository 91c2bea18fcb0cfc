use super::container::{ContainerRuntime, OutputStream, RunningContainer};
use super::{ContainerError, RunSpec};
use crate::config::ContainerSettings;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

/// Drives the `docker` command line client. Environment values are handed to
/// the client through its own environment (`-e KEY`), so they never show up
/// in the process list.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    docker_host: Option<String>,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, docker_host: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            docker_host,
        }
    }

    pub fn from_settings(settings: &ContainerSettings) -> Self {
        Self::new(settings.binary.clone(), settings.docker_host.clone())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(host) = &self.docker_host {
            command.env("DOCKER_HOST", host);
        }
        command
    }

    fn missing_or_spawn(&self, err: std::io::Error) -> ContainerError {
        if err.kind() == std::io::ErrorKind::NotFound {
            ContainerError::MissingBinary {
                binary: self.binary.clone(),
            }
        } else {
            ContainerError::Spawn {
                binary: self.binary.clone(),
                source: err,
            }
        }
    }

    pub fn run_args(spec: &RunSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];
        for key in spec.env.keys() {
            args.push("-e".to_string());
            args.push(key.clone());
        }
        for mount in &spec.mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}", mount.source.display(), mount.target));
        }
        args.push(spec.image.reference());
        args
    }

    fn run_quiet(&self, args: &[&str]) -> Result<(), ContainerError> {
        let output = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| self.missing_or_spawn(err))?;
        if output.status.success() {
            return Ok(());
        }
        Err(ContainerError::Command {
            command: format!("{} {}", self.binary, args.join(" ")),
            code: exit_code(output.status),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

impl ContainerRuntime for DockerCli {
    fn remove_stale(&self, name: &str) -> Result<(), ContainerError> {
        match self.run_quiet(&["rm", "-f", name]) {
            Err(ContainerError::Command { stderr, .. })
                if stderr.to_ascii_lowercase().contains("no such container") =>
            {
                Ok(())
            }
            other => other,
        }
    }

    fn start(&self, spec: &RunSpec) -> Result<Box<dyn RunningContainer>, ContainerError> {
        let child = self
            .command()
            .args(Self::run_args(spec))
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| self.missing_or_spawn(err))?;
        Ok(Box::new(DockerProcess {
            child,
            name: spec.name.clone(),
            cli: self.clone(),
        }))
    }
}

struct DockerProcess {
    child: Child,
    name: String,
    cli: DockerCli,
}

impl RunningContainer for DockerProcess {
    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.child
            .stdout
            .take()
            .map(|stream| Box::new(stream) as OutputStream)
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.child
            .stderr
            .take()
            .map(|stream| Box::new(stream) as OutputStream)
    }

    fn try_wait(&mut self) -> Result<Option<i32>, ContainerError> {
        self.child
            .try_wait()
            .map(|status| status.map(exit_code))
            .map_err(|source| ContainerError::Io {
                context: format!("waiting for container {}", self.name),
                source,
            })
    }

    fn stop(&mut self, grace: Duration) -> Result<(), ContainerError> {
        let secs = grace.as_secs().to_string();
        self.cli.run_quiet(&["stop", "-t", &secs, &self.name])
    }

    fn kill(&mut self) -> Result<(), ContainerError> {
        let engine = self.cli.run_quiet(&["kill", &self.name]);
        match self.child.kill() {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(source) => {
                return Err(ContainerError::Io {
                    context: format!("killing client for container {}", self.name),
                    source,
                })
            }
        }
        let _ = self.child.wait();
        engine
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
