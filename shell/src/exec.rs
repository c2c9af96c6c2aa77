//! Process orchestration: spawns the stages of a [`Pipeline`], wires their standard
//! streams together and waits for them (or lets them run in the background).
//!
//! Each pipe between two stages is owned by exactly one handle at any time. The read end
//! of stage `i`'s stdout is moved into stage `i + 1`'s [`Command`] and dropped in the
//! parent as soon as that command has been spawned, so no process other than the two
//! neighbours ever keeps a pipe end open. All descriptors opened by the standard library
//! are close-on-exec, which keeps them out of unrelated children.

use crate::command::{EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND, ExitCode, Outcome};
use crate::env::Environment;
use crate::external::find_command_path;
use crate::parser::{Pipeline, Redirection};
use log::{debug, info, warn};
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use thiserror::Error;

/// Failures that prevent a pipeline from being started.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("{0}: command not found")]
    CommandNotFound(String),
    #[error("{program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{}: {source}", .path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("wait failed: {0}")]
    Wait(#[source] io::Error),
}

impl SpawnError {
    /// The exit status a shell reports for this failure.
    pub fn status(&self) -> ExitCode {
        match self {
            SpawnError::CommandNotFound(_) => EXIT_NOT_FOUND,
            SpawnError::Spawn { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => EXIT_NOT_FOUND,
                io::ErrorKind::PermissionDenied => EXIT_NOT_EXECUTABLE,
                _ => 1,
            },
            SpawnError::Redirect { .. } | SpawnError::Wait(_) => 1,
        }
    }
}

/// Runs `pipeline` with the variables and working directory of `env`.
///
/// Foreground pipelines block until every stage has exited and report the status of
/// the last stage. Background pipelines return their process ids immediately.
pub fn run(pipeline: &Pipeline, env: &Environment) -> Outcome {
    let children = match spawn_all(pipeline, env) {
        Ok(children) => children,
        Err(err) => return Outcome::SpawnFailure(err),
    };

    if pipeline.background {
        detach(children)
    } else {
        wait_all(children)
    }
}

fn spawn_all(pipeline: &Pipeline, env: &Environment) -> Result<Vec<Child>, SpawnError> {
    let last = pipeline.stages.len().saturating_sub(1);
    let mut children: Vec<Child> = Vec::with_capacity(pipeline.stages.len());
    let mut upstream: Option<ChildStdout> = None;

    for (index, argv) in pipeline.stages.iter().enumerate() {
        let stage = Stage {
            argv,
            first: index == 0,
            last: index == last,
            background: pipeline.background,
            group: children.first().map(Child::id),
        };
        match stage.spawn(upstream.take(), &pipeline.redirection, env) {
            Ok(mut child) => {
                info!("spawned {} as pid {}", argv[0], child.id());
                if !stage.last {
                    upstream = child.stdout.take();
                }
                children.push(child);
            }
            Err(err) => {
                abandon(children);
                return Err(err);
            }
        }
    }

    Ok(children)
}

struct Stage<'a> {
    argv: &'a [String],
    first: bool,
    last: bool,
    background: bool,
    /// Process group of a background pipeline, once its first stage exists.
    group: Option<u32>,
}

impl Stage<'_> {
    fn spawn(
        &self,
        upstream: Option<ChildStdout>,
        redirection: &Redirection,
        env: &Environment,
    ) -> Result<Child, SpawnError> {
        let name = &self.argv[0];
        let search_paths = env.get_var("PATH").unwrap_or_default();
        let program =
            find_command_path(OsStr::new(&search_paths), Path::new(name), &env.current_dir)
                .ok_or_else(|| SpawnError::CommandNotFound(name.clone()))?;

        let stdin = self.stdin(upstream, redirection, env)?;
        let stdout = self.stdout(redirection, env)?;

        let mut command = Command::new(&*program);
        command
            .arg0(name)
            .args(&self.argv[1..])
            .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&env.current_dir)
            .stdin(stdin)
            .stdout(stdout);
        if self.background {
            // Keeps an interrupt typed at the prompt away from background pipelines.
            command.process_group(self.group.map_or(0, |pgid| pgid as i32));
        }

        command.spawn().map_err(|source| SpawnError::Spawn {
            program: name.clone(),
            source,
        })
    }

    fn stdin(
        &self,
        upstream: Option<ChildStdout>,
        redirection: &Redirection,
        env: &Environment,
    ) -> Result<Stdio, SpawnError> {
        if let Some(pipe) = upstream {
            return Ok(Stdio::from(pipe));
        }
        match (&redirection.input, self.first) {
            (Some(path), true) => {
                let path = env.current_dir.join(path);
                File::open(&path)
                    .map(Stdio::from)
                    .map_err(|source| SpawnError::Redirect { path, source })
            }
            (None, true) if !self.background => Ok(Stdio::inherit()),
            _ => Ok(Stdio::null()),
        }
    }

    fn stdout(&self, redirection: &Redirection, env: &Environment) -> Result<Stdio, SpawnError> {
        if !self.last {
            return Ok(Stdio::piped());
        }
        match &redirection.output {
            Some(path) => {
                let path = env.current_dir.join(path);
                open_output(&path, redirection.append)
                    .map(Stdio::from)
                    .map_err(|source| SpawnError::Redirect { path, source })
            }
            None => Ok(Stdio::inherit()),
        }
    }
}

/// Opens an output redirection target: created if absent, truncated unless `append`.
pub fn open_output(path: &Path, append: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path)
}

/// Stops and reaps stages that were started before a later stage failed.
fn abandon(children: Vec<Child>) {
    for mut child in children {
        let pid = child.id();
        if let Err(err) = child.kill() {
            debug!("kill {}: {}", pid, err);
        }
        if let Err(err) = child.wait() {
            warn!("reaping {}: {}", pid, err);
        }
    }
}

/// Waits for every stage in order, returning the status of the last one.
fn wait_all(children: Vec<Child>) -> Outcome {
    let mut outcome = Outcome::Exited(0);
    for mut child in children {
        let pid = child.id();
        outcome = match child.wait() {
            Ok(status) => {
                debug!("pid {} exited with {}", pid, status);
                Outcome::Exited(exit_code(status))
            }
            Err(err) => {
                warn!("waiting for {}: {}", pid, err);
                Outcome::SpawnFailure(SpawnError::Wait(err))
            }
        };
    }
    outcome
}

/// Hands each child to its own reaper thread and returns without waiting.
fn detach(children: Vec<Child>) -> Outcome {
    let pids: Vec<u32> = children.iter().map(Child::id).collect();
    for mut child in children {
        let pid = child.id();
        let spawned = thread::Builder::new()
            .name(format!("reap-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => info!("background pid {} finished: {}", pid, status),
                Err(err) => warn!("background pid {}: {}", pid, err),
            });
        if let Err(err) = spawned {
            warn!("no reaper for background pid {}: {}", pid, err);
        }
    }
    Outcome::Background(pids)
}

/// Maps an [`ExitStatus`] to a shell status, `128 + signal` for signalled children.
pub fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => code,
        None => terminated_by_signal(status),
    }
}

fn terminated_by_signal(exit_status: ExitStatus) -> ExitCode {
    if let Some(signal) = exit_status.signal() {
        128 + signal
    } else if exit_status.core_dumped() {
        255
    } else {
        -1
    }
}
