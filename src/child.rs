// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Launching and reaping the wrapped application

use std::path::{Path, PathBuf};

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn, Instrument, Span};

use crate::error::{BoxError, Error, ErrorKind};

type ExitResult = Result<(), Error>;

/// A prepared, but not yet started, child process
#[derive(Debug)]
pub struct ChildCmd {
    command: Command,
    program: PathBuf,
}

/// Build the command for the child process.
///
/// The first element of `exec_args` is the executable, it is searched for on
/// the `PATH` unless it is a path. `env` is added on top of the inherited
/// environment.
pub fn prepare(exec_args: &[String], env: &[(String, String)]) -> Result<ChildCmd, BoxError> {
    let (exec, args) = exec_args
        .split_first()
        .ok_or("no executable was configured for the child process")?;

    let program = which::which(exec)
        .map_err(|e| format!("failed to find executable {:?}: {}", exec, e))?;

    // FIXME: set working directory? uid/gid?
    let mut command = Command::new(&program);
    command
        .args(args)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .kill_on_drop(true);

    Ok(ChildCmd { command, program })
}

impl ChildCmd {
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Spawn the process, and a task that reports its exit
    pub fn start(mut self) -> Result<RunningChild, Error> {
        let child = self.command.spawn().map_err(ErrorKind::ChildSpawn)?;
        let pid = child.id();

        info!(pid = ?pid, program = %self.program.display(), "started child process");

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(reap(child, kill_rx, exit_tx).instrument(Span::current()));

        Ok(RunningChild {
            pid,
            kill: Some(kill_tx),
            exit: Some(exit_rx),
        })
    }
}

/// Owns the child until it exits, and sends its result exactly once.
///
/// A kill request, or the handle going away, forces the child down; the exit
/// is still awaited so the process is always reaped.
async fn reap(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exit: oneshot::Sender<ExitResult>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(err) = child.start_kill() {
                warn!(error = %err, "failed to kill child process");
            }
            child.wait().await
        }
    };

    let result = match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(Error::from(ErrorKind::ChildExit(status))),
        Err(err) => Err(Error::from(ErrorKind::ChildLost(err.to_string()))),
    };

    match &result {
        Ok(()) => debug!("child process exited successfully"),
        Err(err) => debug!(error = %err, "child process exited"),
    }

    exit.send(result).ok();
}

/// Handle to a started child process
#[derive(Debug)]
pub struct RunningChild {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    exit: Option<oneshot::Receiver<ExitResult>>,
}

impl RunningChild {
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Request a forced kill of the child
    ///
    /// Safe to call any number of times, and after the child has exited.
    pub fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            debug!(pid = ?self.pid, "killing child process");
            kill.send(()).ok();
        }
    }

    /// Wait for the child's exit result
    ///
    /// The result is handed out once, later calls return `ChildExhausted`.
    /// Dropping this future before it completes does not lose the result.
    pub async fn wait(&mut self) -> ExitResult {
        let exit = match self.exit.as_mut() {
            Some(exit) => exit,
            None => return Err(ErrorKind::ChildExhausted.into()),
        };

        let result = exit.await;
        self.exit = None;

        result.unwrap_or_else(|_| Err(ErrorKind::ChildLost("reaper exited early".to_string()).into()))
    }
}
