// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::convert::TryFrom;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use nix::sys::signal::Signal;
use thiserror::Error;

/// Errors returned by collaborators (id sources, control plane clients, features)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("failed to generate unique ID: {0}")]
    Internal(BoxError),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("failed to connect to server: {0}")]
    Aborted(BoxError),
    #[error("failed to initialize entrypoint features: {0}")]
    FeatureInit(BoxError),
    #[error("failed to start child process: {0}")]
    ChildSpawn(#[source] io::Error),
    #[error("child process {}", describe_status(.0))]
    ChildExit(ExitStatus),
    #[error("child process status was lost: {0}")]
    ChildLost(String),
    #[error("child process completion was already reported")]
    ChildExhausted,
    #[error("io error")]
    IoError(#[from] io::Error),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// The exit code to report when this error terminates the entrypoint
    ///
    /// Child exits pass their own code through; a child killed by a signal
    /// reports `128 + signal` like a shell would.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::ChildExit(status) => status
                .code()
                .or_else(|| status.signal().map(|sig| 128 + sig))
                .unwrap_or(1),
            _ => 1,
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}

fn describe_status(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with status {}", code);
    }

    match status.signal() {
        Some(sig) => match Signal::try_from(sig) {
            Ok(signal) => format!("terminated by signal {}", signal),
            Err(_) => format!("terminated by signal {}", sig),
        },
        None => format!("terminated abnormally: {}", status),
    }
}
