// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The custom entrypoint binary ("ceb")
//!
//! Wraps a deployed application as a child process. The entrypoint resolves
//! its configuration, connects to the control plane, starts the optional
//! feature subsystems, then runs the child until it exits or the entrypoint
//! is cancelled.

pub mod child;
pub mod cleanup;
pub mod config;
pub mod control;
mod error;
pub mod features;
pub mod id;
pub mod logging;
pub mod supervisor;
pub mod version;

pub use config::{Config, Opt};
pub use error::{BoxError, Error, ErrorKind};
pub use supervisor::{run, Entrypoint, State, Supervisor};
