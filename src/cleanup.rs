// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt::{self, Debug};

use tracing::debug;

type Action = Box<dyn FnOnce() + Send + 'static>;

/// Teardown actions, run once when the entrypoint closes
///
/// Actions run in the order they were registered: the first registered is
/// the first to run. Once the teardown has happened, further registrations
/// are dropped without running.
#[derive(Default)]
pub struct Cleanup {
    actions: Vec<Action>,
    closed: bool,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.closed {
            debug!("cleanup already ran, ignoring registration");
            return;
        }

        self.actions.push(Box::new(action));
    }

    /// Runs every registered action; subsequent calls do nothing
    pub fn run(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        debug!(count = self.actions.len(), "running cleanup");
        for action in self.actions.drain(..) {
            action();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup")
            .field("actions", &self.actions.len())
            .field("closed", &self.closed)
            .finish()
    }
}
