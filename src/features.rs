// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Optional subsystems started alongside the child
//!
//! Features run once per entrypoint, before the child is started, unless the
//! entrypoint is disabled. A failing feature prevents the child from starting.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::{Config, ServerConfig};
use crate::error::BoxError;
use crate::supervisor::Supervisor;

#[async_trait]
pub trait Features: Send + Sync {
    /// Start the feature set.
    ///
    /// `is_retry` is false for the initial start, and true when the features
    /// are re-initialized for an entrypoint that already started them once.
    async fn init(&self, ceb: &mut Supervisor, cfg: &Config, is_retry: bool)
        -> Result<(), BoxError>;
}

/// Starts nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFeatures;

#[async_trait]
impl Features for NoFeatures {
    async fn init(&self, _: &mut Supervisor, _: &Config, _: bool) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Holds the context of the live URL agent, at most one at a time
#[derive(Debug, Default)]
pub struct UrlAgentGuard {
    live: Mutex<Option<CancellationToken>>,
}

impl UrlAgentGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Derive a new agent context from `parent`, cancelling any previous one
    pub fn acquire(&self, parent: &CancellationToken) -> CancellationToken {
        let mut live = self.lock();
        if let Some(previous) = live.take() {
            debug!("replacing live url agent context");
            previous.cancel();
        }

        let ctx = parent.child_token();
        *live = Some(ctx.clone());
        ctx
    }

    /// Cancel the live agent context, if any
    pub fn release(&self) {
        if let Some(ctx) = self.lock().take() {
            debug!("releasing url agent context");
            ctx.cancel();
        }
    }

    pub fn is_live(&self) -> bool {
        self.lock().as_ref().map_or(false, |ctx| !ctx.is_cancelled())
    }
}

/// The URL routing agent; runs until its context is cancelled
#[async_trait]
pub trait UrlAgent: Send + Sync + 'static {
    async fn serve(
        &self,
        ctx: CancellationToken,
        server: ServerConfig,
        port: u16,
    ) -> Result<(), BoxError>;
}

/// Runs a [`UrlAgent`] in the background when an invite token is configured
#[derive(Debug)]
pub struct UrlAgentFeature<A> {
    agent: Arc<A>,
}

impl<A: UrlAgent> UrlAgentFeature<A> {
    pub fn new(agent: A) -> Self {
        Self {
            agent: Arc::new(agent),
        }
    }
}

#[async_trait]
impl<A: UrlAgent> Features for UrlAgentFeature<A> {
    async fn init(
        &self,
        ceb: &mut Supervisor,
        cfg: &Config,
        is_retry: bool,
    ) -> Result<(), BoxError> {
        if cfg.server().invite_token.is_empty() {
            debug!("no invite token configured, url service disabled");
            return Ok(());
        }

        let guard = ceb.url_agent();
        let ctx = guard.acquire(ceb.context());

        // one release path, however often the agent is restarted
        if !is_retry {
            let release = Arc::clone(&guard);
            ceb.cleanup(move || release.release());
        }

        let agent = Arc::clone(&self.agent);
        let server = cfg.server().clone();
        let port = cfg.url_service_port();

        info!(port, "starting url service agent");
        tokio::spawn(
            async move {
                if let Err(err) = agent.serve(ctx, server, port).await {
                    warn!(error = %err, "url service agent exited with an error");
                }
            }
            .instrument(ceb.span().clone()),
        );

        Ok(())
    }
}
