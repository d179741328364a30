// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Runs the wrapped application under the entrypoint
//!
//! ```text
//! Initializing ──► ChildPrepared ──► Active ──► Terminated
//!                                      │            ▲
//!                                      └─► Cancelling
//! ```
//!
//! Every path through [`Entrypoint::run`] ends with exactly one cleanup pass.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures::future::FutureExt;
use futures::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::child::{self, ChildCmd, RunningChild};
use crate::cleanup::Cleanup;
use crate::config::{Config, Opt};
use crate::control::{self, Client, Connector, ControlPlane};
use crate::error::{BoxError, Error, ErrorKind};
use crate::features::{Features, NoFeatures, UrlAgentGuard};
use crate::id::{IdSource, UuidSource};
use crate::version::VersionInfo;

/// Where a supervisor is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Initializing,
    ChildPrepared,
    Active,
    Cancelling,
    Terminated,
}

/// The state of a running entrypoint
pub struct Supervisor {
    id: String,
    deployment_id: String,
    span: Span,
    context: CancellationToken,
    client: Option<Client>,
    child: Option<RunningChild>,
    exec_idx: AtomicI64,
    state: State,
    cleanup: Cleanup,
    url_agent: Arc<UrlAgentGuard>,
}

impl Supervisor {
    fn new(id: String, span: Span, context: CancellationToken) -> Self {
        Self {
            id,
            deployment_id: String::new(),
            span,
            context,
            client: None,
            child: None,
            exec_idx: AtomicI64::new(0),
            state: State::Initializing,
            cleanup: Cleanup::new(),
            url_agent: Arc::new(UrlAgentGuard::new()),
        }
    }

    /// The unique ID of this entrypoint instance
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The deployment ID that this entrypoint represents
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Cancelled when the entrypoint is asked to stop, derive sub-contexts from this
    pub fn context(&self) -> &CancellationToken {
        &self.context
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The control plane client, if one was configured or connected
    pub fn client(&self) -> Option<Arc<dyn ControlPlane>> {
        self.client.as_ref().map(|c| Arc::clone(&c.0))
    }

    pub fn url_agent(&self) -> Arc<UrlAgentGuard> {
        Arc::clone(&self.url_agent)
    }

    /// Register an action to run when the entrypoint closes
    ///
    /// Actions run in registration order.
    pub fn cleanup<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanup.register(f)
    }

    /// The index for the next exec session, starting at 1
    pub fn next_exec_index(&self) -> i64 {
        self.exec_idx.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Clean up any resources created by the entrypoint
    ///
    /// Only the first call has any effect.
    pub fn close(&mut self) {
        let _enter = self.span.enter();
        if !self.cleanup.is_closed() {
            debug!(instance_id = %self.id, "closing entrypoint");
        }

        self.state = State::Terminated;
        self.cleanup.run();
    }

    async fn init_child_cmd(
        &mut self,
        cfg: &Config,
        connector: Option<&dyn Connector>,
    ) -> Result<ChildCmd, BoxError> {
        self.client = control::resolve_client(cfg.client(), connector, cfg.server()).await?;

        let mut env = Vec::new();
        if let Some(client) = &self.client {
            match client.0.entrypoint_config(&self.id, &self.deployment_id).await {
                Ok(config) => env = config.env,
                Err(err) if cfg.server().required => return Err(err),
                Err(err) => warn!(error = %err, "failed to fetch entrypoint config, continuing without it"),
            }
        }

        let cmd = child::prepare(cfg.exec_args(), &env)?;
        debug!(program = %cmd.program().display(), env = env.len(), "prepared child process");

        Ok(cmd)
    }

    /// Start the child and wait for it, or for cancellation
    async fn exec_child_cmd(&mut self, cmd: ChildCmd) -> Result<(), Error> {
        let child = self.child.insert(cmd.start()?);
        self.state = State::Active;

        let ctx = self.context.clone();
        select! {
            result = child.wait().fuse() => return result,
            _ = ctx.cancelled().fuse() => {},
        }

        info!("received cancellation request, gracefully exiting");
        self.state = State::Cancelling;

        // the kill must be requested before waiting, the child is not expected to exit on its own
        child.terminate();
        if let Err(err) = child.wait().await {
            debug!(error = %err, "child process exited after cancellation");
        }

        Ok(())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("id", &self.id)
            .field("deployment_id", &self.deployment_id)
            .field("state", &self.state)
            .field("client", &self.client)
            .field("child", &self.child)
            .field("cleanup", &self.cleanup)
            .finish()
    }
}

/// Launches a [`Supervisor`] with its collaborators
pub struct Entrypoint {
    span: Span,
    ids: Arc<dyn IdSource>,
    features: Arc<dyn Features>,
    connector: Option<Arc<dyn Connector>>,
}

impl Default for Entrypoint {
    fn default() -> Self {
        Self::new(info_span!("ceb"))
    }
}

impl Entrypoint {
    /// All logging of the entrypoint happens within `span`
    pub fn new(span: Span) -> Self {
        Self {
            span,
            ids: Arc::new(UuidSource),
            features: Arc::new(NoFeatures),
            connector: None,
        }
    }

    pub fn with_id_source<I: IdSource + 'static>(mut self, ids: I) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn with_features<F: Features + 'static>(mut self, features: F) -> Self {
        self.features = Arc::new(features);
        self
    }

    /// Used to reach the server when no client is given with [`Opt::Client`]
    pub fn with_connector<C: Connector + 'static>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Run the entrypoint with the given options.
    ///
    /// This runs until the child exits, returning its result, or until `ctx`
    /// is cancelled. On cancellation the child is killed, and `Ok(())` is
    /// returned once it has exited.
    pub async fn run<I>(self, ctx: CancellationToken, opts: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = Opt>,
    {
        let opts: Vec<Opt> = opts.into_iter().collect();
        let span = self.span.clone();

        async move {
            let id = self.ids.next_id().map_err(ErrorKind::Internal)?;

            let mut ceb = Supervisor::new(id, self.span.clone(), ctx);
            let result = self.supervise(&mut ceb, opts).await;
            ceb.close();

            result
        }
        .instrument(span)
        .await
    }

    async fn supervise(&self, ceb: &mut Supervisor, opts: Vec<Opt>) -> Result<(), Error> {
        let mut builder = Config::builder();
        builder.apply_all(opts)?;
        let cfg = builder.build();
        ceb.deployment_id = cfg.deployment_id().to_string();

        info!(
            deployment_id = %ceb.deployment_id,
            instance_id = %ceb.id,
            args = ?cfg.exec_args(),
            "entrypoint starting"
        );

        let vsn = VersionInfo::get();
        info!(
            full_string = %vsn.full_version_number(true),
            version = vsn.version,
            prerelease = vsn.prerelease,
            metadata = vsn.metadata,
            revision = vsn.revision,
            "entrypoint version"
        );

        let cmd = ceb
            .init_child_cmd(&cfg, self.connector.as_deref())
            .await
            .map_err(ErrorKind::Aborted)?;
        ceb.state = State::ChildPrepared;

        if !cfg.disable() {
            self.features
                .init(ceb, &cfg, false)
                .await
                .map_err(ErrorKind::FeatureInit)?;
        } else {
            debug!("entrypoint features are disabled");
        }

        ceb.exec_child_cmd(cmd).await
    }
}

/// Run an entrypoint with the default collaborators
pub async fn run<I>(ctx: CancellationToken, opts: I) -> Result<(), Error>
where
    I: IntoIterator<Item = Opt>,
{
    Entrypoint::default().run(ctx, opts).await
}
