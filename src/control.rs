// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The seam to the remote control plane
//!
//! The RPC client itself lives outside this crate. The entrypoint only needs
//! something that can hand back the initial configuration for the child, and
//! optionally something that can dial the server from the configured address.

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::BoxError;

/// Configuration the control plane hands to a starting entrypoint
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntrypointConfig {
    /// Extra environment variables for the child process
    pub env: Vec<(String, String)>,
}

/// A connected control plane client
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch the initial configuration for the given instance
    async fn entrypoint_config(
        &self,
        instance_id: &str,
        deployment_id: &str,
    ) -> Result<EntrypointConfig, BoxError>;
}

/// Establishes a control plane client from the server settings
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, server: &ServerConfig) -> Result<Arc<dyn ControlPlane>, BoxError>;
}

/// Newtype so that an optional client can live in `Debug` structures
#[derive(Clone)]
pub struct Client(pub Arc<dyn ControlPlane>);

impl Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Client(..)")
    }
}

/// Pick the client for this run.
///
/// An explicit client always wins. Otherwise the connector dials the
/// configured address. Missing or failed connections are only errors when
/// the server is required.
pub(crate) async fn resolve_client(
    explicit: Option<Client>,
    connector: Option<&dyn Connector>,
    server: &ServerConfig,
) -> Result<Option<Client>, BoxError> {
    if let Some(client) = explicit {
        debug!("using explicitly configured client");
        return Ok(Some(client));
    }

    if server.addr.is_empty() {
        if server.required {
            return Err("server is required but no server address is configured".into());
        }

        debug!("no server address configured, running without a server");
        return Ok(None);
    }

    let connector = match connector {
        Some(connector) => connector,
        None if server.required => {
            return Err(format!("no connector available for server {}", server.addr).into())
        }
        None => {
            warn!(addr = %server.addr, "no connector available, running without a server");
            return Ok(None);
        }
    };

    match connector.connect(server).await {
        Ok(client) => Ok(Some(Client(client))),
        Err(err) if server.required => Err(err),
        Err(err) => {
            warn!(addr = %server.addr, error = %err, "failed to connect to server, continuing without it");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl ControlPlane for Fixed {
        async fn entrypoint_config(&self, _: &str, _: &str) -> Result<EntrypointConfig, BoxError> {
            Ok(EntrypointConfig::default())
        }
    }

    struct Refuse;

    #[async_trait]
    impl Connector for Refuse {
        async fn connect(&self, _: &ServerConfig) -> Result<Arc<dyn ControlPlane>, BoxError> {
            Err("connection refused".into())
        }
    }

    struct Accept;

    #[async_trait]
    impl Connector for Accept {
        async fn connect(&self, _: &ServerConfig) -> Result<Arc<dyn ControlPlane>, BoxError> {
            Ok(Arc::new(Fixed))
        }
    }

    fn server(addr: &str, required: bool) -> ServerConfig {
        ServerConfig {
            addr: addr.to_string(),
            required,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_explicit_client_wins() {
        let client = resolve_client(Some(Client(Arc::new(Fixed))), Some(&Refuse), &server("x:1", true))
            .await
            .unwrap();
        assert!(client.is_some());
    }

    #[tokio::test]
    async fn test_no_address() {
        assert!(resolve_client(None, None, &server("", false))
            .await
            .unwrap()
            .is_none());
        assert!(resolve_client(None, None, &server("", true)).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_only_fatal_when_required() {
        assert!(resolve_client(None, Some(&Refuse), &server("x:1", false))
            .await
            .unwrap()
            .is_none());

        let err = resolve_client(None, Some(&Refuse), &server("x:1", true))
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "connection refused");
    }

    #[tokio::test]
    async fn test_connector_used() {
        assert!(resolve_client(None, Some(&Accept), &server("x:1", true))
            .await
            .unwrap()
            .is_some());
    }
}
