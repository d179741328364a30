// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Entrypoint configuration
//!
//! A [`Config`] is assembled once per run by applying a sequence of [`Opt`]s
//! in order. Later options overwrite the scalar fields set by earlier ones,
//! and the first option that fails stops the build.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use crate::control::{Client, ControlPlane};
use crate::error::{Error, ErrorKind};

pub const DEFAULT_PORT: u16 = 5000;

pub const ENV_PORT: &str = "PORT";
pub const ENV_DEPLOYMENT_ID: &str = "WAYPOINT_DEPLOYMENT_ID";
pub const ENV_SERVER_ADDR: &str = "WAYPOINT_SERVER_ADDR";
pub const ENV_SERVER_TLS: &str = "WAYPOINT_SERVER_TLS";
pub const ENV_SERVER_TLS_SKIP_VERIFY: &str = "WAYPOINT_SERVER_TLS_SKIP_VERIFY";
pub const ENV_CEB_DISABLE: &str = "WAYPOINT_CEB_DISABLE";
pub const ENV_CEB_SERVER_REQUIRED: &str = "WAYPOINT_CEB_SERVER_REQUIRED";
pub const ENV_CEB_INVITE_TOKEN: &str = "WAYPOINT_CEB_INVITE_TOKEN";

/// Where environment defaults are read from, and written back to
pub trait Environment: Debug + Send + Sync {
    fn var(&self, key: &str) -> Option<String>;

    fn set_var(&self, key: &str, value: &str);

    /// Flags are enabled by being present with any non-empty value
    fn flag(&self, key: &str) -> bool {
        self.var(key).map_or(false, |v| !v.is_empty())
    }
}

/// The environment of this process, inherited by the child
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set_var(&self, key: &str, value: &str) {
        std::env::set_var(key, value)
    }
}

/// An in-memory environment, shared between clones
#[derive(Clone, Debug, Default)]
pub struct MemoryEnv(Arc<Mutex<HashMap<String, String>>>);

impl MemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        self.set_var(key, value);
        self
    }
}

impl Environment for MemoryEnv {
    fn var(&self, key: &str) -> Option<String> {
        let vars = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        vars.get(key).cloned()
    }

    fn set_var(&self, key: &str, value: &str) {
        let mut vars = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        vars.insert(key.to_string(), value.to_string());
    }
}

/// Settings for reaching the control plane
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    pub tls: bool,
    pub tls_skip_verify: bool,
    /// Fail the run if the server can't be reached
    pub required: bool,
    pub invite_token: String,
}

/// The resolved configuration for one run
#[derive(Clone, Debug)]
pub struct Config {
    disable: bool,
    exec_args: Vec<String>,
    server: ServerConfig,
    deployment_id: String,
    url_service_port: u16,
    client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            disable: false,
            exec_args: Vec::new(),
            server: ServerConfig::default(),
            deployment_id: String::new(),
            url_service_port: DEFAULT_PORT,
            client: None,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// When set, the feature subsystems are not started, only the child
    pub fn disable(&self) -> bool {
        self.disable
    }

    /// The executable followed by its arguments
    pub fn exec_args(&self) -> &[String] {
        &self.exec_args
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// The port the wrapped application is expected to listen on
    pub fn url_service_port(&self) -> u16 {
        self.url_service_port
    }

    pub(crate) fn client(&self) -> Option<Client> {
        self.client.clone()
    }
}

/// A single configuration step
#[derive(Debug)]
pub enum Opt {
    /// Read the well-known environment variables
    EnvDefaults(Box<dyn Environment>),
    /// Binary and arguments of the child process
    Exec(Vec<String>),
    /// Use this client directly, ignoring any server address
    Client(Client),
    ServerAddr(String),
    ServerTls(bool),
    ServerTlsSkipVerify(bool),
    ServerRequired(bool),
    InviteToken(String),
    Disable(bool),
}

impl Opt {
    /// Environment defaults from the process environment.
    ///
    /// If this is not applied, environment based configuration is ignored.
    pub fn env_defaults() -> Self {
        Opt::EnvDefaults(Box::new(ProcessEnv))
    }

    pub fn env_defaults_from<E: Environment + 'static>(env: E) -> Self {
        Opt::EnvDefaults(Box::new(env))
    }

    /// If the first value is not a path, it is looked up on the `PATH` when the child is prepared
    pub fn exec<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Opt::Exec(args.into_iter().map(Into::into).collect())
    }

    pub fn client(client: Arc<dyn ControlPlane>) -> Self {
        Opt::Client(Client(client))
    }
}

/// Applies [`Opt`]s in order to produce a [`Config`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn apply(&mut self, opt: Opt) -> Result<&mut Self, Error> {
        let cfg = &mut self.config;

        match opt {
            Opt::EnvDefaults(env) => apply_env(cfg, &*env)?,
            Opt::Exec(args) => cfg.exec_args = args,
            Opt::Client(client) => cfg.client = Some(client),
            Opt::ServerAddr(addr) => cfg.server.addr = addr,
            Opt::ServerTls(tls) => cfg.server.tls = tls,
            Opt::ServerTlsSkipVerify(skip) => cfg.server.tls_skip_verify = skip,
            Opt::ServerRequired(required) => cfg.server.required = required,
            Opt::InviteToken(token) => cfg.server.invite_token = token,
            Opt::Disable(disable) => cfg.disable = disable,
        }

        Ok(self)
    }

    /// Applies every option, stopping at the first failure
    pub fn apply_all<I>(&mut self, opts: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = Opt>,
    {
        for opt in opts {
            self.apply(opt)?;
        }

        Ok(self)
    }

    pub fn build(self) -> Config {
        self.config
    }
}

fn apply_env(cfg: &mut Config, env: &dyn Environment) -> Result<(), Error> {
    let port = match env.var(ENV_PORT).filter(|p| !p.is_empty()) {
        Some(port) => port.parse::<u16>().map_err(|e| {
            ErrorKind::Configuration(format!("invalid value of {}: {:?}: {}", ENV_PORT, port, e))
        })?,
        None => {
            // the child inherits our environment, so it sees the same port
            env.set_var(ENV_PORT, &DEFAULT_PORT.to_string());
            DEFAULT_PORT
        }
    };

    cfg.url_service_port = port;
    cfg.server.addr = env.var(ENV_SERVER_ADDR).unwrap_or_default();
    cfg.server.required = env.flag(ENV_CEB_SERVER_REQUIRED);
    cfg.server.tls = env.flag(ENV_SERVER_TLS);
    cfg.server.tls_skip_verify = env.flag(ENV_SERVER_TLS_SKIP_VERIFY);
    cfg.server.invite_token = env.var(ENV_CEB_INVITE_TOKEN).unwrap_or_default();
    cfg.disable = env.flag(ENV_CEB_DISABLE);
    cfg.deployment_id = env.var(ENV_DEPLOYMENT_ID).unwrap_or_default();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(opts: Vec<Opt>) -> Result<Config, Error> {
        let mut builder = Config::builder();
        builder.apply_all(opts)?;
        Ok(builder.build())
    }

    #[test]
    fn test_port_defaults_and_is_exported() {
        let env = MemoryEnv::new();
        let cfg = build(vec![Opt::env_defaults_from(env.clone())]).unwrap();

        assert_eq!(cfg.url_service_port(), DEFAULT_PORT);
        assert_eq!(env.var(ENV_PORT).as_deref(), Some("5000"));
    }

    #[test]
    fn test_empty_port_is_unset() {
        let env = MemoryEnv::new().with(ENV_PORT, "");
        let cfg = build(vec![Opt::env_defaults_from(env.clone())]).unwrap();

        assert_eq!(cfg.url_service_port(), DEFAULT_PORT);
        assert_eq!(env.var(ENV_PORT).as_deref(), Some("5000"));
    }

    #[test]
    fn test_explicit_port() {
        let env = MemoryEnv::new().with(ENV_PORT, "8080");
        let cfg = build(vec![Opt::env_defaults_from(env)]).unwrap();

        assert_eq!(cfg.url_service_port(), 8080);
    }

    #[test]
    fn test_invalid_port_stops_the_build() {
        let env = MemoryEnv::new().with(ENV_PORT, "http");

        let mut builder = Config::builder();
        let err = builder
            .apply_all(vec![
                Opt::exec(vec!["first"]),
                Opt::env_defaults_from(env),
                Opt::exec(vec!["never"]),
            ])
            .err()
            .unwrap();

        assert!(matches!(err.kind(), ErrorKind::Configuration(_)));
        assert_eq!(builder.build().exec_args(), &["first".to_string()][..]);
    }

    #[test]
    fn test_env_values() {
        let env = MemoryEnv::new()
            .with(ENV_DEPLOYMENT_ID, "D1")
            .with(ENV_SERVER_ADDR, "waypoint:9701")
            .with(ENV_SERVER_TLS, "1")
            .with(ENV_SERVER_TLS_SKIP_VERIFY, "")
            .with(ENV_CEB_SERVER_REQUIRED, "true")
            .with(ENV_CEB_INVITE_TOKEN, "tok");
        let cfg = build(vec![Opt::env_defaults_from(env)]).unwrap();

        assert_eq!(cfg.deployment_id(), "D1");
        assert_eq!(
            cfg.server(),
            &ServerConfig {
                addr: "waypoint:9701".to_string(),
                tls: true,
                tls_skip_verify: false,
                required: true,
                invite_token: "tok".to_string(),
            }
        );
        assert!(!cfg.disable());
    }

    #[test]
    fn test_last_write_wins() {
        let env = MemoryEnv::new()
            .with(ENV_SERVER_ADDR, "from-env:1")
            .with(ENV_CEB_DISABLE, "1");

        let cfg = build(vec![
            Opt::exec(vec!["a"]),
            Opt::ServerAddr("explicit:1".to_string()),
            Opt::env_defaults_from(env.clone()),
            Opt::Disable(false),
            Opt::exec(vec!["b", "c"]),
        ])
        .unwrap();

        assert_eq!(cfg.server().addr, "from-env:1");
        assert!(!cfg.disable());
        assert_eq!(cfg.exec_args(), &["b".to_string(), "c".to_string()][..]);

        // reordering only the independent fields changes nothing
        let cfg = build(vec![
            Opt::Disable(false),
            Opt::exec(vec!["b", "c"]),
            Opt::ServerAddr("explicit:1".to_string()),
        ])
        .unwrap();

        assert_eq!(cfg.server().addr, "explicit:1");
        assert!(!cfg.disable());
        assert_eq!(cfg.exec_args(), &["b".to_string(), "c".to_string()][..]);
    }
}
