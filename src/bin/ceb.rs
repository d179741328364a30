// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use clap::{App, AppSettings, Arg, ArgMatches};
use tokio::runtime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ceb::{logging, Entrypoint, Error, Opt};

const EXEC: &str = "EXEC";
const DISABLE: &str = "disable";
const SERVER_ADDR: &str = "server-addr";
const SERVER_TLS: &str = "server-tls";
const SERVER_TLS_SKIP_VERIFY: &str = "server-tls-skip-verify";
const SERVER_REQUIRED: &str = "server-required";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
    fn server_opts(self) -> Self;
}

impl<'a, 'b> SetupClapApp for App<'a, 'b> {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }

    fn server_opts(self) -> Self {
        self.arg(
            Arg::with_name(SERVER_ADDR)
                .long(SERVER_ADDR)
                .value_name("ADDR")
                .takes_value(true)
                .help("address of the server, overrides WAYPOINT_SERVER_ADDR"),
        )
        .arg(
            Arg::with_name(SERVER_TLS)
                .long(SERVER_TLS)
                .help("connect to the server with TLS"),
        )
        .arg(
            Arg::with_name(SERVER_TLS_SKIP_VERIFY)
                .long(SERVER_TLS_SKIP_VERIFY)
                .help("do not verify the server's TLS certificate"),
        )
        .arg(
            Arg::with_name(SERVER_REQUIRED)
                .long(SERVER_REQUIRED)
                .help("exit if the server can not be reached"),
        )
    }
}

fn main() {
    logging::init();

    let args = App::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .setting(AppSettings::TrailingVarArg)
        .arg(
            Arg::with_name(DISABLE)
                .long(DISABLE)
                .help("only run the child, without the entrypoint features"),
        )
        .server_opts()
        .arg(
            Arg::with_name(EXEC)
                .required(true)
                .multiple(true)
                .help("the program to run, followed by its arguments"),
        )
        .get_matches();

    if let Err(err) = run(options(&args)) {
        error!(error = %err, "entrypoint exited with an error");
        std::process::exit(err.exit_code());
    }
}

/// Flags given on the command line are applied after, and so win over, the environment
fn options(args: &ArgMatches<'_>) -> Vec<Opt> {
    let mut opts = vec![Opt::env_defaults()];

    if let Some(addr) = args.value_of(SERVER_ADDR) {
        opts.push(Opt::ServerAddr(addr.to_string()));
    }
    if args.is_present(SERVER_TLS) {
        opts.push(Opt::ServerTls(true));
    }
    if args.is_present(SERVER_TLS_SKIP_VERIFY) {
        opts.push(Opt::ServerTlsSkipVerify(true));
    }
    if args.is_present(SERVER_REQUIRED) {
        opts.push(Opt::ServerRequired(true));
    }
    if args.is_present(DISABLE) {
        opts.push(Opt::Disable(true));
    }

    let exec = args.values_of(EXEC).map(|v| v.collect::<Vec<_>>()).unwrap_or_default();
    opts.push(Opt::exec(exec));

    opts
}

fn run(opts: Vec<Opt>) -> Result<(), Error> {
    let runtime = runtime::Builder::new_current_thread().enable_all().build()?;

    runtime.block_on(async move {
        let ctx = CancellationToken::new();

        let signal_ctx = ctx.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => {
                    info!("received shutdown signal");
                    signal_ctx.cancel();
                }
                Err(err) => warn!(error = %err, "failed to listen for shutdown signals"),
            }
        });

        Entrypoint::default().run(ctx, opts).await
    })
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }

    Ok(())
}
