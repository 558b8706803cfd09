//! XMPP receiver: logs an application into its XMPP account and forwards every
//! chat message it receives to the application's HTTP backend.

mod config;
mod error;
mod forwarder;
mod logging;
mod model;
mod port_resolver;
mod presence;
mod session;
mod xmpp;

use config::{BridgeConfig, Command};
use forwarder::MessageForwarder;
use port_resolver::PortResolver;
use presence::PresenceResponder;
use session::ReconnectSupervisor;
use std::process::ExitCode;
use std::sync::Arc;
use xmpp::XmppClient;

fn main() -> ExitCode {
    let config = match BridgeConfig::from_args(std::env::args().skip(1)) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            eprintln!("{}", config::usage());
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("{}", config::usage());
            return ExitCode::from(2);
        }
    };

    if config.tls.insecure {
        eprintln!("WARNING: TLS certificate verification is DISABLED (--dangerous-insecure-tls)");
    }

    let identity = Arc::new(config.identity.clone());
    // Held until main returns so queued records reach the file before exit.
    let (log_file, _log_guard) = logging::init(&config.log_dir, &identity.jid(), config.verbose);
    if let Some(path) = &log_file {
        eprintln!("Log file: {}", path.display());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        build = env!("GIT_HASH"),
        jid = %identity.jid(),
        messaging_host = %identity.messaging_host,
        "Started XMPP receiver"
    );

    xmpp::init_crypto_provider();

    let forwarder = match MessageForwarder::new(PortResolver::new(&config.port_dir)) {
        Ok(forwarder) => forwarder,
        Err(e) => {
            tracing::error!(error = %e, "Could not create HTTP client");
            eprintln!("Error: could not create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Could not start async runtime");
            eprintln!("Error: could not start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tls = config.tls;
    let mut supervisor = ReconnectSupervisor::new(
        identity,
        move || XmppClient::new(tls),
        Arc::new(forwarder),
        Arc::new(PresenceResponder),
    );

    match runtime.block_on(supervisor.run()) {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!(error = %e, "Fatal error, exiting");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
