//! Command-line configuration.
//!
//! Parsed by hand: four positional arguments plus a handful of `--flag` and
//! `--key=value` options, which may appear anywhere. `--` ends option parsing
//! so a password starting with `-` can still be passed.

use crate::error::ConfigError;
use crate::model::Identity;
use crate::port_resolver::DEFAULT_PORT_DIR;
use crate::xmpp::TlsSettings;
use std::path::PathBuf;

pub const DEFAULT_LOG_DIR: &str = "/var/log/appscale";

/// How much goes to stderr on top of the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Lifecycle events only (`-v`, `--verbose`).
    Default,
    /// Also raw XMPP traffic (`--verbose=xmpp`).
    Xmpp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub identity: Identity,
    pub log_dir: PathBuf,
    pub port_dir: PathBuf,
    pub verbose: Option<Verbosity>,
    pub tls: TlsSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(BridgeConfig),
    Help,
}

const POSITIONAL_NAMES: [&str; 4] = ["APP_ID", "LOGIN_HOST", "MESSAGING_HOST", "APP_PASSWORD"];

impl BridgeConfig {
    /// Parse the arguments that follow the program name.
    pub fn from_args<I, S>(args: I) -> Result<Command, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut positional: Vec<String> = Vec::new();
        let mut log_dir = PathBuf::from(DEFAULT_LOG_DIR);
        let mut port_dir = PathBuf::from(DEFAULT_PORT_DIR);
        let mut verbose = None;
        let mut tls = TlsSettings::default();
        let mut options_done = false;

        for arg in args {
            let arg: String = arg.into();
            if options_done || !arg.starts_with('-') || arg == "-" {
                positional.push(arg);
                continue;
            }
            match arg.as_str() {
                "--" => options_done = true,
                "-h" | "--help" => return Ok(Command::Help),
                "-v" | "--verbose" => verbose = Some(Verbosity::Default),
                "--verbose=xmpp" => verbose = Some(Verbosity::Xmpp),
                "--no-starttls" => tls.starttls = false,
                "--dangerous-insecure-tls" => tls.insecure = true,
                _ => {
                    if let Some(dir) = arg.strip_prefix("--log-dir=") {
                        log_dir = non_empty_path(dir, "--log-dir")?;
                    } else if let Some(dir) = arg.strip_prefix("--port-dir=") {
                        port_dir = non_empty_path(dir, "--port-dir")?;
                    } else {
                        return Err(ConfigError::UnknownOption(arg));
                    }
                }
            }
        }

        let [application_id, login_host, messaging_host, password]: [String; 4] = positional
            .try_into()
            .map_err(|rest: Vec<String>| ConfigError::WrongArgumentCount(rest.len()))?;

        for (name, value) in POSITIONAL_NAMES
            .into_iter()
            .zip([&application_id, &login_host, &messaging_host, &password])
        {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(name));
            }
        }
        if application_id
            .chars()
            .any(|c| c == '@' || c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(ConfigError::InvalidAppId(application_id));
        }

        Ok(Command::Run(BridgeConfig {
            identity: Identity {
                application_id,
                login_host,
                messaging_host,
                password,
            },
            log_dir,
            port_dir,
            verbose,
            tls,
        }))
    }
}

fn non_empty_path(value: &str, option: &'static str) -> Result<PathBuf, ConfigError> {
    if value.is_empty() {
        Err(ConfigError::MissingValue(option))
    } else {
        Ok(PathBuf::from(value))
    }
}

pub fn usage() -> String {
    format!(
        "XMPP receiver v{version}

Usage: xmpp-receiver [OPTIONS] <APP_ID> <LOGIN_HOST> <MESSAGING_HOST> <APP_PASSWORD>

Arguments:
  APP_ID            Application id; the bridge logs in as APP_ID@LOGIN_HOST
  LOGIN_HOST        Host the application backend listens on (also the XMPP domain)
  MESSAGING_HOST    XMPP server: host, host:port, tcp://host[:port] or tls://host[:port]
  APP_PASSWORD      Password of the application's XMPP account

Options:
  -v, --verbose               Also log to stderr (no XMPP traffic)
      --verbose=xmpp          Also log to stderr, including XMPP packet content
      --log-dir=PATH          Log directory (default: {log_dir})
      --port-dir=PATH         Directory holding port-<app>_default_default.txt (default: {port_dir})
      --no-starttls           Never upgrade the XMPP connection to TLS
      --dangerous-insecure-tls
                              Disable TLS certificate verification (INSECURE!)
  -h, --help                  Show this help message

Environment variables:
  RUST_LOG                    Override log filter (e.g. RUST_LOG=debug)",
        version = env!("CARGO_PKG_VERSION"),
        log_dir = DEFAULT_LOG_DIR,
        port_dir = DEFAULT_PORT_DIR,
    )
}
