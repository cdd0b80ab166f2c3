//! CLI entry point for the SPI bridge server.

use std::env;
use std::ffi::OsString;
use std::net::IpAddr;

use bridge_core as _;
use bridge_server::config::LOG_VAR;
use bridge_server::{run_server, ServerConfig};
use env_logger::Env;
use log::error;
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
use thiserror as _;

const USAGE_TEXT: &str = "\
Usage: spi-bridge [options]

Serves one client connection against the reference register file, then exits.

Options:
  -p, --port <port>  Port to listen on (overrides SPI_BRIDGE_PORT, default 7170)
  -b, --bind <addr>  Address to bind (overrides SPI_BRIDGE_BIND, default 127.0.0.1)
  -h, --help         Show this help message

Environment:
  SPI_BRIDGE_LOG     Log filter (default: info)
";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Overrides {
    port: Option<u16>,
    bind: Option<IpAddr>,
}

#[derive(Debug)]
enum ParseResult {
    Serve(Overrides),
    Help,
}

#[allow(clippy::while_let_on_iterator)]
fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut overrides = Overrides::default();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Ok(ParseResult::Help);
        }

        if arg == "--port" || arg == "-p" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --port".to_string())?;
            let value = value.to_string_lossy();
            overrides.port = Some(
                value
                    .parse()
                    .map_err(|_| format!("invalid port: {value}"))?,
            );
            continue;
        }

        if arg == "--bind" || arg == "-b" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --bind".to_string())?;
            let value = value.to_string_lossy();
            overrides.bind = Some(
                value
                    .parse()
                    .map_err(|_| format!("invalid address: {value}"))?,
            );
            continue;
        }

        return Err(format!("unknown option: {}", arg.to_string_lossy()));
    }

    Ok(ParseResult::Serve(overrides))
}

fn run(overrides: Overrides) -> Result<(), i32> {
    let mut config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return Err(2);
        }
    };
    if let Some(port) = overrides.port {
        config.port = port;
    }
    if let Some(bind) = overrides.bind {
        config.bind = bind;
    }

    match run_server(&config) {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("{e}");
            Err(1)
        }
    }
}

fn main() {
    let log_env = Env::default().filter_or(LOG_VAR, "info");
    env_logger::init_from_env(log_env);

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Serve(overrides)) => match run(overrides) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{USAGE_TEXT}");
            1
        }
    };

    std::process::exit(exit_code);
}
