//! Command-line entry point for contact identity resolution.
//!
//! # Responsibility
//! - Parse flags, layer them over env config and print JSON envelopes.
//! - Exit non-zero whenever the envelope reports failure.

use clap::{value_parser, Arg, ArgMatches, Command};
use contact_identity_api::{
    cluster, identify, init_logging_from, IdentifyRequest, IdentifyResponse, IdentityConfig,
};
use contact_identity_core::core_version;
use std::path::PathBuf;
use std::process::ExitCode;

fn cli() -> Command {
    Command::new("contact-identity")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Consolidate contact observations into identity clusters")
        .subcommand_required(true)
        .arg(
            Arg::new("db")
                .long("db")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("SQLite database path (overrides CONTACT_IDENTITY_DB_PATH)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("trace|debug|info|warn|error"),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Absolute directory for rolling log files"),
        )
        .subcommand(
            Command::new("identify")
                .about("Resolve one observation and print the consolidated contact")
                .arg(Arg::new("email").long("email").help("Observed email"))
                .arg(Arg::new("phone").long("phone").help("Observed phone number")),
        )
        .subcommand(
            Command::new("show")
                .about("Print the cluster holding a contact id")
                .arg(
                    Arg::new("id")
                        .required(true)
                        .value_parser(value_parser!(i64))
                        .help("Any contact id in the cluster"),
                ),
        )
        .subcommand(Command::new("version").about("Print core version"))
}

fn config_from(matches: &ArgMatches) -> IdentityConfig {
    let mut config = IdentityConfig::from_env();
    if let Some(db) = matches.get_one::<PathBuf>("db") {
        config.db_path = db.clone();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log_level = level.clone();
    }
    if let Some(dir) = matches.get_one::<PathBuf>("log-dir") {
        config.log_dir = Some(dir.clone());
    }
    config
}

fn print_response(response: &IdentifyResponse) -> ExitCode {
    match serde_json::to_string_pretty(response) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("failed to encode response: {err}");
            return ExitCode::FAILURE;
        }
    }
    if response.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    let matches = cli().get_matches();

    if let Some(("version", _)) = matches.subcommand() {
        println!("contact_identity_core version={}", core_version());
        return ExitCode::SUCCESS;
    }

    let config = config_from(&matches);
    if let Err(err) = init_logging_from(&config) {
        eprintln!("logging init failed: {err}");
        return ExitCode::FAILURE;
    }

    if config.install().is_err() {
        eprintln!("contact identity config was already resolved");
        return ExitCode::FAILURE;
    }

    let response = match matches.subcommand() {
        Some(("identify", args)) => identify(&IdentifyRequest {
            email: args.get_one::<String>("email").cloned(),
            phone_number: args.get_one::<String>("phone").cloned(),
        }),
        Some(("show", args)) => match args.get_one::<i64>("id") {
            Some(id) => cluster(*id),
            None => return ExitCode::FAILURE,
        },
        _ => return ExitCode::FAILURE,
    };

    print_response(&response)
}
