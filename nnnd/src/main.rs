use std::{path::PathBuf, process, time::Duration};

use anyhow::{Context as _, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{error, info};
use nnn_core::pdu::DataObject;
use nnn_core::{BestRoute, FaceId, Forwarder, Name};

mod config;
mod report;

use config::Config;
use report::Report;

/// Arrival face for data objects injected from the `[[pending]]` section.
const LOCAL_FACE: FaceId = FaceId(0);

fn cli() -> Command {
    Command::new("nnnd")
        .version("0.1.0")
        .about("NNN node - populate forwarding and lease tables and inspect them")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Node description file")
                .value_parser(value_parser!(PathBuf))
                .default_value("nnnd.toml"),
        )
        .arg(
            Arg::new("at")
                .short('t')
                .long("at")
                .value_name("SECS")
                .help("Simulated time at which expired leases are swept")
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("lookup")
                .short('l')
                .long("lookup")
                .value_name("NAME")
                .help("Resolve a name against the tables (repeatable)")
                .value_parser(value_parser!(Name))
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the report as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("save-config")
                .long("save-config")
                .value_name("FILE")
                .help("Write the effective configuration to FILE")
                .value_parser(value_parser!(PathBuf)),
        )
}

fn main() {
    let matches = cli().get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("nnnd.toml"));
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    info!("Starting NNN node {}", config.node.name);
    info!("Config file: {}", config_path.display());

    if let Err(e) = run(&config, &matches) {
        error!("{e:#}");
        process::exit(1);
    }
}

fn run(config: &Config, matches: &ArgMatches) -> Result<()> {
    if let Some(path) = matches.get_one::<PathBuf>("save-config") {
        config
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Configuration written to {}", path.display());
    }

    let at = Duration::from_secs(matches.get_one::<u64>("at").copied().unwrap_or(0));
    let lookups: Vec<Name> = matches
        .get_many::<Name>("lookup")
        .map(|names| names.cloned().collect())
        .unwrap_or_default();

    let mut forwarder = populate(config)?;
    let expired = forwarder.clean_expired(at);
    if expired > 0 {
        info!("Swept {expired} expired lease(s) at {at:?}");
    }

    let sent = forwarder.take_outbox();
    let report = Report::collect(&config.node.name, at, expired, &forwarder, &lookups, &sent);
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

/// Build a forwarder and load faces, routes, leases and pending traffic into it.
fn populate(config: &Config) -> Result<Forwarder<BestRoute>> {
    let ctx = config
        .forwarder
        .build_context()
        .context("Invalid forwarder configuration")?;
    let mut forwarder = Forwarder::new(ctx, BestRoute::new());

    for face in config.faces() {
        forwarder.add_face(face);
    }

    for route in &config.routes {
        forwarder
            .add_route(route.prefix.clone(), route.face, route.metric)
            .with_context(|| format!("Failed to add route {} via {}", route.prefix, route.face))?;
    }

    for lease in &config.leases {
        forwarder
            .add_lease(
                lease.old.clone(),
                lease.new.clone(),
                lease.lease_expiry(),
                lease.renew_at(),
            )
            .with_context(|| format!("Failed to add lease {} -> {}", lease.old, lease.new))?;
    }

    for pending in &config.pending {
        let pdu = DataObject::new(
            pending.destination.clone().into_shared(),
            pending.payload.as_bytes().to_vec(),
        );
        forwarder.receive(Duration::ZERO, LOCAL_FACE, pdu.into());
    }

    info!(
        "Loaded {} route(s), {} lease(s), {} buffered destination(s)",
        forwarder.context().fib.len(),
        forwarder.context().nnpt.len(),
        forwarder.context().buffer.len()
    );
    Ok(forwarder)
}
