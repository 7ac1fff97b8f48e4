use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use log::info;
use std::path::PathBuf;

use authreg::client::BuilderOpts;
use authreg::{load_clients, AddrPrefix, Protocol, Section, StaticServers};

/// Client registry checker for a network authentication server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the clients configuration YAML file
    #[arg(short, long)]
    config: PathBuf,

    /// Address to look up, optionally with a prefix (e.g. 10.0.0.1 or 10.0.0.0/24)
    #[arg(short, long)]
    lookup: Option<String>,

    /// Transport protocol for the lookup: *, udp, tcp, tls or radsec
    #[arg(short, long, default_value = "udp")]
    proto: String,

    /// Treat the listener as requiring transport security from its clients
    #[arg(long)]
    tls: bool,

    /// Dump the loaded client list as JSON (secrets omitted)
    #[arg(long)]
    dump: bool,
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse command-line arguments
    let args = Args::parse();

    // Initialize logging with default filter level of "info"
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("Loading client definitions from: {:?}", args.config);

    let section = Section::from_yaml_file(&args.config)
        .wrap_err_with(|| format!("Failed to parse '{}'", args.config.display()))?;

    let registry = load_clients(
        &section,
        None,
        args.tls,
        &StaticServers::default(),
        &BuilderOpts::default(),
    )
    .wrap_err("Failed to load client list")?;

    info!("Loaded {} clients", registry.len());

    if args.dump {
        let clients: Vec<_> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&clients)?);
    }

    if let Some(raw) = &args.lookup {
        let addr = AddrPrefix::parse(raw)?;
        let proto = Protocol::from_token(&args.proto)?;

        match registry.find(&addr, proto) {
            Some(client) => {
                info!("Matched client {} ({})", client.shortname, client.addr);
                println!("{}", serde_json::to_string_pretty(client)?);
            }
            None => return Err(eyre!("No client matches {} proto {}", raw, proto)),
        }
    }

    Ok(())
}
