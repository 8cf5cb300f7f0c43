use ansi_term::Color;
use clap::Parser;
use proxy_chain::{ChainDescriptor, Engine, EngineConfig};
use std::time::Duration;

macro_rules! message {
    (Success, $m:expr $(, $a:expr)* $(,)?) => {
        print!("{} ", Color::Green.bold().paint("Success:"));
        println!($m, $($a), *);
    };
    (Info, $m:expr $(, $a:expr)* $(,)?) => {
        print!("{} ", Color::White.bold().paint("Info:"));
        println!($m, $($a), *);
    };
    (Fatal, $m:expr $(, $a:expr)* $(,)?) => {
        print!("{} ", Color::Red.bold().paint("Error:"));
        println!($m, $($a), *);
        std::process::exit(1);
    };
}

/// Connects through a chain of proxy hops described by a JSON chain
/// descriptor file to a single target host:port.
#[derive(Parser)]
#[command(name = "chain-connect", version, author = "TonyGraim")]
struct Cli {
    /// Path to a JSON chain descriptor: `{"id","name","proxies":[...]}`.
    #[arg(short = 'c', long = "chain")]
    chain_path: String,

    /// The final target, in `host:port` format.
    #[arg(short = 't', long)]
    target: String,

    /// Enable structured step logging to stderr.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }

    let json = match std::fs::read_to_string(&cli.chain_path) {
        Ok(json) => json,
        Err(e) => {
            message!(Fatal, "Cannot read chain descriptor `{}`: {}", cli.chain_path, e);
        }
    };

    let chain: ChainDescriptor = match ChainDescriptor::from_json(&json) {
        Ok(chain) => chain,
        Err(e) => {
            message!(Fatal, "Malformed chain descriptor: {}", e);
        }
    };

    let (target_host, target_port) = match cli.target.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => {
                message!(Fatal, "Target port `{}` is not a valid u16", port);
            }
        },
        None => {
            message!(Fatal, "Target must be in `host:port` format, got `{}`", cli.target);
        }
    };

    message!(
        Info,
        "Building chain `{}` ({} hop(s)) to `{}:{}`",
        chain.name,
        chain.proxies.len(),
        target_host,
        target_port
    );

    let config = EngineConfig::new(
        Duration::from_secs(15),
        Duration::from_secs(60),
        2,
        cli.verbose,
    );
    let engine = Engine::new(config);

    let (tunnel, report) = match engine.build_chain(&chain, &target_host, target_port).await {
        Ok(result) => result,
        Err(e) => {
            message!(Fatal, "Could not build the chain: {}", e);
        }
    };

    message!(
        Success,
        "Connected to `{}:{}` in {:?} across {} step(s), tunnel id {}",
        report.target_host,
        report.target_port,
        report.duration,
        report.steps.len(),
        tunnel.id()
    );

    for step in &report.steps {
        println!(
            "  step {} ({:?}) via `{}:{}` -> {:?}",
            step.index, step.kind, step.proxy.address, step.proxy.port, step.outcome
        );
    }
}
