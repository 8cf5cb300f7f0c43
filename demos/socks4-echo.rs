use ansi_term::Color;
use clap::Parser;
use proxy_chain::{ChainDescriptor, Engine, EngineConfig, ProxyDescriptor, ProxyKind};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;

/// Prints out beautiful script messages
macro_rules! message {
    (Success, $m:expr $(, $a:expr)* $(,)?) => {
        print!("{} ", Color::Green.bold().paint("Success:"));
        println!($m, $($a), *);
    };
    (Info, $m:expr $(, $a:expr)* $(,)?) => {
        print!("{} ", Color::White.bold().paint("Info:"));
        println!($m, $($a), *);
    };
    (Error, $m:expr $(, $a:expr)* $(,)?) => {
        print!("{} ", Color::Red.bold().paint("Error:"));
        println!($m, $($a), *);
    };
    (Fatal, $m:expr $(, $a:expr)* $(,)?) => {
        message!(Error, $m, $($a), *);
        std::process::exit(1);
    };
}

trait Fatal<T> {
    fn fatal(self, message: &str) -> T;
}

impl<T, E> Fatal<T> for Result<T, E> {
    fn fatal(self, message: &str) -> T {
        match self {
            Ok(value) => value,
            Err(_) => {
                message!(Fatal, "{}", message);
            }
        }
    }
}

#[derive(Parser)]
#[command(name = "socks4-echo", version, author = "TonyGraim")]
struct Cli {
    /// The address of the SOCKS4 proxy, in `ip:port` format.
    #[arg(short = 'p', long = "proxy-addr")]
    proxy_address: String,

    /// The destination to reach through the proxy, in `ip:port` format.
    #[arg(short = 'd', long)]
    destination: String,

    /// The SOCKS4 user-ID to present during negotiation.
    #[arg(short = 'i', long, default_value = "")]
    ident: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let server_socket_addr: SocketAddr = cli
        .proxy_address
        .parse()
        .fatal("Proxy address must be in `ip:port` format");
    let dest_socket_addr: SocketAddr = cli
        .destination
        .parse()
        .fatal("Destination must be in `ip:port` format");

    let mut hop = ProxyDescriptor::new(
        server_socket_addr.ip().to_string(),
        server_socket_addr.port(),
        ProxyKind::Socks4,
    );
    if !cli.ident.is_empty() {
        hop.username = Some(cli.ident.clone());
    }

    let chain = ChainDescriptor::new("socks4-echo", "single SOCKS4 hop").with_proxies(vec![hop]);

    message!(
        Info,
        "Starting connection to the Socks4 proxy server `{}`",
        cli.proxy_address
    );
    message!(
        Info,
        "Starting connection to the destination `{}` throught socks4 proxy `{}`",
        cli.destination,
        cli.proxy_address
    );

    let engine = Engine::new(EngineConfig::default());
    let (tunnel, _report) = match engine
        .build_chain(
            &chain,
            &dest_socket_addr.ip().to_string(),
            dest_socket_addr.port(),
        )
        .await
    {
        Ok(result) => {
            message!(Success, "Successfully connected to the service through the proxy");
            result
        }
        Err(e) => {
            message!(Fatal, "Cannot connect to the service: {}", e);
        }
    };

    println!("Please inter a message to be sent.");
    print!("{} ", Color::White.bold().paint("Message:"));

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .fatal("Unable to read a line from stdin");

    let future = tunnel.write_all(input.as_bytes());
    let future = timeout(Duration::from_secs(8), future);
    future
        .await
        .fatal("Timeout of 8 seconds reached")
        .fatal("Unable to send the message");

    let future = tunnel.read_exact(input.len());
    let future = timeout(Duration::from_secs(8), future);
    let echoed = future
        .await
        .fatal("Timeout of 8 seconds reached")
        .fatal("Unable to receive a reply from the service");

    message!(
        Success,
        "Received message from the service: {}",
        String::from_utf8_lossy(&echoed)
    );
}
