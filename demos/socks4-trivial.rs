use proxy_chain::{ChainDescriptor, Engine, EngineConfig, ProxyDescriptor, ProxyKind};
use std::process::exit;

#[tokio::main]
async fn main() {
    // A random proxy from `https://hidemy.name/en/proxy-list/`.
    let proxy_address = "104.248.63.15";
    let proxy_port = 30_588;

    // A tcp echo server from `http://tcpbin.org/`.
    let dest_host = "52.20.16.20";
    let dest_port = 30_000;

    let chain = ChainDescriptor::new("trivial-socks4", "single SOCKS4 hop").with_proxies(vec![
        ProxyDescriptor::new(proxy_address, proxy_port, ProxyKind::Socks4),
    ]);

    println!("Starting connection to the SOCKS4 proxy server `{proxy_address}:{proxy_port}`");

    let engine = Engine::new(EngineConfig::default());
    let (_tunnel, report) = match engine.build_chain(&chain, dest_host, dest_port).await {
        Ok(result) => {
            println!("Successfully connected to the service through the proxy");
            result
        }
        Err(e) => {
            println!("Cannot connect to the service: {e}");
            exit(1);
        }
    };

    println!(
        "Connected to `{}:{}` in {:?} across {} step(s)",
        report.target_host,
        report.target_port,
        report.duration,
        report.steps.len()
    );
}
