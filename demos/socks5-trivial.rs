use proxy_chain::{ChainDescriptor, Engine, EngineConfig, ProxyDescriptor, ProxyKind};
use std::process::exit;

#[tokio::main]
async fn main() {
    // A random proxy from `https://hidemy.name/en/proxy-list/`.
    let proxy_address = "72.11.148.222";
    let proxy_port = 56_533;

    // A tcp echo server from `http://tcpbin.org/`.
    let dest_host = "52.20.16.20";
    let dest_port = 30_000;

    let chain = ChainDescriptor::new("trivial-socks5", "single SOCKS5 hop").with_proxies(vec![
        ProxyDescriptor::new(proxy_address, proxy_port, ProxyKind::Socks5),
    ]);

    println!("Starting connection to the socks5 proxy server `{proxy_address}:{proxy_port}`");

    let engine = Engine::new(EngineConfig::default());
    let _tunnel = match engine.build_chain(&chain, dest_host, dest_port).await {
        Ok((tunnel, _report)) => tunnel,
        Err(e) => {
            println!("Cannot connect to the service: {e}");
            exit(1);
        }
    };

    // -- using `_tunnel` -- //
}
