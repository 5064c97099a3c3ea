use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const OLLAMA_HOST: &str = "OLLAMA_HOST";

const DEFAULT_RUNTIME_URL: &str = "http://127.0.0.1:11434";

/// Runtime base URL, taken from `OLLAMA_HOST` when set.
///
/// Bare `host:port` values get an `http://` scheme.
pub fn get_runtime_url() -> String {
    std::env::var(OLLAMA_HOST)
        .ok()
        .filter(|host| !host.trim().is_empty())
        .map(|host| normalize_runtime_url(&host))
        .unwrap_or_else(|| DEFAULT_RUNTIME_URL.to_string())
}

fn normalize_runtime_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

const MODELWATCH_ADDR: &str = "MODELWATCH_ADDR";

const DEFAULT_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

pub fn get_bind_addr() -> SocketAddr {
    let addr_from_env = std::env::var(MODELWATCH_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}
