use std::net::SocketAddr;
use std::time::Duration;

/// Port assumed when an address is given as a bare IP.
pub const DEFAULT_PORT: u16 = 6660;

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub listen_addr: SocketAddr,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Completes `host` with [`DEFAULT_PORT`] when it carries no port.
pub fn with_default_port(address: &str) -> String {
    let address = address.trim();
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    if address.parse::<std::net::Ipv6Addr>().is_ok() {
        return format!("[{}]:{}", address, DEFAULT_PORT);
    }
    match address.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
        _ => format!("{}:{}", address, DEFAULT_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_ip_gets_default_port() {
        assert_eq!(with_default_port("10.0.0.7"), "10.0.0.7:6660");
        assert_eq!(with_default_port("10.0.0.7:7000"), "10.0.0.7:7000");
        assert_eq!(with_default_port("localhost"), "localhost:6660");
        assert_eq!(with_default_port("::1"), "[::1]:6660");
    }
}
