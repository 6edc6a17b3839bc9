//! TCP port occupancy probes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::process::{Pid, POLL_INTERVAL};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
pub const LOCAL_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub port: u16,
    pub occupied: bool,
    pub pid: Option<Pid>,
    pub process_name: Option<String>,
}

impl PortInfo {
    fn vacant(port: u16) -> Self {
        Self {
            port,
            occupied: false,
            pid: None,
            process_name: None,
        }
    }

    /// Human-readable owner, e.g. `uvicorn (PID 1234)`.
    pub fn describe_owner(&self) -> Option<String> {
        match (&self.process_name, self.pid) {
            (Some(name), Some(pid)) => Some(format!("{name} (PID {pid})")),
            (None, Some(pid)) => Some(format!("PID {pid}")),
            (Some(name), None) => Some(name.clone()),
            (None, None) => None,
        }
    }
}

/// Connect probe; never binds. Unresolvable hosts count as free.
pub fn is_in_use(port: u16, host: &str) -> bool {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(err) => {
            debug!(host, port, error = %err, "could not resolve probe address");
            return false;
        }
    };
    addrs
        .map(connectable)
        .any(|addr| TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok())
}

// A wildcard bind address is reachable through loopback.
fn connectable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

/// Looks up the listening socket on `port` and its owner.
///
/// Sockets owned by processes we may not inspect are invisible to the
/// enumeration; the connect probe still reports them as occupied.
pub fn info(port: u16) -> PortInfo {
    let mut info = PortInfo::vacant(port);
    match listeners::get_all() {
        Ok(all) => {
            if let Some(listener) = all.into_iter().find(|l| l.socket.port() == port) {
                info.occupied = true;
                info.pid = Pid::try_from(listener.process.pid).ok();
                info.process_name =
                    Some(listener.process.name).filter(|name| !name.is_empty());
                return info;
            }
        }
        Err(err) => debug!(port, error = %err, "socket enumeration failed"),
    }
    info.occupied = is_in_use(port, LOCAL_HOST);
    info
}

/// First free port in `start..end`.
pub fn find_free(start: u16, end: u16) -> Option<u16> {
    (start..end).find(|port| !is_in_use(*port, LOCAL_HOST))
}

pub fn wait_until_in_use(port: u16, host: &str, timeout: Duration) -> bool {
    poll_until(timeout, || is_in_use(port, host))
}

pub fn wait_until_free(port: u16, timeout: Duration) -> bool {
    poll_until(timeout, || !is_in_use(port, LOCAL_HOST))
}

fn poll_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn bound_port_is_in_use_until_released() {
        let (listener, port) = listener();
        assert!(is_in_use(port, "127.0.0.1"));
        assert!(is_in_use(port, "0.0.0.0"));
        assert!(wait_until_in_use(port, "127.0.0.1", Duration::from_millis(200)));

        drop(listener);
        assert!(wait_until_free(port, Duration::from_secs(5)));
        assert!(!is_in_use(port, "127.0.0.1"));
    }

    #[test]
    fn wait_times_out_while_occupied() {
        let (_listener, port) = listener();
        let started = Instant::now();
        assert!(!wait_until_free(port, Duration::from_millis(300)));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn find_free_skips_occupied_ports() {
        let (_listener, port) = listener();
        assert_eq!(find_free(port, port.saturating_add(1)), None);
        assert_eq!(find_free(port, port), None);
    }

    #[test]
    fn info_reports_occupancy() {
        let (_listener, port) = listener();
        let info = info(port);
        assert!(info.occupied);
        assert_eq!(info.port, port);
        if let Some(pid) = info.pid {
            assert_eq!(pid, crate::process::current_pid());
        }
    }

    #[test]
    fn unresolvable_host_is_free() {
        assert!(!is_in_use(80, "host.invalid"));
    }

    #[test]
    fn owner_description() {
        let info = PortInfo {
            port: 8000,
            occupied: true,
            pid: Some(42),
            process_name: Some("uvicorn".into()),
        };
        assert_eq!(info.describe_owner().as_deref(), Some("uvicorn (PID 42)"));
        assert_eq!(PortInfo::vacant(1).describe_owner(), None);
    }
}
