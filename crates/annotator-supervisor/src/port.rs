//! Loopback port availability checks.
//!
//! A port counts as available when a fresh TCP socket can bind it on
//! `127.0.0.1` and, where the host has one, on `[::1]`. The sockets are
//! dropped straight away, so the answer can go stale before the caller acts
//! on it.
//!
//! The probe sets `SO_REUSEADDR` on POSIX hosts so lingering `TIME_WAIT`
//! connections do not read as busy. The same option lets the bind succeed
//! next to another socket that set it too but never called `listen`, so such
//! a socket is reported as free. Listeners on wildcard or loopback addresses
//! are always detected.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::debug;

use crate::lifecycle::LifecycleError;

const PORT_TARGET: &str = "annotator_supervisor::port";

/// Errors raised while probing a port.
#[derive(Debug, Error)]
pub enum PortCheckError {
    /// Port zero asks the OS for any port and cannot be probed.
    #[error("port 0 cannot be checked for availability")]
    InvalidPort,
    /// Binding failed for a reason other than the port being taken.
    #[error("failed to probe port {port}: {source}")]
    Bind {
        /// Port that was probed.
        port: u16,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Reports whether `port` can be bound on the loopback interface.
///
/// `Ok(false)` means another socket already holds the port.
///
/// # Errors
///
/// Returns [`PortCheckError::InvalidPort`] for port zero and
/// [`PortCheckError::Bind`] for permission and address errors, which are not
/// folded into `false`.
pub fn is_port_available(port: u16) -> Result<bool, PortCheckError> {
    if port == 0 {
        return Err(PortCheckError::InvalidPort);
    }
    for address in [IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)] {
        match try_bind(SocketAddr::new(address, port)) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::AddrInUse => return Ok(false),
            Err(error) if address.is_ipv6() => {
                debug!(
                    target: PORT_TARGET,
                    port,
                    error = %error,
                    "IPv6 loopback unavailable; skipping"
                );
            }
            Err(source) => return Err(PortCheckError::Bind { port, source }),
        }
    }
    Ok(true)
}

/// Fails with [`LifecycleError::PortUnavailable`] when `port` is taken.
///
/// # Errors
///
/// Returns [`LifecycleError::PortUnavailable`] for a busy port and
/// [`LifecycleError::PortCheck`] when the port cannot be probed.
pub fn ensure_port_available(port: u16) -> Result<(), LifecycleError> {
    if is_port_available(port)? {
        Ok(())
    } else {
        Err(LifecycleError::PortUnavailable { port })
    }
}

fn try_bind(address: SocketAddr) -> io::Result<()> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    // Lets the probe succeed while an old connection lingers in TIME_WAIT;
    // an active listener still yields EADDRINUSE.
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.bind(&address.into())
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn bound_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        (listener, port)
    }

    #[test]
    fn bound_port_is_unavailable_until_released() {
        let (listener, port) = bound_listener();
        assert!(!is_port_available(port).expect("probe bound port"));
        drop(listener);
        assert!(is_port_available(port).expect("probe released port"));
    }

    #[test]
    fn ensure_port_available_reports_busy_port() {
        let (listener, port) = bound_listener();
        let error = ensure_port_available(port).expect_err("port should be busy");
        assert!(matches!(
            error,
            LifecycleError::PortUnavailable { port: reported } if reported == port
        ));
        drop(listener);
    }

    #[test]
    fn ensure_port_available_accepts_free_port() {
        let (listener, port) = bound_listener();
        drop(listener);
        ensure_port_available(port).expect("released port should be free");
    }

    #[test]
    fn ipv6_loopback_listener_makes_port_unavailable() {
        let Ok(listener) = TcpListener::bind((Ipv6Addr::LOCALHOST, 0)) else {
            // No IPv6 loopback on this host.
            return;
        };
        let port = listener.local_addr().expect("local addr").port();
        assert!(!is_port_available(port).expect("probe bound port"));
        drop(listener);
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(matches!(
            is_port_available(0),
            Err(PortCheckError::InvalidPort)
        ));
    }
}
