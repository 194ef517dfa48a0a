//! Free-port allocation.
//!
//! Stateless: a port is free if it is not reserved by a live instance and
//! a probe bind on it succeeds right now.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use tracing::debug;

use cutover_core::config::PortRangeConfig;

use crate::error::PortError;

#[derive(Debug, Clone)]
pub struct PortAllocator {
    start: u16,
    end: u16,
}

impl PortAllocator {
    /// Allocate from the half-open range `[start, end)`.
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// First port in range that is neither reserved nor currently bound.
    pub fn acquire(&self, reserved: &[u16]) -> Result<u16, PortError> {
        for port in self.start..self.end {
            if reserved.contains(&port) {
                continue;
            }
            // The wildcard bind also fails when a loopback listener holds the port.
            if TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).is_ok() {
                debug!(port, "port acquired");
                return Ok(port);
            }
        }
        Err(PortError::Exhausted {
            start: self.start,
            end: self.end,
        })
    }
}

impl From<&PortRangeConfig> for PortAllocator {
    fn from(range: &PortRangeConfig) -> Self {
        Self::new(range.start, range.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn skips_reserved_ports() {
        let port = free_port();
        let allocator = PortAllocator::new(port, port + 1);
        assert_eq!(allocator.acquire(&[]), Ok(port));
        assert_eq!(
            allocator.acquire(&[port]),
            Err(PortError::Exhausted {
                start: port,
                end: port + 1
            })
        );
    }

    #[test]
    fn skips_bound_ports() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let allocator = PortAllocator::new(port, port + 1);
        assert!(allocator.acquire(&[]).is_err());

        drop(listener);
        assert_eq!(allocator.acquire(&[]), Ok(port));
    }

    #[test]
    fn empty_range_is_exhausted() {
        let allocator = PortAllocator::new(9000, 9000);
        assert!(allocator.acquire(&[]).is_err());
    }
}
