//! Listen port allocation
//!
//! Ports count down from a fixed high value, one per scenario, so a scenario
//! never reuses the port of an instance that may still be shutting down.
//! Scenarios run sequentially; a parallel runner would need an atomic
//! allocator handing out disjoint ranges instead.

use std::net::TcpListener;

use crate::common::{Error, Result};

/// Hands out a fresh, currently unbound port per scenario
#[derive(Debug)]
pub struct PortAllocator {
    host: String,
    next: u16,
    floor: u16,
    issued: Vec<u16>,
}

impl PortAllocator {
    pub fn new(host: impl Into<String>, start: u16, floor: u16) -> Self {
        Self {
            host: host.into(),
            next: start,
            floor,
            issued: Vec::new(),
        }
    }

    /// Take the next port
    ///
    /// The counter moves even when the port turns out to be bound, so a
    /// stuck port fails one scenario rather than every following one.
    pub fn allocate(&mut self) -> Result<u16> {
        if self.next < self.floor || self.next == 0 {
            return Err(Error::PortsExhausted {
                next: self.next,
                floor: self.floor,
            });
        }

        let port = self.next;
        self.next -= 1;

        if !port_is_free(&self.host, port) {
            return Err(Error::PortInUse(port));
        }

        self.issued.push(port);
        Ok(port)
    }

    /// Ports handed out so far, in order
    pub fn issued(&self) -> &[u16] {
        &self.issued
    }
}

/// Whether nothing is listening on `host:port`
pub fn port_is_free(host: &str, port: u16) -> bool {
    TcpListener::bind((host, port)).is_ok()
}
