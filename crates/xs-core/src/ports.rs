//! Local port leasing shared by probes and the active tunnel.
//!
//! A lease keeps its port out of every other allocation until it is dropped,
//! so concurrent probes never collide with each other or with the tunnel.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("no free local port in {start}..={end}")]
    Exhausted { start: u16, end: u16 },

    #[error("port {port} is unavailable: {reason}")]
    Unavailable { port: u16, reason: String },
}

#[derive(Debug)]
struct Inner {
    start: u16,
    end: u16,
    leased: Mutex<HashSet<u16>>,
}

#[derive(Debug, Clone)]
pub struct PortAllocator {
    inner: Arc<Inner>,
}

/// A port held for the lifetime of the value.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    inner: Arc<Inner>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.inner.leased.lock().remove(&self.port);
    }
}

impl PortAllocator {
    /// Allocator handing out ports from `start..=end`.
    pub fn new(start: u16, end: u16) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            inner: Arc::new(Inner {
                start,
                end,
                leased: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn from_settings(probe: &xs_config::ProbeSettings) -> Self {
        Self::new(probe.port_range_start, probe.port_range_end)
    }

    /// Lease any free port in range. Scanning starts at a random offset and
    /// wraps around once.
    pub fn lease(&self) -> Result<PortLease, PortError> {
        let (start, end) = (self.inner.start, self.inner.end);
        let span = u32::from(end) - u32::from(start) + 1;
        let offset = rand::thread_rng().gen_range(0..span);

        let mut leased = self.inner.leased.lock();
        for i in 0..span {
            let port = (u32::from(start) + (offset + i) % span) as u16;
            if leased.contains(&port) || !bindable(port) {
                continue;
            }
            leased.insert(port);
            return Ok(PortLease {
                port,
                inner: Arc::clone(&self.inner),
            });
        }
        Err(PortError::Exhausted { start, end })
    }

    /// Lease a SOCKS/HTTP pair of distinct ports.
    pub fn lease_pair(&self) -> Result<(PortLease, PortLease), PortError> {
        let first = self.lease()?;
        let second = self.lease()?;
        Ok((first, second))
    }

    /// Lease a specific port, which may lie outside the scan range.
    pub fn reserve(&self, port: u16) -> Result<PortLease, PortError> {
        let mut leased = self.inner.leased.lock();
        if leased.contains(&port) {
            return Err(PortError::Unavailable {
                port,
                reason: "already leased".into(),
            });
        }
        if let Err(e) = TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            return Err(PortError::Unavailable {
                port,
                reason: e.to_string(),
            });
        }
        leased.insert(port);
        Ok(PortLease {
            port,
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn is_leased(&self, port: u16) -> bool {
        self.inner.leased.lock().contains(&port)
    }

    pub fn leased_count(&self) -> usize {
        self.inner.leased.lock().len()
    }
}

fn bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
