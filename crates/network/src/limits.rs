//! Connection accounting: one total cap and one per-IP cap, applied the
//! same way to inbound and outbound connections.

use basalt_types::NetworkError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LimitConfig {
    pub max_connections: usize,
    pub max_per_ip: usize,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_connections: 128,
            max_per_ip: 4,
        }
    }
}

#[derive(Default)]
struct Counters {
    total: usize,
    per_ip: HashMap<IpAddr, usize>,
}

pub struct ConnectionLimits {
    config: LimitConfig,
    counters: Mutex<Counters>,
}

impl ConnectionLimits {
    pub fn new(config: LimitConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            counters: Mutex::new(Counters::default()),
        })
    }

    /// Reserves a slot for a connection in either direction. The returned
    /// permit releases the slot on drop.
    pub fn acquire(self: &Arc<Self>, ip: IpAddr) -> Result<ConnectionPermit, NetworkError> {
        let mut counters = self.counters.lock();
        if counters.total >= self.config.max_connections {
            return Err(NetworkError::ConnectionLimit);
        }
        let per_ip = counters.per_ip.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_per_ip {
            return Err(NetworkError::PerIpLimit);
        }
        *per_ip += 1;
        counters.total += 1;
        Ok(ConnectionPermit {
            limits: self.clone(),
            ip,
        })
    }

    pub fn active(&self) -> usize {
        self.counters.lock().total
    }

    fn release(&self, ip: IpAddr) {
        let mut counters = self.counters.lock();
        counters.total = counters.total.saturating_sub(1);
        if let Some(count) = counters.per_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counters.per_ip.remove(&ip);
            }
        }
    }
}

/// Held for the lifetime of one connection.
pub struct ConnectionPermit {
    limits: Arc<ConnectionLimits>,
    ip: IpAddr,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limits.release(self.ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn per_ip_and_total_caps_apply() {
        let limits = ConnectionLimits::new(LimitConfig {
            max_connections: 3,
            max_per_ip: 2,
        });

        let _a = limits.acquire(ip(1)).unwrap();
        let _b = limits.acquire(ip(1)).unwrap();
        assert!(matches!(
            limits.acquire(ip(1)),
            Err(NetworkError::PerIpLimit)
        ));

        let _c = limits.acquire(ip(2)).unwrap();
        assert!(matches!(
            limits.acquire(ip(3)),
            Err(NetworkError::ConnectionLimit)
        ));
    }

    #[test]
    fn dropping_a_permit_frees_the_slot() {
        let limits = ConnectionLimits::new(LimitConfig {
            max_connections: 1,
            max_per_ip: 1,
        });
        let permit = limits.acquire(ip(1)).unwrap();
        assert_eq!(limits.active(), 1);
        drop(permit);
        assert_eq!(limits.active(), 0);
        assert!(limits.acquire(ip(1)).is_ok());
    }
}
