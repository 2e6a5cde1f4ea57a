//! Sliding-window throttle on failed authentication attempts, keyed by
//! client IP. Successful logins are never counted.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct AuthThrottle {
    max_attempts: u32,
    window: Duration,
    /// Per-IP failure timestamps inside the current window.
    entries: HashMap<IpAddr, Vec<Instant>>,
}

impl AuthThrottle {
    pub fn new(max_attempts: u32, window_secs: u64) -> Self {
        Self {
            max_attempts,
            window: Duration::from_secs(window_secs),
            entries: HashMap::new(),
        }
    }

    /// Whether `ip` may attempt authentication. Does not record anything.
    pub fn check(&mut self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    /// Count one failed attempt against `ip`.
    pub fn record_failure(&mut self, ip: IpAddr) {
        self.record_failure_at(ip, Instant::now());
    }

    fn check_at(&mut self, ip: IpAddr, now: Instant) -> bool {
        let window = self.window;
        let Some(failures) = self.entries.get_mut(&ip) else {
            return true;
        };
        failures.retain(|t| now.duration_since(*t) < window);
        (failures.len() as u32) < self.max_attempts
    }

    fn record_failure_at(&mut self, ip: IpAddr, now: Instant) {
        self.entries.entry(ip).or_default().push(now);
    }

    /// Drop IPs whose attempts have all expired.
    pub fn gc(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.entries.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < window);
            !attempts.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.entries.len()
    }
}
