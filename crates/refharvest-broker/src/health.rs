use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared connection-health flag: set once a channel or publish error is
/// observed, cleared only by a fresh successful `connect`. `refharvest-health`
/// reads this to flip the process health endpoint unhealthy without taking
/// a dependency on the broker's consumer or publisher internals.
#[derive(Debug, Default)]
pub struct ConnectionHealth {
    disconnected: AtomicBool,
}

impl ConnectionHealth {
    /// A fresh, connected flag.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether the broker connection is currently considered unhealthy.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Record a channel failure, AMQP error, or publish failure.
    pub fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
    }

    /// Record a successful (re)connect.
    pub fn mark_connected(&self) {
        self.disconnected.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_connected() {
        let health = ConnectionHealth::new();
        assert!(!health.is_disconnected());
    }

    #[test]
    fn marking_disconnected_then_connected_round_trips() {
        let health = ConnectionHealth::new();
        health.mark_disconnected();
        assert!(health.is_disconnected());
        health.mark_connected();
        assert!(!health.is_disconnected());
    }
}
