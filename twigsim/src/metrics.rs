//! Frame-level counters collected by the radio bus.

/// What happened to frames on the air.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimMetrics {
    /// Transmit attempts made by any node (unicast or broadcast).
    pub frames_sent: u64,
    /// Frames placed into a receiver's inbox.
    pub frames_delivered: u64,
    /// Frames dropped by per-link packet loss.
    pub frames_lost: u64,
    /// Unicast sends with no reachable listener on the target address.
    pub frames_unroutable: u64,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered fraction of everything that went over a link.
    pub fn delivery_rate(&self) -> f64 {
        let attempted = self.frames_delivered + self.frames_lost;
        if attempted == 0 {
            return 1.0;
        }
        self.frames_delivered as f64 / attempted as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_rate() {
        let mut m = SimMetrics::new();
        assert_eq!(m.delivery_rate(), 1.0);
        m.frames_delivered = 3;
        m.frames_lost = 1;
        assert_eq!(m.delivery_rate(), 0.75);
    }
}
