//! Send-interval gating
//!
//! Telemetry goes out at a fixed cadence while the tick loop runs much
//! faster. The gate is owned by the node, not global, and is driven by the
//! monotonic clock so it is unaffected by wall-clock sync.

/// Result of a cadence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceResult {
    /// Interval has elapsed (or nothing was sent yet)
    Ready,
    /// Not due yet
    Wait { remaining_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct Cadence {
    interval_ms: u64,
    last_ms: Option<u64>,
}

impl Cadence {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_ms: None,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Check if enough time has passed since the last send
    pub fn check(&self, now_ms: u64) -> CadenceResult {
        let Some(last) = self.last_ms else {
            return CadenceResult::Ready;
        };

        let elapsed = now_ms.saturating_sub(last);
        if elapsed >= self.interval_ms {
            CadenceResult::Ready
        } else {
            CadenceResult::Wait {
                remaining_ms: self.interval_ms - elapsed,
            }
        }
    }

    pub fn record(&mut self, now_ms: u64) {
        self.last_ms = Some(now_ms);
    }

    /// Check and record in one step.
    ///
    /// Returns `Err(remaining_ms)` while the interval is still running.
    pub fn gate(&mut self, now_ms: u64) -> Result<(), u64> {
        match self.check(now_ms) {
            CadenceResult::Ready => {
                self.record(now_ms);
                Ok(())
            }
            CadenceResult::Wait { remaining_ms } => Err(remaining_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_check_is_ready() {
        let cadence = Cadence::new(60_000);
        assert_eq!(cadence.check(0), CadenceResult::Ready);
    }

    #[test]
    fn gate_waits_for_interval() {
        let mut cadence = Cadence::new(1_000);
        assert_eq!(cadence.gate(5_000), Ok(()));
        assert_eq!(cadence.gate(5_400), Err(600));
        assert_eq!(cadence.check(5_999), CadenceResult::Wait { remaining_ms: 1 });
        assert_eq!(cadence.gate(6_000), Ok(()));
        assert_eq!(cadence.gate(6_001), Err(999));
    }
}
