//! Simulated packet loss on the server's receive path.
//!
//! Real networks drop packets.  To exercise the client's retransmission
//! machinery on a loopback link, the server runs every arriving DATA packet
//! past a [`LossSimulator`] and silently discards the ones it selects.
//! Each decision is an independent draw: there is no burst model and no
//! memory between packets.

use rand::Rng;

use crate::config::ConfigError;

/// Independent per-packet drop decision.
#[derive(Debug, Clone, Copy)]
pub struct LossSimulator {
    drop_rate: f64,
}

impl LossSimulator {
    /// `drop_rate` must be within `[0.0, 1.0]`.
    pub fn new(drop_rate: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&drop_rate) {
            return Err(ConfigError::DropRate(drop_rate));
        }
        Ok(Self { drop_rate })
    }

    /// A simulator that never drops.
    pub fn lossless() -> Self {
        Self { drop_rate: 0.0 }
    }

    pub fn drop_rate(&self) -> f64 {
        self.drop_rate
    }

    /// Draw once: `true` means discard the packet.
    ///
    /// `0.0` never drops and `1.0` always drops, since the draw is in `[0, 1)`.
    pub fn should_drop(&self) -> bool {
        rand::rng().random::<f64>() < self.drop_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_never_drops() {
        let sim = LossSimulator::lossless();
        assert!((0..10_000).all(|_| !sim.should_drop()));
    }

    #[test]
    fn full_rate_always_drops() {
        let sim = LossSimulator::new(1.0).unwrap();
        assert!((0..10_000).all(|_| sim.should_drop()));
    }

    #[test]
    fn rate_is_roughly_honoured() {
        let sim = LossSimulator::new(0.3).unwrap();
        let dropped = (0..20_000).filter(|_| sim.should_drop()).count();
        // 0.3 × 20_000 = 6000; allow a wide margin.
        assert!((5000..7000).contains(&dropped), "dropped {dropped}");
    }

    #[test]
    fn invalid_rates_are_rejected() {
        assert!(LossSimulator::new(-0.1).is_err());
        assert!(LossSimulator::new(1.01).is_err());
        assert!(LossSimulator::new(f64::NAN).is_err());
    }
}
