use core::time::Duration;

/// Delay applied between fragments so output arrives at a readable cadence.
///
/// The pause after a fragment scales with the requested group size: with the
/// default 250 ms per token, `chunks = 8` yields a two second pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    per_token: Duration,
}

impl Pacing {
    pub const fn new(per_token: Duration) -> Self {
        Self { per_token }
    }

    pub const fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Pause to apply after a fragment produced with group size `chunks`.
    pub fn delay_for(&self, chunks: usize) -> Duration {
        let chunks = u32::try_from(chunks).unwrap_or(u32::MAX);
        self.per_token.saturating_mul(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_scales_with_chunks() {
        let pacing = Pacing::new(Duration::from_millis(250));
        assert_eq!(pacing.delay_for(1), Duration::from_millis(250));
        assert_eq!(pacing.delay_for(4), Duration::from_secs(1));
        assert_eq!(pacing.delay_for(8), Duration::from_secs(2));
    }

    #[test]
    fn disabled_pacing_never_waits() {
        let pacing = Pacing::disabled();
        assert_eq!(pacing.delay_for(200), Duration::ZERO);
    }

    #[test]
    fn huge_group_sizes_saturate() {
        let pacing = Pacing::new(Duration::MAX);
        assert_eq!(pacing.delay_for(usize::MAX), Duration::MAX);
    }
}
