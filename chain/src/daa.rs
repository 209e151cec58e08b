//! Difficulty adjustment: computing the next block's minimum weight.
//!
//! Two algorithms are selectable per deployment. Both consume the same
//! view of recent history: an iterator over `(timestamp, weight)` pairs
//! of best-chain blocks, newest first, and both are fully deterministic
//! for a given iterator.

use crate::types::sum_weights;

/// Strategy trait for next-weight computation.
///
/// Implementations must be deterministic and side-effect free.
pub trait NextWeight {
    /// Computes the required weight of the next block given best-chain
    /// blocks ordered newest to oldest.
    fn next_weight(&self, blocks: &mut dyn Iterator<Item = (u64, f64)>) -> f64;
}

/// Takes at most `n` leading elements, newest first.
fn take_blocks(blocks: &mut dyn Iterator<Item = (u64, f64)>, n: usize) -> Vec<(u64, f64)> {
    blocks.take(n).collect()
}

/// Default algorithm: total work over the window divided by elapsed
/// time, in log space.
///
/// `w_next = log2(sum 2^w_i) - log2(dt) + log2(T)`, with the change
/// relative to the newest block clamped to `max_dw` and the result
/// floored at `min_weight`.
#[derive(Clone, Copy, Debug)]
pub struct Htr {
    /// Target seconds between blocks.
    pub target_secs: u64,
    /// Window size in blocks.
    pub n: usize,
    /// Floor for the computed weight.
    pub min_weight: f64,
    /// Maximum absolute change per block; `None` disables the clamp.
    pub max_dw: Option<f64>,
}

impl Htr {
    pub const TARGET_SECS: u64 = 30;
    pub const N: usize = 20;
    pub const MAX_DW: f64 = 0.25;

    /// Production parameters with the given weight floor.
    pub fn new(min_weight: f64) -> Self {
        Self {
            target_secs: Self::TARGET_SECS,
            n: Self::N,
            min_weight,
            max_dw: Some(Self::MAX_DW),
        }
    }
}

impl NextWeight for Htr {
    fn next_weight(&self, blocks: &mut dyn Iterator<Item = (u64, f64)>) -> f64 {
        let mut window = take_blocks(blocks, self.n);
        window.reverse(); // oldest first

        if window.len() < 2 {
            return self.min_weight;
        }

        let oldest_ts = window[0].0;
        let newest = *window.last().expect("window is non-empty");
        let dt = (newest.0.saturating_sub(oldest_ts)).max(1) as f64;

        let mut log_work = 0.0;
        for &(_, w) in &window {
            log_work = sum_weights(log_work, w);
        }

        let mut weight = log_work - dt.log2() + (self.target_secs as f64).log2();

        if let Some(max_dw) = self.max_dw {
            let dw = weight - newest.1;
            if dw > max_dw {
                weight = newest.1 + max_dw;
            } else if dw < -max_dw {
                weight = newest.1 - max_dw;
            }
        }

        weight.max(self.min_weight)
    }
}

/// Linearly-weighted moving average over per-block solvetimes, computed
/// in log space with a harmonic mean of difficulties.
#[derive(Clone, Copy, Debug)]
pub struct Lwma {
    /// Target seconds between blocks.
    pub target_secs: u64,
    /// Window size in blocks.
    pub n: usize,
    /// Future-time limit: solvetimes are clamped at `-ftl` below.
    pub ftl: i64,
    /// Past-time limit: solvetimes are clamped at `+ptl` above.
    pub ptl: i64,
    /// Weight returned while the chain is too short to average.
    pub min_weight: f64,
    /// Whether solvetime clamping is applied.
    pub tl_rules: bool,
    /// Harmonic (true) or arithmetic (false) mean of difficulties.
    pub harmonic: bool,
}

impl Lwma {
    pub const TARGET_SECS: u64 = 30;
    pub const N: usize = 134;
    pub const FTL: i64 = 300;
    pub const PTL: i64 = 300;
    /// Average-solvetime bias factor.
    const ADJUST: f64 = 0.998;

    /// Production parameters with the given fallback weight.
    pub fn new(min_weight: f64) -> Self {
        Self {
            target_secs: Self::TARGET_SECS,
            n: Self::N,
            ftl: Self::FTL,
            ptl: Self::PTL,
            min_weight,
            tl_rules: true,
            harmonic: true,
        }
    }

    /// Minimum LWMA of solvetimes, floored at a quarter of the target.
    fn min_lwma(&self) -> f64 {
        (self.target_secs / 4) as f64
    }
}

impl NextWeight for Lwma {
    fn next_weight(&self, blocks: &mut dyn Iterator<Item = (u64, f64)>) -> f64 {
        let mut window = take_blocks(blocks, self.n + 1);
        window.reverse(); // oldest first

        // Solvetime i is the gap closed by the block of weight i.
        let mut samples = Vec::with_capacity(window.len().saturating_sub(1));
        for pair in window.windows(2) {
            let solvetime = pair[1].0 as i64 - pair[0].0 as i64;
            samples.push((solvetime, pair[0].1));
        }

        if samples.len() < 3 {
            return self.min_weight;
        }

        let n = if samples.len() < self.n {
            samples.len() - 1
        } else {
            self.n
        };

        let k = (n * (n + 1)) as f64 / 2.0;
        let mut lwma_solvetimes = 0.0;
        let mut log_sum_weights = f64::NEG_INFINITY;
        let mut log_sum_inv_weights = f64::NEG_INFINITY;

        for (i, &(solvetime, weight)) in samples.iter().take(n).enumerate() {
            let solvetime = if self.tl_rules {
                solvetime.clamp(-self.ftl, self.ptl)
            } else {
                solvetime
            };
            lwma_solvetimes += solvetime as f64 * (i + 1) as f64 / k;
            log_sum_weights = sum_weights(log_sum_weights, weight);
            log_sum_inv_weights = sum_weights(log_sum_inv_weights, -weight);
        }

        let n_log = (n as f64).log2();
        let mean_weight = if self.harmonic {
            n_log - log_sum_inv_weights
        } else {
            log_sum_weights - n_log
        };

        if lwma_solvetimes < self.min_lwma() {
            lwma_solvetimes = self.min_lwma();
        }

        mean_weight + (self.target_secs as f64).log2() - lwma_solvetimes.log2()
            + Self::ADJUST.log2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Newest-first steady chain: blocks every `spacing` seconds at a
    /// fixed weight.
    fn steady_chain(len: usize, spacing: u64, weight: f64) -> Vec<(u64, f64)> {
        (0..len)
            .map(|i| (1_600_000_000 + (len - 1 - i) as u64 * spacing, weight))
            .collect()
    }

    #[test]
    fn htr_is_deterministic() {
        let chain = steady_chain(30, 30, 21.0);
        let daa = Htr::new(21.0);
        let a = daa.next_weight(&mut chain.iter().copied());
        let b = daa.next_weight(&mut chain.iter().copied());
        assert_eq!(a, b);
    }

    #[test]
    fn htr_steady_state_stays_near_current_weight() {
        let chain = steady_chain(30, 30, 21.0);
        let daa = Htr::new(2.0);
        let next = daa.next_weight(&mut chain.iter().copied());
        assert!((next - 21.0).abs() <= Htr::MAX_DW);
    }

    #[test]
    fn htr_clamps_change_to_max_dw() {
        // All 20 blocks in one second: enormous upward pressure.
        let chain = steady_chain(20, 0, 21.0);
        let daa = Htr::new(2.0);
        let next = daa.next_weight(&mut chain.iter().copied());
        assert!((next - (21.0 + Htr::MAX_DW)).abs() < 1e-9);

        // One block per day: strong downward pressure.
        let chain = steady_chain(20, 86_400, 21.0);
        let next = daa.next_weight(&mut chain.iter().copied());
        assert!((next - (21.0 - Htr::MAX_DW)).abs() < 1e-9);
    }

    #[test]
    fn htr_unclamped_moves_further() {
        let chain = steady_chain(20, 0, 21.0);
        let mut daa = Htr::new(2.0);
        daa.max_dw = None;
        let next = daa.next_weight(&mut chain.iter().copied());
        assert!(next > 21.0 + Htr::MAX_DW);
    }

    #[test]
    fn htr_short_history_falls_back_to_min_weight() {
        let daa = Htr::new(21.0);
        assert_eq!(daa.next_weight(&mut std::iter::empty()), 21.0);
        let one = vec![(1_600_000_000, 25.0)];
        assert_eq!(daa.next_weight(&mut one.iter().copied()), 21.0);
    }

    #[test]
    fn htr_respects_min_weight_floor() {
        let chain = steady_chain(20, 86_400, 2.1);
        let daa = Htr::new(2.0);
        let next = daa.next_weight(&mut chain.iter().copied());
        assert!(next >= 2.0);
    }

    #[test]
    fn lwma_is_deterministic() {
        let chain = steady_chain(140, 30, 21.0);
        let daa = Lwma::new(21.0);
        let a = daa.next_weight(&mut chain.iter().copied());
        let b = daa.next_weight(&mut chain.iter().copied());
        assert_eq!(a, b);
    }

    #[test]
    fn lwma_short_chain_falls_back_to_min_weight() {
        let daa = Lwma::new(21.0);
        let chain = steady_chain(3, 30, 25.0);
        assert_eq!(daa.next_weight(&mut chain.iter().copied()), 21.0);
    }

    #[test]
    fn lwma_steady_state_stays_near_current_weight() {
        let chain = steady_chain(140, 30, 21.0);
        let daa = Lwma::new(2.0);
        let next = daa.next_weight(&mut chain.iter().copied());
        // The bias factor keeps it a hair under the current weight.
        assert!((next - 21.0).abs() < 0.1, "next = {next}");
    }

    #[test]
    fn lwma_fast_blocks_raise_weight() {
        let fast = steady_chain(140, 3, 21.0);
        let slow = steady_chain(140, 300, 21.0);
        let daa = Lwma::new(2.0);
        let fast_next = daa.next_weight(&mut fast.iter().copied());
        let slow_next = daa.next_weight(&mut slow.iter().copied());
        assert!(fast_next > 21.0);
        assert!(slow_next < 21.0);
    }

    #[test]
    fn lwma_clamps_absurd_solvetimes() {
        // A wildly out-of-order timestamp produces a negative solvetime
        // that the FTL clamp bounds.
        let mut chain = steady_chain(140, 30, 21.0);
        chain[0].0 = chain[1].0 - 100_000;
        let daa = Lwma::new(2.0);
        let clamped = daa.next_weight(&mut chain.iter().copied());
        let mut daa_unclamped = Lwma::new(2.0);
        daa_unclamped.tl_rules = false;
        let unclamped = daa_unclamped.next_weight(&mut chain.iter().copied());
        assert!(clamped.is_finite());
        assert_ne!(clamped, unclamped);
    }
}
