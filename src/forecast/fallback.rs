//! Frequency heuristic used when no model can answer.

use rand::Rng;
use rand::seq::SliceRandom;

/// Number of recent values the frequencies are taken over.
pub const FALLBACK_LOOKBACK: usize = 15;

/// Occurrences of each digit among `recent`.
pub fn frequencies(recent: &[u8]) -> [usize; 10] {
    let mut counts = [0; 10];
    for &v in recent {
        if let Some(slot) = counts.get_mut(usize::from(v)) {
            *slot += 1;
        }
    }
    counts
}

/// Digits sharing the minimum frequency, ascending.
pub fn candidates(counts: &[usize; 10]) -> Vec<u8> {
    let min = counts.iter().copied().min().unwrap_or(0);
    (0u8..10)
        .filter(|&d| counts[usize::from(d)] == min)
        .collect()
}

/// Pick a least-frequent digit over the newest [`FALLBACK_LOOKBACK`] values
/// (`recent` is newest first) and score it.
pub fn predict<R: Rng + ?Sized>(recent: &[u8], rng: &mut R) -> (u8, f64) {
    let recent = &recent[..recent.len().min(FALLBACK_LOOKBACK)];
    let counts = frequencies(recent);
    let total: usize = counts.iter().sum();
    let choice = candidates(&counts).choose(rng).copied().unwrap_or(0);
    let confidence = if total == 0 {
        0.9
    } else {
        0.6 + 0.3 * (1.0 - counts[usize::from(choice)] as f64 / total as f64)
    };
    (choice, confidence)
}
