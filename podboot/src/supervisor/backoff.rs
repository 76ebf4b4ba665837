/// Restart delay policy for supervised services.
///
/// Attempt 0 waits `initial_ms`, each further attempt doubles the delay,
/// capped at `max_ms`. The counter is reset by the caller once a service
/// has stayed up long enough to count as stable.
pub fn restart_delay_ms(attempt: u32, initial_ms: u64, max_ms: u64) -> u64 {
    let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
    initial_ms.saturating_mul(factor).min(max_ms.max(initial_ms))
}

/// Add up to 10% random jitter so crash-looping services don't restart in lockstep.
pub fn with_jitter(delay_ms: u64) -> u64 {
    use rand::Rng;

    let spread = delay_ms / 10;
    if spread == 0 {
        return delay_ms;
    }
    delay_ms + rand::rng().random_range(0..=spread)
}
