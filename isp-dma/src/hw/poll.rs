use embedded_hal::delay::DelayNs;

/// Poll `done` up to `retries + 1` times, sleeping `interval_us` between
/// attempts. Returns whether `done` ever reported `true`.
pub fn poll_until<D, F>(delay: &mut D, retries: u32, interval_us: u32, mut done: F) -> bool
where
    D: DelayNs,
    F: FnMut() -> bool,
{
    if done() {
        return true;
    }
    for _ in 0..retries {
        delay.delay_us(interval_us);
        if done() {
            return true;
        }
    }
    false
}
