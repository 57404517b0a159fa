//! Backoff scheduler shared by both peers.
//!
//! Produces `attempts` delays whose sum approximates a target timeout under
//! the convex curve `f(e, n) = (e^n - 1) / e`. The client turns a `(tries,
//! timeout)` pair into inter-send waits; the server turns `(attempts,
//! timeout)` into inter-response-retry waits. Neither side needs the other's
//! schedule to match — the retries just repeat independent packets — but
//! given the same `(attempts, timeout)` both sides compute the same series.

/// Absolute tolerance on the delay sum, matching the testable property in the
/// protocol design (`|sum(d) - timeout| < 1e-2`).
const EPSILON: f64 = 1e-2;

const MAX_ITERATIONS: usize = 100;

fn curve_sum(growth: f64, attempts: usize) -> f64 {
    (0..attempts)
        .map(|n| (growth.powi(n as i32) - 1.0) / growth)
        .sum()
}

/// Computes `attempts` non-negative, monotonically non-decreasing delays
/// summing to approximately `timeout` seconds.
///
/// The curve `f(e, n) = (e^n - 1) / e` is flat (all zeros) at `e = 1` and
/// strictly increasing in both `e` and `n` for `e > 1`, so the search for the
/// scalar `e` that hits the target sum is restricted to `e >= 1`: that is the
/// only part of the curve's domain where delays stay non-negative and
/// non-decreasing, which the protocol requires (see DESIGN.md for why the
/// search domain departs from `(0, T]`).
///
/// ```
/// use ssh_reverse_mux::backoff::retries_within_timeout;
///
/// let delays = retries_within_timeout(6, 10.0);
/// assert_eq!(delays.len(), 6);
/// assert!((delays.iter().sum::<f64>() - 10.0).abs() < 1e-2);
/// ```
pub fn retries_within_timeout(attempts: usize, timeout: f64) -> Vec<f64> {
    if attempts == 0 {
        return Vec::new();
    }

    if attempts == 1 || timeout <= 0.0 {
        return vec![0.0; attempts];
    }

    let mut lo = 1.0f64;
    let mut hi = 2.0f64;
    while curve_sum(hi, attempts) < timeout {
        hi *= 2.0;
    }

    let mut growth = (lo + hi) / 2.0;
    for _ in 0..MAX_ITERATIONS {
        let sum = curve_sum(growth, attempts);
        if (sum - timeout).abs() < EPSILON {
            break;
        }

        if sum < timeout {
            lo = growth;
        } else {
            hi = growth;
        }

        growth = (lo + hi) / 2.0;
    }

    (0..attempts)
        .map(|n| (growth.powi(n as i32) - 1.0) / growth)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_converges_to_timeout() {
        for (attempts, timeout) in [(6, 10.0), (4, 5.0), (2, 1.0), (10, 30.0)] {
            let delays = retries_within_timeout(attempts, timeout);
            assert_eq!(delays.len(), attempts);

            let sum: f64 = delays.iter().sum();
            assert!(
                (sum - timeout).abs() < EPSILON,
                "attempts={attempts} timeout={timeout} sum={sum}"
            );
        }
    }

    #[test]
    fn delays_are_non_negative_and_non_decreasing() {
        let delays = retries_within_timeout(8, 20.0);
        let mut previous = f64::MIN;
        for delay in delays {
            assert!(delay >= 0.0);
            assert!(delay >= previous - 1e-9);
            previous = delay;
        }
    }

    #[test]
    fn zero_attempts_yields_empty_schedule() {
        assert!(retries_within_timeout(0, 10.0).is_empty());
    }

    #[test]
    fn same_inputs_produce_the_same_schedule_on_both_sides() {
        let client = retries_within_timeout(4, 5.0);
        let server = retries_within_timeout(4, 5.0);
        assert_eq!(client, server);
    }
}
