// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

/// Exponential backoff with up to 25% random jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    remaining: u32,
}

impl Backoff {
    /// Creates a backoff that allows `attempts` tries in total.
    pub fn new(attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            next: initial,
            max,
            remaining: attempts.max(1),
        }
    }

    /// Records one attempt. Returns the delay to wait before the next one, or
    /// `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            return None;
        }

        let base = self.next;
        self.next = (self.next * 2).min(self.max);

        let jitter_ms = fastrand::u64(0..=(base.as_millis() as u64 / 4));
        Some(base + Duration::from_millis(jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_attempt_never_waits() {
        let mut backoff = Backoff::new(1, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_zero_attempts_treated_as_one() {
        let mut backoff = Backoff::new(0, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_delays_grow_and_are_capped() {
        let mut backoff = Backoff::new(6, Duration::from_millis(100), Duration::from_millis(300));

        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(delays.len(), 5);

        // base 100, 200, 300, 300, 300 plus at most 25% jitter
        assert!(delays[0] >= Duration::from_millis(100) && delays[0] <= Duration::from_millis(125));
        assert!(delays[1] >= Duration::from_millis(200) && delays[1] <= Duration::from_millis(250));
        for delay in &delays[2..] {
            assert!(*delay >= Duration::from_millis(300) && *delay <= Duration::from_millis(375));
        }
    }
}
