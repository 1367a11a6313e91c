//! Reconnection delay bookkeeping for the subscription loop.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ReconnectConfig;

/// Tracks consecutive failed connection attempts and the delay before the next one.
#[derive(Debug)]
pub struct Backoff {
   config: ReconnectConfig,
   attempt: u32,
   current_delay: Duration,
}

impl Backoff {
   pub fn new(config: ReconnectConfig) -> Self {
      let current_delay = config.initial_delay;
      Self {
         config,
         attempt: 0,
         current_delay,
      }
   }

   /// Number of failed attempts since the last successful subscription.
   pub fn attempt(&self) -> u32 {
      self.attempt
   }

   /// Clears the failure count after a successful subscription.
   pub fn reset(&mut self) {
      if self.attempt > 0 {
         debug!(attempts = self.attempt, "Subscription established, resetting backoff");
      }
      self.attempt = 0;
      self.current_delay = self.config.initial_delay;
   }

   /// Records a failed attempt and returns how long to wait before retrying.
   ///
   /// Returns `None` once `max_retries` consecutive failures have been recorded.
   pub fn next_delay(&mut self) -> Option<Duration> {
      if self
         .config
         .max_retries
         .is_some_and(|max| self.attempt >= max)
      {
         warn!(
            attempts = self.attempt,
            max = ?self.config.max_retries,
            "Maximum reconnection attempts exceeded"
         );
         return None;
      }

      self.attempt = self.attempt.saturating_add(1);
      let delay = self.current_delay;

      self.current_delay = self.grow(delay);

      debug!(
         attempt = self.attempt,
         delay_ms = delay.as_millis(),
         "Scheduling reconnection attempt"
      );

      Some(delay)
   }

   /// Applies the multiplier to `delay`, saturating at `max_delay`.
   fn grow(&self, delay: Duration) -> Duration {
      let max_delay = self.config.max_delay;
      Duration::try_from_secs_f64(delay.as_secs_f64() * self.config.backoff_multiplier)
         .map_or(max_delay, |grown| grown.min(max_delay))
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn test_config() -> ReconnectConfig {
      ReconnectConfig {
         initial_delay: Duration::from_millis(100),
         max_delay: Duration::from_millis(500),
         backoff_multiplier: 2.0,
         max_retries: None,
      }
   }

   #[test]
   fn test_exponential_growth_is_capped() {
      let mut backoff = Backoff::new(test_config());

      assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
      assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
      assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
      assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
      assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
      assert_eq!(backoff.attempt(), 5);
   }

   #[test]
   fn test_reset_restores_initial_delay() {
      let mut backoff = Backoff::new(test_config());
      backoff.next_delay();
      backoff.next_delay();

      backoff.reset();

      assert_eq!(backoff.attempt(), 0);
      assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
   }

   #[test]
   fn test_max_retries_exhausts() {
      let mut backoff = Backoff::new(ReconnectConfig {
         max_retries: Some(2),
         ..test_config()
      });

      assert!(backoff.next_delay().is_some());
      assert!(backoff.next_delay().is_some());
      assert!(backoff.next_delay().is_none());
      assert!(backoff.next_delay().is_none());
   }

   #[test]
   fn test_huge_max_delay_saturates_instead_of_overflowing() {
      let max_delay = Duration::from_millis(u64::MAX);
      let mut backoff = Backoff::new(ReconnectConfig {
         max_delay,
         ..test_config()
      });

      let mut last = Duration::ZERO;
      for _ in 0..100 {
         let delay = backoff.next_delay().unwrap();
         assert!(delay >= last);
         last = delay;
      }
      assert_eq!(last, max_delay);
   }

   #[test]
   fn test_infinite_multiplier_caps_at_max_delay() {
      let mut backoff = Backoff::new(ReconnectConfig {
         backoff_multiplier: f64::INFINITY,
         ..test_config()
      });

      assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
      assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
   }

   #[test]
   fn test_constant_delay_with_unit_multiplier() {
      let mut backoff = Backoff::new(ReconnectConfig {
         backoff_multiplier: 1.0,
         ..test_config()
      });

      for _ in 0..4 {
         assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
      }
   }
}
