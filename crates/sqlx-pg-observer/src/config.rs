use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::Error;

/// Channel name the change triggers publish on by default.
pub const DEFAULT_CHANNEL: &str = "river_events";

/// Longest identifier Postgres accepts without truncation (NAMEDATALEN - 1).
const MAX_CHANNEL_LEN: usize = 63;

/// Exponential-backoff reconnection policy for the subscription loop.
///
/// After a failed subscribe or a dropped connection the loop waits
/// `initial_delay`, then multiplies the delay by `backoff_multiplier` after
/// each further failure up to `max_delay`. A successful subscription resets
/// the delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
   /// Delay before the first reconnection attempt.
   ///
   /// Default: 100ms.
   pub initial_delay: Duration,

   /// Upper bound on the delay between attempts.
   ///
   /// Default: 30s.
   pub max_delay: Duration,

   /// Multiplier applied to the delay after each failed attempt. Must be
   /// finite and at least 1.0.
   ///
   /// Default: 2.0.
   pub backoff_multiplier: f64,

   /// Consecutive failed attempts after which the loop gives up.
   ///
   /// `None` (the default) retries forever, which is what a long-lived
   /// observer normally wants.
   pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
   fn default() -> Self {
      Self {
         initial_delay: Duration::from_millis(100),
         max_delay: Duration::from_secs(30),
         backoff_multiplier: 2.0,
         max_retries: None,
      }
   }
}

/// Configuration for the change observer.
///
/// Controls which notification channel is subscribed to, how the loop
/// reconnects after transport failures, and the buffer size of
/// [`ChannelConsumer`](crate::ChannelConsumer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverConfig {
   /// Notification channel to `LISTEN` on.
   ///
   /// Default: `river_events`.
   pub channel: String,

   /// Reconnection policy after transport failures.
   pub reconnect: ReconnectConfig,

   /// Capacity of the channel used by [`ChannelConsumer`](crate::ChannelConsumer).
   ///
   /// The subscription loop waits for room in the channel before accepting
   /// the next notification, so a slow reader applies backpressure rather
   /// than losing events.
   ///
   /// Default: 256.
   pub dispatch_capacity: usize,
}

impl Default for ObserverConfig {
   fn default() -> Self {
      Self {
         channel: DEFAULT_CHANNEL.to_string(),
         reconnect: ReconnectConfig::default(),
         dispatch_capacity: 256,
      }
   }
}

impl ObserverConfig {
   /// Creates a new observer configuration with default settings.
   pub fn new() -> Self {
      Self::default()
   }

   /// Sets the notification channel to subscribe to.
   pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
      self.channel = channel.into();
      self
   }

   /// Replaces the reconnection policy.
   pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
      self.reconnect = reconnect;
      self
   }

   /// Sets the capacity of the dispatch channel.
   ///
   /// See [`dispatch_capacity`](Self::dispatch_capacity) for details.
   pub fn with_dispatch_capacity(mut self, capacity: usize) -> Self {
      self.dispatch_capacity = capacity;
      self
   }

   /// Checks the configuration for values the loop cannot run with.
   ///
   /// # Errors
   ///
   /// Returns [`Error::Configuration`] describing the first invalid field.
   pub fn validate(&self) -> Result<()> {
      if self.channel.trim().is_empty() {
         return Err(Error::Configuration("channel must not be empty".into()));
      }

      if self.channel.len() > MAX_CHANNEL_LEN {
         return Err(Error::Configuration(format!(
            "channel '{}' is longer than {} bytes",
            self.channel, MAX_CHANNEL_LEN
         )));
      }

      if self.dispatch_capacity == 0 {
         return Err(Error::Configuration(
            "dispatch_capacity must be greater than zero".into(),
         ));
      }

      let reconnect = &self.reconnect;

      if reconnect.initial_delay.is_zero() {
         return Err(Error::Configuration(
            "reconnect initial_delay must be greater than zero".into(),
         ));
      }

      if reconnect.max_delay < reconnect.initial_delay {
         return Err(Error::Configuration(format!(
            "reconnect max_delay ({:?}) is shorter than initial_delay ({:?})",
            reconnect.max_delay, reconnect.initial_delay
         )));
      }

      if !reconnect.backoff_multiplier.is_finite() || reconnect.backoff_multiplier < 1.0 {
         return Err(Error::Configuration(format!(
            "reconnect backoff_multiplier must be a finite value of at least 1.0, got {}",
            reconnect.backoff_multiplier
         )));
      }

      Ok(())
   }
}
