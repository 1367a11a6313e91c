use std::time::Duration;

use clap::Parser;
use sqlx_pg_observer::{DEFAULT_CHANNEL, ObserverConfig, ReconnectConfig};
use tracing::level_filters::LevelFilter;

/// Watch a PostgreSQL notification channel and print row changes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
   /// Connection URL of the database publishing change notifications.
   #[arg(long, env = "DATABASE_URL", default_value = "postgres://river:river@db:5432/river")]
   pub database_url: String,

   /// Notification channel to listen on.
   #[arg(long, env = "RIVER_CHANNEL", default_value = DEFAULT_CHANNEL)]
   pub channel: String,

   /// Delay before the first reconnection attempt, in milliseconds.
   #[arg(long, default_value_t = 100)]
   pub initial_backoff_ms: u64,

   /// Upper bound on the delay between reconnection attempts, in milliseconds.
   #[arg(long, default_value_t = 30_000)]
   pub max_backoff_ms: u64,

   /// Give up after this many consecutive failed reconnection attempts.
   #[arg(long)]
   pub max_retries: Option<u32>,

   /// Maximum log level (off, error, warn, info, debug, trace).
   #[arg(long, env = "RIVER_LOG", default_value = "info")]
   pub log_level: LevelFilter,
}

impl Args {
   pub fn to_observer_config(&self) -> ObserverConfig {
      ObserverConfig::new()
         .with_channel(self.channel.clone())
         .with_reconnect(ReconnectConfig {
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            max_retries: self.max_retries,
            ..Default::default()
         })
   }
}
