//! River: prints row changes published on a PostgreSQL notification channel.
//!
//! Database triggers `pg_notify` a JSON document describing each row change.
//! River listens on that channel, keeps only the columns that actually moved,
//! and prints a report for every real change. Ctrl-C shuts it down.

mod args;
mod report;

use std::process::ExitCode;

use clap::Parser;
use sqlx_pg_observer::{PgTransport, Result, SubscriptionLoop};
use tracing::{error, info, warn};

use crate::args::Args;
use crate::report::ReportPrinter;

#[tokio::main]
async fn main() -> ExitCode {
   let args = Args::parse();

   tracing_subscriber::fmt()
      .with_max_level(args.log_level)
      .init();

   match run(args).await {
      Ok(()) => ExitCode::SUCCESS,
      Err(e) => {
         error!(code = %e.error_code(), error = %e, "River stopped");
         ExitCode::FAILURE
      }
   }
}

async fn run(args: Args) -> Result<()> {
   let transport = PgTransport::new(&args.database_url)?;
   let observer = SubscriptionLoop::new(transport, args.to_observer_config())?;

   info!(channel = %args.channel, "Starting River");

   let handle = observer.spawn(ReportPrinter::stdout());
   let shutdown = handle.cancellation_token();

   tokio::spawn(async move {
      match tokio::signal::ctrl_c().await {
         Ok(()) => {
            info!("Shutdown requested");
            shutdown.cancel();
         }
         Err(e) => warn!(error = %e, "Unable to listen for shutdown signal"),
      }
   });

   handle.join().await
}
