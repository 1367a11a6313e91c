use std::io;

use sqlx_pg_observer::{ChangeConsumer, ChangeEvent, Error};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

const NOTHING_NEW: &str = "Nothing new...";

/// Writes a report block for every changed row and a short notice for no-ops.
///
/// Notifications that could not be decoded get a one-line notice on the
/// separate `notices` writer.
pub struct ReportPrinter<W, N> {
   out: W,
   notices: N,
}

impl ReportPrinter<tokio::io::Stdout, tokio::io::Stderr> {
   pub fn stdout() -> Self {
      Self::new(tokio::io::stdout(), tokio::io::stderr())
   }
}

impl<W, N> ReportPrinter<W, N>
where
   W: AsyncWrite + Unpin + Send,
   N: AsyncWrite + Unpin + Send,
{
   pub fn new(out: W, notices: N) -> Self {
      Self { out, notices }
   }

   async fn write_report(&mut self, event: &ChangeEvent, changed: bool) -> io::Result<()> {
      let report = if changed {
         format!("\n{event}\n\n")
      } else {
         format!("{NOTHING_NEW}\n")
      };
      self.out.write_all(report.as_bytes()).await?;
      self.out.flush().await
   }

   async fn write_notice(&mut self, error: &Error) -> io::Result<()> {
      let notice = format!("Skipped notification: {error}\n");
      self.notices.write_all(notice.as_bytes()).await?;
      self.notices.flush().await
   }
}

impl<W, N> ChangeConsumer for ReportPrinter<W, N>
where
   W: AsyncWrite + Unpin + Send,
   N: AsyncWrite + Unpin + Send,
{
   async fn on_event(&mut self, event: ChangeEvent, changed: bool) {
      if let Err(e) = self.write_report(&event, changed).await {
         warn!(error = %e, table = %event.table(), "Failed to write change report");
      }
   }

   async fn on_error(&mut self, error: &Error) {
      if let Err(e) = self.write_notice(error).await {
         warn!(error = %e, "Failed to write notice");
      }
   }
}
