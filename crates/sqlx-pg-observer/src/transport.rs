//! Notification transports feeding the subscription loop.
//!
//! A transport turns a channel name into a lazy stream of [`RawMessage`]s.
//! The stream yielding an error, or ending, means the connection dropped; the
//! subscription loop then calls [`NotificationTransport::subscribe`] again.

use std::future::Future;
use std::str::FromStr;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use sqlx::postgres::{PgConnectOptions, PgListener, PgNotification, PgPoolOptions};
use tracing::{debug, trace};

use crate::Result;
use crate::error::Error;

/// A notification as delivered by the transport, before decoding.
///
/// The channel and process id are carried for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
   /// Channel the notification was published on.
   pub channel: String,
   /// Backend process id of the publishing session.
   pub process_id: u32,
   /// Payload body, expected to be a JSON document.
   pub payload: String,
}

impl RawMessage {
   pub fn new(channel: impl Into<String>, process_id: u32, payload: impl Into<String>) -> Self {
      Self {
         channel: channel.into(),
         process_id,
         payload: payload.into(),
      }
   }
}

impl From<PgNotification> for RawMessage {
   fn from(notification: PgNotification) -> Self {
      Self {
         channel: notification.channel().to_string(),
         process_id: notification.process_id(),
         payload: notification.payload().to_string(),
      }
   }
}

/// Stream of raw messages for one subscription.
///
/// Dropping the stream releases the underlying connection.
pub type NotificationStream = BoxStream<'static, Result<RawMessage>>;

/// Capability to subscribe to a publish/subscribe channel.
pub trait NotificationTransport: Send {
   /// Opens a subscription to `channel`.
   ///
   /// # Errors
   ///
   /// [`Error::TransportConnection`] if the connection or subscription fails
   /// and may succeed on retry, [`Error::Configuration`] if it never will.
   fn subscribe(&mut self, channel: &str) -> impl Future<Output = Result<NotificationStream>> + Send;
}

/// PostgreSQL `LISTEN` transport built on [`PgListener`].
///
/// Each call to [`subscribe`](NotificationTransport::subscribe) opens a fresh
/// dedicated connection. A lost connection ends the stream with
/// [`Error::TransportConnection`] rather than reconnecting silently, so the
/// subscription loop sees the disconnect.
#[derive(Debug, Clone)]
pub struct PgTransport {
   options: PgConnectOptions,
}

impl PgTransport {
   /// Creates a transport from a `postgres://` or `postgresql://` URL.
   ///
   /// No connection is made until the first subscribe.
   ///
   /// # Errors
   ///
   /// Returns [`Error::Configuration`] if the URL cannot be parsed.
   pub fn new(url: &str) -> Result<Self> {
      let url = url.trim();

      if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
         return Err(Error::Configuration(
            "database url must start with postgres:// or postgresql://".into(),
         ));
      }

      let options =
         PgConnectOptions::from_str(url).map_err(|e| Error::Configuration(e.to_string()))?;

      Ok(Self { options })
   }

   /// Creates a transport from already-built connect options.
   pub fn with_options(options: PgConnectOptions) -> Self {
      Self { options }
   }

   async fn connect(&self) -> Result<PgListener> {
      let pool = PgPoolOptions::new()
         .max_connections(1)
         .max_lifetime(None)
         .idle_timeout(None)
         .connect_with(self.options.clone())
         .await
         .map_err(connection_error)?;

      PgListener::connect_with(&pool)
         .await
         .map_err(connection_error)
   }
}

impl NotificationTransport for PgTransport {
   async fn subscribe(&mut self, channel: &str) -> Result<NotificationStream> {
      let mut listener = self.connect().await?;
      listener.listen(channel).await.map_err(connection_error)?;

      debug!(channel = %channel, "Listening for notifications");

      Ok(listener_stream(listener))
   }
}

/// Adapts a listener into a stream that ends after the first connection loss.
fn listener_stream(listener: PgListener) -> NotificationStream {
   stream::unfold(Some(listener), |state| async move {
      let mut listener = state?;

      match listener.try_recv().await {
         Ok(Some(notification)) => {
            trace!(
               channel = %notification.channel(),
               process_id = notification.process_id(),
               "Received notification"
            );
            Some((Ok(RawMessage::from(notification)), Some(listener)))
         }
         Ok(None) => Some((
            Err(Error::TransportConnection(
               "connection to the database was lost".into(),
            )),
            None,
         )),
         Err(e) => Some((Err(connection_error(e)), None)),
      }
   })
   .boxed()
}

/// Maps a sqlx failure to a fatal configuration error when reconnecting cannot
/// fix it, and to a retryable transport error otherwise.
fn connection_error(error: sqlx::Error) -> Error {
   let rejected = error
      .as_database_error()
      .and_then(|db_err| db_err.code())
      .is_some_and(|code| rejects_connection_parameters(&code));

   match error {
      sqlx::Error::Configuration(e) => Error::Configuration(e.to_string()),
      other if rejected => Error::Configuration(other.to_string()),
      other => Error::TransportConnection(other.to_string()),
   }
}

/// SQLSTATEs the server answers with when the credentials or the target
/// database are wrong: class 28 (invalid authorization) and 3D000
/// (invalid catalog name).
fn rejects_connection_parameters(sqlstate: &str) -> bool {
   sqlstate.starts_with("28") || sqlstate == "3D000"
}
