//! Long-lived subscription loop driving decode, diff and dispatch.
//!
//! # State Machine
//!
//! ```text
//!   ┌──────────────┐  start   ┌────────────┐  subscribed  ┌───────────┐
//!   │ Disconnected │─────────►│ Connecting │─────────────►│ Listening │◄──┐
//!   └──────────────┘          └─────┬──────┘              └─────┬─────┘   │
//!          ▲    ▲                   │ subscribe failed          │  message│
//!          │    └───────────────────┘                           ├─────────┘
//!          │          (wait for backoff, then Connecting)       │
//!          └────────────────────────────────────────────────────┘
//!                              connection dropped
//!
//!   any state ── cancel ──► Stopped
//! ```
//!
//! Each notification is decoded, diffed and handed to the consumer before the
//! next one is polled. A payload that fails to decode is reported to the
//! consumer and skipped; it never ends the subscription.

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::Result;
use crate::backoff::Backoff;
use crate::config::ObserverConfig;
use crate::error::Error;
use crate::payload::decode;
use crate::stream::ChangeConsumer;
use crate::transport::{NotificationStream, NotificationTransport, RawMessage};

/// Lifecycle state of a [`SubscriptionLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
   /// Not subscribed. Initial state, and the state while waiting to reconnect.
   Disconnected,
   /// A subscribe call is in flight.
   Connecting,
   /// Subscribed and waiting for notifications.
   Listening,
   /// Terminal. The loop was cancelled or gave up reconnecting.
   Stopped,
}

enum ListenOutcome {
   Cancelled,
   Dropped(Error),
}

/// Subscribes to a notification channel and dispatches decoded change events.
pub struct SubscriptionLoop<T> {
   transport: T,
   config: ObserverConfig,
   backoff: Backoff,
   state_tx: watch::Sender<SubscriptionState>,
}

impl<T: NotificationTransport> SubscriptionLoop<T> {
   /// Creates a loop for the given transport.
   ///
   /// # Errors
   ///
   /// Returns [`Error::Configuration`] if `config` is invalid. Nothing is
   /// subscribed before the configuration has been accepted.
   pub fn new(transport: T, config: ObserverConfig) -> Result<Self> {
      config.validate()?;

      let backoff = Backoff::new(config.reconnect.clone());
      let (state_tx, _) = watch::channel(SubscriptionState::Disconnected);

      Ok(Self {
         transport,
         config,
         backoff,
         state_tx,
      })
   }

   pub fn config(&self) -> &ObserverConfig {
      &self.config
   }

   pub fn state(&self) -> SubscriptionState {
      *self.state_tx.borrow()
   }

   /// Returns a receiver that observes every state transition.
   pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
      self.state_tx.subscribe()
   }

   /// Runs until `cancel` fires, reconnecting after transport failures.
   ///
   /// Cancellation is honoured while waiting for a subscription, a
   /// notification or a backoff delay, never in the middle of handling a
   /// notification. The transport stream is dropped before this returns.
   ///
   /// # Errors
   ///
   /// Returns the last transport error once the reconnect policy's
   /// `max_retries` is exhausted, or a non-transient error from the transport.
   pub async fn run<C>(&mut self, consumer: &mut C, cancel: &CancellationToken) -> Result<()>
   where
      C: ChangeConsumer,
   {
      loop {
         if cancel.is_cancelled() {
            break;
         }

         self.set_state(SubscriptionState::Connecting);

         let subscribed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = self.transport.subscribe(&self.config.channel) => result,
         };

         let failure = match subscribed {
            Ok(stream) => {
               self.backoff.reset();
               self.set_state(SubscriptionState::Listening);

               match listen(stream, consumer, cancel).await {
                  ListenOutcome::Cancelled => break,
                  ListenOutcome::Dropped(e) => {
                     warn!(channel = %self.config.channel, error = %e, "Subscription dropped");
                     e
                  }
               }
            }
            Err(e) if !e.is_transient() => {
               error!(channel = %self.config.channel, error = %e, "Subscription cannot be established");
               self.set_state(SubscriptionState::Stopped);
               return Err(e);
            }
            Err(e) => {
               warn!(channel = %self.config.channel, error = %e, "Failed to subscribe");
               e
            }
         };

         self.set_state(SubscriptionState::Disconnected);

         let Some(delay) = self.backoff.next_delay() else {
            self.set_state(SubscriptionState::Stopped);
            return Err(failure);
         };

         tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
         }
      }

      debug!(channel = %self.config.channel, "Subscription stopped");
      self.set_state(SubscriptionState::Stopped);
      Ok(())
   }

   /// Moves the loop onto a tokio task.
   ///
   /// The returned handle stops the loop and reports its final result.
   pub fn spawn<C>(mut self, mut consumer: C) -> SubscriptionHandle
   where
      T: 'static,
      C: ChangeConsumer + 'static,
   {
      let cancel = CancellationToken::new();
      let state = self.watch_state();
      let token = cancel.clone();

      let task = tokio::spawn(async move { self.run(&mut consumer, &token).await });

      SubscriptionHandle {
         cancel,
         state,
         task,
      }
   }

   fn set_state(&self, state: SubscriptionState) {
      let previous = self.state_tx.send_replace(state);
      if previous != state {
         trace!(from = ?previous, to = ?state, "Subscription state changed");
      }
   }
}

/// Feeds notifications to the consumer until the stream fails or `cancel` fires.
///
/// The stream, and with it the underlying connection, is dropped on return.
async fn listen<C>(
   mut stream: NotificationStream,
   consumer: &mut C,
   cancel: &CancellationToken,
) -> ListenOutcome
where
   C: ChangeConsumer,
{
   loop {
      let next = tokio::select! {
         biased;
         _ = cancel.cancelled() => return ListenOutcome::Cancelled,
         next = stream.next() => next,
      };

      match next {
         Some(Ok(message)) => dispatch(message, consumer).await,
         Some(Err(e)) => return ListenOutcome::Dropped(e),
         None => {
            return ListenOutcome::Dropped(Error::TransportConnection(
               "notification stream ended".into(),
            ));
         }
      }
   }
}

/// Decodes one message and hands the result to the consumer.
async fn dispatch<C>(message: RawMessage, consumer: &mut C)
where
   C: ChangeConsumer,
{
   trace!(
      channel = %message.channel,
      process_id = message.process_id,
      bytes = message.payload.len(),
      "Handling notification"
   );

   match decode(&message.payload) {
      Ok(event) => {
         let changed = event.has_change();
         debug!(
            table = %event.table(),
            action = %event.action(),
            changed,
            "Dispatching change event"
         );
         consumer.on_event(event, changed).await;
      }
      Err(e) => {
         warn!(channel = %message.channel, error = %e, "Skipping malformed notification");
         consumer.on_error(&e).await;
      }
   }
}

impl<T> std::fmt::Debug for SubscriptionLoop<T> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("SubscriptionLoop")
         .field("channel", &self.config.channel)
         .field("state", &*self.state_tx.borrow())
         .field("attempt", &self.backoff.attempt())
         .finish()
   }
}

/// Handle to a subscription loop running on a tokio task.
#[derive(Debug)]
pub struct SubscriptionHandle {
   cancel: CancellationToken,
   state: watch::Receiver<SubscriptionState>,
   task: JoinHandle<Result<()>>,
}

impl SubscriptionHandle {
   pub fn state(&self) -> SubscriptionState {
      *self.state.borrow()
   }

   /// Returns a receiver that observes every state transition.
   pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
      self.state.clone()
   }

   /// Token that stops the loop when cancelled, for wiring into shutdown signals.
   pub fn cancellation_token(&self) -> CancellationToken {
      self.cancel.clone()
   }

   pub fn is_finished(&self) -> bool {
      self.task.is_finished()
   }

   /// Requests a stop and waits for the loop to release its subscription.
   pub async fn stop(self) -> Result<()> {
      self.cancel.cancel();
      self.join().await
   }

   /// Waits for the loop to finish without requesting a stop.
   pub async fn join(self) -> Result<()> {
      self.task.await.map_err(|e| Error::Other(format!("subscription task failed: {e}")))?
   }
}
