use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::trace;

use crate::change::ChangeEvent;
use crate::error::Error;

/// Receives the outcome of every notification handled by the subscription loop.
///
/// The loop awaits each call before accepting the next notification, so
/// events arrive one at a time in receipt order.
pub trait ChangeConsumer: Send {
   /// Called once per decoded notification.
   ///
   /// `changed` is [`ChangeEvent::has_change`]; `false` marks a no-op update.
   fn on_event(&mut self, event: ChangeEvent, changed: bool) -> impl Future<Output = ()> + Send;

   /// Called when a notification could not be decoded. The loop continues
   /// with the next notification afterwards.
   fn on_error(&mut self, error: &Error) -> impl Future<Output = ()> + Send {
      let _ = error;
      std::future::ready(())
   }
}

impl<F> ChangeConsumer for F
where
   F: FnMut(ChangeEvent, bool) + Send,
{
   fn on_event(&mut self, event: ChangeEvent, changed: bool) -> impl Future<Output = ()> + Send {
      self(event, changed);
      std::future::ready(())
   }
}

/// A handled notification as delivered through a [`DispatchStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
   /// The delta is non-empty.
   Changed(ChangeEvent),
   /// The notification decoded but nothing actually changed.
   Unchanged(ChangeEvent),
   /// The payload could not be decoded.
   Malformed { message: String },
}

impl Dispatch {
   /// The decoded event, if the payload was well-formed.
   pub fn event(&self) -> Option<&ChangeEvent> {
      match self {
         Dispatch::Changed(event) | Dispatch::Unchanged(event) => Some(event),
         Dispatch::Malformed { .. } => None,
      }
   }

   pub fn is_changed(&self) -> bool {
      matches!(self, Dispatch::Changed(_))
   }
}

/// Consumer that forwards every dispatch into a bounded channel.
///
/// Create with [`ChannelConsumer::new`], which also returns the receiving
/// [`DispatchStream`]. When the channel is full the subscription loop waits,
/// so no notification already received is lost.
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
   tx: mpsc::Sender<Dispatch>,
}

impl ChannelConsumer {
   pub fn new(capacity: usize) -> (Self, DispatchStream) {
      let (tx, rx) = mpsc::channel(capacity);
      (Self { tx }, DispatchStream::new(rx))
   }

   async fn forward(&self, dispatch: Dispatch) {
      if self.tx.send(dispatch).await.is_err() {
         trace!("Dispatch stream dropped, discarding notification");
      }
   }
}

impl ChangeConsumer for ChannelConsumer {
   async fn on_event(&mut self, event: ChangeEvent, changed: bool) {
      let dispatch = if changed {
         Dispatch::Changed(event)
      } else {
         Dispatch::Unchanged(event)
      };
      self.forward(dispatch).await;
   }

   async fn on_error(&mut self, error: &Error) {
      let message = error.to_string();
      self.forward(Dispatch::Malformed { message }).await;
   }
}

/// Stream of dispatches produced by a [`ChannelConsumer`].
///
/// Ends once the consumer (and with it the subscription loop) is dropped.
pub struct DispatchStream {
   inner: ReceiverStream<Dispatch>,
   changes_only: bool,
}

impl DispatchStream {
   pub fn new(rx: mpsc::Receiver<Dispatch>) -> Self {
      Self {
         inner: ReceiverStream::new(rx),
         changes_only: false,
      }
   }

   /// Skips no-op and malformed notifications, yielding only real changes.
   pub fn changes_only(mut self) -> Self {
      self.changes_only = true;
      self
   }
}

impl Stream for DispatchStream {
   type Item = Dispatch;

   fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
      loop {
         // ReceiverStream is Unpin, so we can safely create a pinned reference
         let inner = Pin::new(&mut self.inner);

         match inner.poll_next(cx) {
            Poll::Ready(Some(dispatch)) => {
               if self.changes_only && !dispatch.is_changed() {
                  continue;
               }
               return Poll::Ready(Some(dispatch));
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => return Poll::Pending,
         }
      }
   }
}
