use std::sync::Arc;

use chrono::FixedOffset;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::mail::{render, Envelope, Mailer};
use crate::model::Event;
use crate::observability::{NOTIFICATIONS_DROPPED_TOTAL, NOTIFICATIONS_FAILED_TOTAL, NOTIFICATIONS_SENT_TOTAL};

const CHANNEL_CAPACITY: usize = 256;

/// Live event feed per location, for calendar views that refresh in place.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn subscribe(&self, location_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(location_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, location_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&location_id) {
            let _ = sender.send(event.clone());
        }
    }
}

/// Fire-and-forget queue of outgoing e-mails.
///
/// `enqueue` never blocks and never fails the caller: a full or closed
/// queue drops the message with a warning.
#[derive(Clone)]
pub struct Outbox {
    tx: Option<mpsc::Sender<Envelope>>,
}

impl Outbox {
    /// Start the dispatcher task. Must be called inside a tokio runtime.
    pub fn spawn(mailer: Arc<dyn Mailer>, offset: FixedOffset, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_dispatcher(rx, mailer, offset));
        Self { tx: Some(tx) }
    }

    /// An outbox that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn enqueue(&self, envelope: Envelope) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(envelope) {
            metrics::counter!(NOTIFICATIONS_DROPPED_TOTAL).increment(1);
            let to = match &e {
                mpsc::error::TrySendError::Full(env) | mpsc::error::TrySendError::Closed(env) => &env.to,
            };
            warn!(%to, "notification dropped: {e}");
        }
    }
}

async fn run_dispatcher(mut rx: mpsc::Receiver<Envelope>, mailer: Arc<dyn Mailer>, offset: FixedOffset) {
    while let Some(envelope) = rx.recv().await {
        let message = render(&envelope.notification, &offset);
        match mailer.send(&envelope.to, &message).await {
            Ok(()) => {
                metrics::counter!(NOTIFICATIONS_SENT_TOTAL).increment(1);
                debug!(to = %envelope.to, subject = %message.subject, "notification sent");
            }
            Err(e) => {
                metrics::counter!(NOTIFICATIONS_FAILED_TOTAL).increment(1);
                warn!(to = %envelope.to, "notification failed: {e}");
            }
        }
    }
}
