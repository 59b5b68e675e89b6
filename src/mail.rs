//! E-mail rendering and delivery seam.
//!
//! The engine never talks to a mail server. It enqueues [`Notification`]s on
//! the outbox; the dispatcher renders them here and hands the result to a
//! [`Mailer`].

use async_trait::async_trait;
use chrono::FixedOffset;
use serde::Serialize;
use thiserror::Error;

use crate::calendar::to_local;
use crate::model::{Contact, Span};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// What happened, with everything needed to write the e-mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Notification {
    /// Sent to each member of the commission owning the location.
    ReservationCreated {
        member_name: String,
        requester: Contact,
        title: String,
        description: Option<String>,
        location_name: String,
        commission_name: String,
        span: Span,
    },
    ReservationAccepted {
        requester_name: String,
        title: String,
        location_name: String,
        span: Span,
        decided_by: String,
    },
    ReservationRejected {
        requester_name: String,
        title: String,
        location_name: String,
        span: Span,
        reason: String,
        decided_by: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to: String,
    pub notification: Notification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, message: &EmailMessage) -> Result<(), MailError>;
}

/// Writes every message to the log instead of delivering it.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, message: &EmailMessage) -> Result<(), MailError> {
        if !to.contains('@') {
            return Err(MailError::InvalidRecipient(to.to_string()));
        }
        tracing::info!(from = %self.from, %to, subject = %message.subject, "mail");
        tracing::debug!("{}", message.text);
        Ok(())
    }
}

fn when(span: &Span, offset: &FixedOffset) -> String {
    let start = to_local(span.start, offset);
    let end = to_local(span.end, offset);
    if start.date() == end.date() {
        format!(
            "le {} de {} à {}",
            start.format("%d/%m/%Y"),
            start.format("%H:%M"),
            end.format("%H:%M")
        )
    } else {
        format!(
            "du {} au {}",
            start.format("%d/%m/%Y %H:%M"),
            end.format("%d/%m/%Y %H:%M")
        )
    }
}

pub fn render(notification: &Notification, offset: &FixedOffset) -> EmailMessage {
    match notification {
        Notification::ReservationCreated {
            member_name,
            requester,
            title,
            description,
            location_name,
            commission_name,
            span,
        } => {
            let mut text = format!(
                "Bonjour {member_name},\n\n\
                 {} ({}) demande à réserver {location_name} {}.\n\
                 Titre : {title}\n",
                requester.name,
                requester.email,
                when(span, offset),
            );
            if let Some(d) = description {
                text.push_str(&format!("Description : {d}\n"));
            }
            text.push_str(&format!(
                "\nCette demande attend une décision de la {commission_name}.\n"
            ));
            EmailMessage {
                subject: format!("🔔 Nouvelle demande de réservation - {title}"),
                text,
            }
        }
        Notification::ReservationAccepted {
            requester_name,
            title,
            location_name,
            span,
            decided_by,
        } => EmailMessage {
            subject: format!("✅ Réservation acceptée - {title}"),
            text: format!(
                "Bonjour {requester_name},\n\n\
                 Votre réservation « {title} » pour {location_name} {} a été acceptée par {decided_by}.\n",
                when(span, offset),
            ),
        },
        Notification::ReservationRejected {
            requester_name,
            title,
            location_name,
            span,
            reason,
            decided_by,
        } => EmailMessage {
            subject: format!("Réservation refusée - {title}"),
            text: format!(
                "Bonjour {requester_name},\n\n\
                 Votre réservation « {title} » pour {location_name} {} a été refusée par {decided_by}.\n\
                 Motif : {reason}\n",
                when(span, offset),
            ),
        },
    }
}
