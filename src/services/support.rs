//! Support tickets
//!
//! Ticket creation is the abusable entry point here; callers gate it with the
//! `support_ticket` rate-limit class before reaching this service.

use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::database::error::DatabaseError;
use crate::database::models::{
    generate_ticket_ref, NewSupportTicket, SupportTicket, TicketPriority, TicketStatus,
    TicketStatusChange,
};
use crate::database::store::EntityStore;
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::services::orders::sanitize_description;

const MAX_SUBJECT_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum SupportError {
    #[error("user id must not be empty")]
    MissingUserId,

    #[error("{field} must not be empty")]
    MissingField { field: &'static str },

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("support ticket not found: {ticket_ref}")]
    TicketNotFound { ticket_ref: String },

    #[error("ticket {ticket_ref} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        ticket_ref: String,
        from: TicketStatus,
        to: TicketStatus,
    },

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl From<SupportError> for AppError {
    fn from(err: SupportError) -> Self {
        let kind = match err {
            SupportError::MissingUserId => AppErrorKind::Validation(ValidationError::MissingField {
                field: "user_id".to_string(),
            }),
            SupportError::MissingField { field } => {
                AppErrorKind::Validation(ValidationError::MissingField {
                    field: field.to_string(),
                })
            }
            SupportError::InvalidPriority(reason) => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "priority".to_string(),
                    reason,
                })
            }
            SupportError::TicketNotFound { ticket_ref } => {
                AppErrorKind::Domain(DomainError::TicketNotFound { ticket_ref })
            }
            SupportError::InvalidStatusTransition { from, to, .. } => {
                AppErrorKind::Domain(DomainError::InvalidStatusTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
            SupportError::Storage(e) => return e.into(),
        };
        AppError::new(kind)
    }
}

pub type SupportResult<T> = Result<T, SupportError>;

pub struct SupportService {
    store: Arc<dyn EntityStore>,
}

impl SupportService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn create_ticket(
        &self,
        external_id: &str,
        subject: &str,
        description: &str,
        priority: Option<&str>,
    ) -> SupportResult<SupportTicket> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(SupportError::MissingUserId);
        }
        let subject: String = sanitize_description(subject)
            .ok_or(SupportError::MissingField { field: "subject" })?
            .chars()
            .take(MAX_SUBJECT_CHARS)
            .collect();
        let description = sanitize_description(description)
            .ok_or(SupportError::MissingField {
                field: "description",
            })?;
        let priority = match priority {
            Some(raw) => TicketPriority::from_str(raw).map_err(SupportError::InvalidPriority)?,
            None => TicketPriority::default(),
        };

        let user = self.store.get_or_create_user(external_id).await?;
        let ticket = self
            .store
            .insert_ticket(NewSupportTicket {
                ticket_ref: generate_ticket_ref(),
                user_id: user.id,
                subject,
                description,
                priority,
            })
            .await?;

        info!(
            ticket_ref = %ticket.ticket_ref,
            user_id = user.id,
            priority = ticket.priority.as_str(),
            "support ticket created"
        );
        Ok(ticket)
    }

    pub async fn get_ticket(&self, ticket_ref: &str) -> SupportResult<SupportTicket> {
        self.store
            .find_ticket(ticket_ref)
            .await?
            .ok_or_else(|| SupportError::TicketNotFound {
                ticket_ref: ticket_ref.to_string(),
            })
    }

    pub async fn update_ticket_status(
        &self,
        ticket_ref: &str,
        target: TicketStatus,
    ) -> SupportResult<SupportTicket> {
        match self.store.update_ticket_status(ticket_ref, target).await {
            Ok(TicketStatusChange::Applied(ticket)) => {
                info!(ticket_ref = %ticket.ticket_ref, status = %ticket.status, "ticket status updated");
                Ok(ticket)
            }
            Ok(TicketStatusChange::Rejected { current }) => {
                Err(SupportError::InvalidStatusTransition {
                    ticket_ref: ticket_ref.to_string(),
                    from: current,
                    to: target,
                })
            }
            Err(e) if e.is_not_found() => Err(SupportError::TicketNotFound {
                ticket_ref: ticket_ref.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
