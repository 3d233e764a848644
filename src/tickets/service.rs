use std::sync::Arc;

use tracing::info;

use super::error::TicketError;
use super::model::{
    Label, LabelPatch, NewLabel, NewTicket, Ticket, TicketListQuery, TicketPage, TicketPatch,
    TicketStatus,
};
use super::repository::TicketRepository;

/// Business rules on top of a [`TicketRepository`]: existence checks, label
/// name uniqueness and status transitions.
#[derive(Clone)]
pub struct TicketService {
    repository: Arc<dyn TicketRepository>,
}

impl TicketService {
    pub fn new(repository: Arc<dyn TicketRepository>) -> Self {
        Self { repository }
    }

    pub async fn list_tickets(&self, query: TicketListQuery) -> Result<TicketPage, TicketError> {
        self.repository.list_tickets(&query).await
    }

    pub async fn get_ticket(&self, id: i64) -> Result<Ticket, TicketError> {
        self.repository
            .get_ticket(id)
            .await?
            .ok_or(TicketError::TicketNotFound(id))
    }

    pub async fn create_ticket(&self, ticket: NewTicket) -> Result<Ticket, TicketError> {
        if let Some(missing) = self
            .repository
            .missing_label_ids(&ticket.label_ids)
            .await?
            .first()
        {
            return Err(TicketError::LabelNotFound(*missing));
        }

        let created = self.repository.create_ticket(ticket).await?;
        info!(ticket_id = created.id, "ticket created");
        Ok(created)
    }

    pub async fn update_ticket(&self, id: i64, patch: TicketPatch) -> Result<Ticket, TicketError> {
        if patch.is_empty() {
            return self.get_ticket(id).await;
        }
        self.repository
            .update_ticket(id, patch)
            .await?
            .ok_or(TicketError::TicketNotFound(id))
    }

    pub async fn delete_ticket(&self, id: i64) -> Result<(), TicketError> {
        if !self.repository.delete_ticket(id).await? {
            return Err(TicketError::TicketNotFound(id));
        }
        info!(ticket_id = id, "ticket deleted");
        Ok(())
    }

    pub async fn complete_ticket(&self, id: i64) -> Result<Ticket, TicketError> {
        self.change_status(id, TicketStatus::Completed).await
    }

    pub async fn uncomplete_ticket(&self, id: i64) -> Result<Ticket, TicketError> {
        self.change_status(id, TicketStatus::Open).await
    }

    pub async fn cancel_ticket(&self, id: i64) -> Result<Ticket, TicketError> {
        self.change_status(id, TicketStatus::Cancelled).await
    }

    pub async fn add_label(&self, ticket_id: i64, label_id: i64) -> Result<Ticket, TicketError> {
        self.get_ticket(ticket_id).await?;
        self.get_label(label_id).await?;
        self.repository.attach_label(ticket_id, label_id).await?;
        self.get_ticket(ticket_id).await
    }

    pub async fn remove_label(&self, ticket_id: i64, label_id: i64) -> Result<Ticket, TicketError> {
        self.get_ticket(ticket_id).await?;
        self.get_label(label_id).await?;
        self.repository.detach_label(ticket_id, label_id).await?;
        self.get_ticket(ticket_id).await
    }

    pub async fn list_labels(&self) -> Result<Vec<Label>, TicketError> {
        self.repository.list_labels().await
    }

    pub async fn get_label(&self, id: i64) -> Result<Label, TicketError> {
        self.repository
            .get_label(id)
            .await?
            .ok_or(TicketError::LabelNotFound(id))
    }

    pub async fn create_label(&self, label: NewLabel) -> Result<Label, TicketError> {
        if self.repository.find_label_by_name(&label.name).await?.is_some() {
            return Err(TicketError::DuplicateLabel(label.name));
        }
        let created = self.repository.create_label(label).await?;
        info!(label_id = created.id, name = %created.name, "label created");
        Ok(created)
    }

    pub async fn update_label(&self, id: i64, patch: LabelPatch) -> Result<Label, TicketError> {
        let current = self.get_label(id).await?;

        if let Some(name) = patch.name.as_deref() {
            if name != current.name && self.repository.find_label_by_name(name).await?.is_some() {
                return Err(TicketError::DuplicateLabel(name.to_string()));
            }
        }

        self.repository
            .update_label(id, patch)
            .await?
            .ok_or(TicketError::LabelNotFound(id))
    }

    pub async fn delete_label(&self, id: i64) -> Result<(), TicketError> {
        if !self.repository.delete_label(id).await? {
            return Err(TicketError::LabelNotFound(id));
        }
        info!(label_id = id, "label deleted");
        Ok(())
    }

    async fn change_status(&self, id: i64, status: TicketStatus) -> Result<Ticket, TicketError> {
        let ticket = self
            .repository
            .set_status(id, status)
            .await?
            .ok_or(TicketError::TicketNotFound(id))?;
        info!(ticket_id = id, status = %status, "ticket status changed");
        Ok(ticket)
    }
}
