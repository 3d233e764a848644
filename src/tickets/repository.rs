use async_trait::async_trait;

use super::error::TicketError;
use super::model::{
    Label, LabelPatch, NewLabel, NewTicket, Ticket, TicketListQuery, TicketPage, TicketPatch,
    TicketStatus,
};

/// Persistence seam for tickets and labels.
///
/// Lookups return `Ok(None)` / `Ok(false)` for missing rows; the service turns
/// those into not-found errors.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn list_tickets(&self, query: &TicketListQuery) -> Result<TicketPage, TicketError>;
    async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, TicketError>;
    async fn create_ticket(&self, ticket: NewTicket) -> Result<Ticket, TicketError>;
    async fn update_ticket(&self, id: i64, patch: TicketPatch)
    -> Result<Option<Ticket>, TicketError>;
    async fn set_status(&self, id: i64, status: TicketStatus)
    -> Result<Option<Ticket>, TicketError>;
    async fn delete_ticket(&self, id: i64) -> Result<bool, TicketError>;

    /// Links a label to a ticket. Linking twice keeps one link.
    async fn attach_label(&self, ticket_id: i64, label_id: i64) -> Result<(), TicketError>;
    async fn detach_label(&self, ticket_id: i64, label_id: i64) -> Result<(), TicketError>;

    async fn list_labels(&self) -> Result<Vec<Label>, TicketError>;
    async fn get_label(&self, id: i64) -> Result<Option<Label>, TicketError>;
    async fn find_label_by_name(&self, name: &str) -> Result<Option<Label>, TicketError>;
    /// Returns the ids from `ids` that have no label row, in input order.
    async fn missing_label_ids(&self, ids: &[i64]) -> Result<Vec<i64>, TicketError>;
    async fn create_label(&self, label: NewLabel) -> Result<Label, TicketError>;
    async fn update_label(&self, id: i64, patch: LabelPatch) -> Result<Option<Label>, TicketError>;
    async fn delete_label(&self, id: i64) -> Result<bool, TicketError>;
}
