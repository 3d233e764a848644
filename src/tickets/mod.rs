//! Ticket Manager backend.
//!
//! Tickets carry a status and any number of labels; labels are shared and
//! uniquely named. Storage sits behind [`TicketRepository`], with SQLite as
//! the shipped implementation.

pub mod dto;
pub mod error;
pub mod http;
pub mod model;
pub mod repository;
pub mod service;
pub mod sqlite;

pub use error::TicketError;
pub use http::{TicketsState, build_router};
pub use model::{Label, Ticket, TicketListQuery, TicketPage, TicketStatus};
pub use repository::TicketRepository;
pub use service::TicketService;
pub use sqlite::SqliteTicketRepository;
