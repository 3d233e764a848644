use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use super::error::TicketError;
use super::model::{
    Label, LabelPatch, NewLabel, NewTicket, Pagination, Ticket, TicketListQuery, TicketPage,
    TicketPatch, TicketStatus,
};
use super::repository::TicketRepository;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS labels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        color TEXT NOT NULL DEFAULT '#6B7280',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tickets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL DEFAULT 'open',
        search_text TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ticket_labels (
        ticket_id INTEGER NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
        label_id INTEGER NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
        PRIMARY KEY (ticket_id, label_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status)",
    "CREATE INDEX IF NOT EXISTS idx_ticket_labels_label ON ticket_labels(label_id)",
];

const TICKET_COLUMNS: &str = "t.id, t.title, t.description, t.status, t.created_at, t.updated_at";
const LABEL_COLUMNS: &str = "id, name, color, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteTicketRepository {
    pool: SqlitePool,
}

impl SqliteTicketRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `url` and applies the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, TicketError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let repository = Self::new(pool);
        repository.init_schema().await?;
        info!(database_url = %url, "ticket store ready");
        Ok(repository)
    }

    pub async fn init_schema(&self) -> Result<(), TicketError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn labels_for(&self, ticket_ids: &[i64]) -> Result<HashMap<i64, Vec<Label>>, TicketError> {
        let mut by_ticket: HashMap<i64, Vec<Label>> = HashMap::new();
        if ticket_ids.is_empty() {
            return Ok(by_ticket);
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT tl.ticket_id, l.id, l.name, l.color, l.created_at, l.updated_at
            FROM ticket_labels tl
            JOIN labels l ON l.id = tl.label_id
            WHERE tl.ticket_id IN (
            "#,
        );
        let mut ids = builder.separated(", ");
        for id in ticket_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(") ORDER BY l.name ASC");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        for row in &rows {
            let ticket_id = row.try_get::<i64, _>("ticket_id")?;
            by_ticket.entry(ticket_id).or_default().push(row_to_label(row)?);
        }
        Ok(by_ticket)
    }

    async fn hydrate(&self, rows: &[SqliteRow]) -> Result<Vec<Ticket>, TicketError> {
        let mut tickets = rows
            .iter()
            .map(row_to_ticket)
            .collect::<Result<Vec<_>, _>>()?;
        let ids = tickets.iter().map(|ticket| ticket.id).collect::<Vec<_>>();
        let mut labels = self.labels_for(&ids).await?;

        for ticket in &mut tickets {
            ticket.labels = labels.remove(&ticket.id).unwrap_or_default();
        }
        Ok(tickets)
    }

    async fn touch_ticket(&self, id: i64) -> Result<(), TicketError> {
        sqlx::query("UPDATE tickets SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl TicketRepository for SqliteTicketRepository {
    async fn list_tickets(&self, query: &TicketListQuery) -> Result<TicketPage, TicketError> {
        let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tickets t");
        let mut has_where = false;
        push_list_filters(&mut count_builder, &mut has_where, query);

        let (total,): (i64,) = count_builder
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut select_builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {TICKET_COLUMNS} FROM tickets t"));
        let mut has_where = false;
        push_list_filters(&mut select_builder, &mut has_where, query);

        let direction = query.sort_order.keyword();
        select_builder
            .push(" ORDER BY t.")
            .push(query.sort_by.column())
            .push(" ")
            .push(direction)
            .push(", t.id ")
            .push(direction)
            .push(" LIMIT ")
            .push_bind(query.page_size)
            .push(" OFFSET ")
            .push_bind(query.offset());

        let rows = select_builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        debug!(total, returned = rows.len(), page = query.page, "listed tickets");

        Ok(TicketPage {
            data: self.hydrate(&rows).await?,
            pagination: Pagination::new(query.page, query.page_size, total),
        })
    }

    async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, TicketError> {
        let maybe_row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets t WHERE t.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match maybe_row {
            Some(row) => Ok(self.hydrate(std::slice::from_ref(&row)).await?.pop()),
            None => Ok(None),
        }
    }

    async fn create_ticket(&self, ticket: NewTicket) -> Result<Ticket, TicketError> {
        let now = Utc::now();
        let folded = search_text(&ticket.title, ticket.description.as_deref());
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let id = sqlx::query(
            r#"
            INSERT INTO tickets (title, description, status, search_text, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ticket.title)
        .bind(ticket.description)
        .bind(TicketStatus::Open.as_str())
        .bind(folded)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .last_insert_rowid();

        for label_id in ticket.label_ids {
            sqlx::query("INSERT OR IGNORE INTO ticket_labels (ticket_id, label_id) VALUES (?, ?)")
                .bind(id)
                .bind(label_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        self.get_ticket(id)
            .await?
            .ok_or(TicketError::TicketNotFound(id))
    }

    async fn update_ticket(
        &self,
        id: i64,
        patch: TicketPatch,
    ) -> Result<Option<Ticket>, TicketError> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE tickets SET updated_at = ");
        builder.push_bind(Utc::now());

        if let Some(title) = patch.title {
            builder.push(", title = ").push_bind(title);
        }
        if let Some(description) = patch.description {
            builder.push(", description = ").push_bind(description);
        }
        builder.push(" WHERE id = ").push_bind(id);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let result = builder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let (title, description): (String, Option<String>) =
            sqlx::query_as("SELECT title, description FROM tickets WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        sqlx::query("UPDATE tickets SET search_text = ? WHERE id = ?")
            .bind(search_text(&title, description.as_deref()))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        self.get_ticket(id).await
    }

    async fn set_status(
        &self,
        id: i64,
        status: TicketStatus,
    ) -> Result<Option<Ticket>, TicketError> {
        let result = sqlx::query("UPDATE tickets SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_ticket(id).await
    }

    async fn delete_ticket(&self, id: i64) -> Result<bool, TicketError> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn attach_label(&self, ticket_id: i64, label_id: i64) -> Result<(), TicketError> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO ticket_labels (ticket_id, label_id) VALUES (?, ?)")
                .bind(ticket_id)
                .bind(label_id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            self.touch_ticket(ticket_id).await?;
        }
        Ok(())
    }

    async fn detach_label(&self, ticket_id: i64, label_id: i64) -> Result<(), TicketError> {
        let result = sqlx::query("DELETE FROM ticket_labels WHERE ticket_id = ? AND label_id = ?")
            .bind(ticket_id)
            .bind(label_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            self.touch_ticket(ticket_id).await?;
        }
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<Label>, TicketError> {
        let rows = sqlx::query(&format!(
            "SELECT {LABEL_COLUMNS} FROM labels ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(row_to_label).collect()
    }

    async fn get_label(&self, id: i64) -> Result<Option<Label>, TicketError> {
        let maybe_row = sqlx::query(&format!("SELECT {LABEL_COLUMNS} FROM labels WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        maybe_row.as_ref().map(row_to_label).transpose()
    }

    async fn find_label_by_name(&self, name: &str) -> Result<Option<Label>, TicketError> {
        let maybe_row = sqlx::query(&format!("SELECT {LABEL_COLUMNS} FROM labels WHERE name = ?"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        maybe_row.as_ref().map(row_to_label).transpose()
    }

    async fn missing_label_ids(&self, ids: &[i64]) -> Result<Vec<i64>, TicketError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM labels WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let found = builder
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(ids
            .iter()
            .copied()
            .filter(|id| !found.contains(id))
            .collect())
    }

    async fn create_label(&self, label: NewLabel) -> Result<Label, TicketError> {
        let now = Utc::now();
        let name = label.name.clone();
        let row = sqlx::query(&format!(
            "INSERT INTO labels (name, color, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING {LABEL_COLUMNS}"
        ))
        .bind(label.name)
        .bind(label.color)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_label_write_error(err, &name))?;

        row_to_label(&row)
    }

    async fn update_label(&self, id: i64, patch: LabelPatch) -> Result<Option<Label>, TicketError> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE labels SET updated_at = ");
        builder.push_bind(Utc::now());

        let name = patch.name.clone().unwrap_or_default();
        if let Some(new_name) = patch.name {
            builder.push(", name = ").push_bind(new_name);
        }
        if let Some(color) = patch.color {
            builder.push(", color = ").push_bind(color);
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(format!(" RETURNING {LABEL_COLUMNS}"));

        let maybe_row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_label_write_error(err, &name))?;

        maybe_row.as_ref().map(row_to_label).transpose()
    }

    async fn delete_label(&self, id: i64) -> Result<bool, TicketError> {
        let result = sqlx::query("DELETE FROM labels WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }
}

fn push_list_filters(
    builder: &mut QueryBuilder<Sqlite>,
    has_where: &mut bool,
    query: &TicketListQuery,
) {
    if let Some(status) = query.status {
        push_where_prefix(builder, has_where);
        builder.push("t.status = ").push_bind(status.as_str());
    }

    if !query.label_ids.is_empty() {
        push_where_prefix(builder, has_where);
        builder.push("t.id IN (SELECT DISTINCT ticket_id FROM ticket_labels WHERE label_id IN (");
        let mut ids = builder.separated(", ");
        for id in &query.label_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated("))");
    }

    if let Some(search) = query.search.as_ref() {
        let pattern = format!("%{}%", search.to_lowercase());
        push_where_prefix(builder, has_where);
        builder.push("t.search_text LIKE ").push_bind(pattern);
    }
}

fn push_where_prefix(builder: &mut QueryBuilder<Sqlite>, has_where: &mut bool) {
    if !*has_where {
        builder.push(" WHERE ");
        *has_where = true;
    } else {
        builder.push(" AND ");
    }
}

/// Unicode-lowercased title and description, matched by the search filter.
/// SQLite's `LOWER()` only folds ASCII, so folding happens here.
fn search_text(title: &str, description: Option<&str>) -> String {
    let mut text = title.to_lowercase();
    if let Some(description) = description {
        text.push('\n');
        text.push_str(&description.to_lowercase());
    }
    text
}

fn row_to_ticket(row: &SqliteRow) -> Result<Ticket, TicketError> {
    let status = row.try_get::<String, _>("status")?;
    Ok(Ticket {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: status.parse()?,
        labels: Vec::new(),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn row_to_label(row: &SqliteRow) -> Result<Label, TicketError> {
    Ok(Label {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn map_label_write_error(error: sqlx::Error, name: &str) -> TicketError {
    match &error {
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
            TicketError::DuplicateLabel(name.to_string())
        }
        _ => map_sqlx_error(error),
    }
}

fn map_sqlx_error(error: sqlx::Error) -> TicketError {
    TicketError::storage(error.to_string())
}
