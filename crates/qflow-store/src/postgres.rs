//! PostgreSQL store.
//!
//! Each compound mutation runs in one transaction and takes row locks with
//! `SELECT ... FOR UPDATE` before it reads the state it is about to change:
//!
//! - `reserve` locks the topic row, so minting for one topic is serialized
//!   while other topics proceed in parallel.
//! - `call` locks the counter row, then the ticket rows it touches.
//! - `close_due_counters` locks every open counter, then their tickets.
//!
//! A partial unique index on `tickets(counter_id) WHERE status = 'IN_PROGRESS'`
//! backs the one-ticket-per-counter rule at the schema level.

use chrono::{DateTime, Utc};
use qflow_core::sequence::next_ticket_no;
use qflow_core::{
    Counter, CounterId, DayWindow, DisplayNames, NewTicket, Requester, Ticket, TicketId,
    TicketNo, TicketStatus, Topic, TopicId,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    BoxFuture, CallOutcome, ClosingOutcome, ClosingQuery, NewCounter, NewTopic, QueueStore,
};

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS topics (
        id BIGSERIAL PRIMARY KEY,
        name_th TEXT NOT NULL,
        name_en TEXT NOT NULL,
        code TEXT NOT NULL UNIQUE
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS counters (
        id BIGSERIAL PRIMARY KEY,
        label TEXT NOT NULL UNIQUE,
        open BOOLEAN NOT NULL DEFAULT FALSE,
        closes_at TIME NOT NULL DEFAULT '16:00:00'
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS counter_topics (
        counter_id BIGINT NOT NULL REFERENCES counters (id) ON DELETE CASCADE,
        topic_id BIGINT NOT NULL REFERENCES topics (id) ON DELETE CASCADE,
        PRIMARY KEY (counter_id, topic_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS tickets (
        id BIGSERIAL PRIMARY KEY,
        no TEXT NOT NULL,
        origin TEXT NOT NULL,
        student_id TEXT,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        topic_id BIGINT NOT NULL REFERENCES topics (id) ON DELETE CASCADE,
        note TEXT,
        status TEXT NOT NULL DEFAULT 'WAITING',
        counter_id BIGINT REFERENCES counters (id) ON DELETE SET NULL,
        feedback BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    "CREATE INDEX IF NOT EXISTS tickets_topic_created_idx ON tickets (topic_id, created_at)",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS tickets_one_in_progress_per_counter
        ON tickets (counter_id) WHERE status = 'IN_PROGRESS'
    ",
];

const TICKET_COLUMNS: &str = "id, no, origin, student_id, first_name, last_name, topic_id, \
     note, status, counter_id, feedback, created_at";

const COUNTER_SELECT: &str = "SELECT c.id, c.label, c.open, c.closes_at, \
     ARRAY(SELECT ct.topic_id FROM counter_topics ct WHERE ct.counter_id = c.id \
     ORDER BY ct.topic_id) AS topics FROM counters c";

const ORIGIN_AUTHENTICATED: &str = "authenticated";
const ORIGIN_WALK_IN: &str = "walkIn";

fn db_error(context: &str, e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::Conflict(format!("{context}: {db}"));
        }
    }
    StoreError::Database(format!("{context}: {e}"))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("column {name}: {e}")))
}

fn row_to_topic(row: &PgRow) -> StoreResult<Topic> {
    Ok(Topic {
        id: TopicId(column(row, "id")?),
        names: DisplayNames {
            th: column(row, "name_th")?,
            en: column(row, "name_en")?,
        },
        code: column(row, "code")?,
    })
}

fn row_to_counter(row: &PgRow) -> StoreResult<Counter> {
    let topics: Vec<i64> = column(row, "topics")?;
    Ok(Counter {
        id: CounterId(column(row, "id")?),
        label: column(row, "label")?,
        open: column(row, "open")?,
        closes_at: column(row, "closes_at")?,
        topics: topics.into_iter().map(TopicId).collect(),
    })
}

fn row_to_ticket(row: &PgRow) -> StoreResult<Ticket> {
    let raw_no: String = column(row, "no")?;
    let no = TicketNo::parse(&raw_no).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let status: String = column(row, "status")?;
    let status: TicketStatus = status.parse().map_err(StoreError::Corrupt)?;
    let origin: String = column(row, "origin")?;
    let first_name: String = column(row, "first_name")?;
    let last_name: String = column(row, "last_name")?;
    let requester = match origin.as_str() {
        ORIGIN_AUTHENTICATED => Requester::Authenticated {
            first_name,
            last_name,
            student_id: column(row, "student_id")?,
        },
        ORIGIN_WALK_IN => Requester::WalkIn {
            first_name,
            last_name,
        },
        other => return Err(StoreError::Corrupt(format!("unknown origin {other:?}"))),
    };
    let counter_id: Option<i64> = column(row, "counter_id")?;
    Ok(Ticket {
        id: TicketId(column(row, "id")?),
        no,
        requester,
        topic_id: TopicId(column(row, "topic_id")?),
        note: column(row, "note")?,
        status,
        counter_id: counter_id.map(CounterId),
        feedback: column(row, "feedback")?,
        created_at: column(row, "created_at")?,
    })
}

fn origin_of(requester: &Requester) -> &'static str {
    if requester.is_walk_in() {
        ORIGIN_WALK_IN
    } else {
        ORIGIN_AUTHENTICATED
    }
}

/// Store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| db_error("Failed to connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes that do not exist yet.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("Failed to apply schema", e))?;
        }
        info!("Database schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to start transaction", e))
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> StoreResult<()> {
        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))
    }

    async fn lock_ticket(
        tx: &mut Transaction<'static, Postgres>,
        id: TicketId,
    ) -> StoreResult<Ticket> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.value())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| db_error("Failed to lock ticket", e))?
        .ok_or_else(|| StoreError::not_found("ticket", id.value()))?;
        row_to_ticket(&row)
    }

    async fn set_status(
        tx: &mut Transaction<'static, Postgres>,
        ticket: &Ticket,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE tickets SET status = $2, counter_id = $3 WHERE id = $1")
            .bind(ticket.id.value())
            .bind(ticket.status.as_str())
            .bind(ticket.counter_id.map(|c| c.value()))
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error("Failed to update ticket", e))?;
        Ok(())
    }

    async fn fetch_counter(&self, id: CounterId) -> StoreResult<Option<Counter>> {
        let row = sqlx::query(&format!("{COUNTER_SELECT} WHERE c.id = $1"))
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load counter", e))?;
        row.as_ref().map(row_to_counter).transpose()
    }

    async fn fetch_tickets(&self, sql: &str, context: &str, binds: TicketFilter) -> StoreResult<Vec<Ticket>> {
        let query = sqlx::query(sql);
        let query = match binds {
            TicketFilter::TopicDay(topic, day) => query
                .bind(topic.value())
                .bind(day.start)
                .bind(day.end),
            TicketFilter::TopicsDay(topics, day) => query
                .bind(topics.iter().map(|t| t.value()).collect::<Vec<_>>())
                .bind(day.start)
                .bind(day.end),
            TicketFilter::Counter(counter) => query.bind(counter.value()),
            TicketFilter::NameDay(first, last, day) => query
                .bind(first)
                .bind(last)
                .bind(day.start)
                .bind(day.end),
        };
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(context, e))?;
        rows.iter().map(row_to_ticket).collect()
    }
}

enum TicketFilter {
    TopicDay(TopicId, DayWindow),
    TopicsDay(Vec<TopicId>, DayWindow),
    Counter(CounterId),
    NameDay(String, String, DayWindow),
}

impl QueueStore for PgStore {
    fn insert_topic(&self, topic: NewTopic) -> BoxFuture<'_, StoreResult<Topic>> {
        Box::pin(async move {
            // Validates the code before touching the database.
            Topic::new(TopicId(0), topic.names.clone(), topic.code.clone())?;
            let row = sqlx::query(
                "INSERT INTO topics (name_th, name_en, code) VALUES ($1, $2, $3) \
                 RETURNING id, name_th, name_en, code",
            )
            .bind(&topic.names.th)
            .bind(&topic.names.en)
            .bind(&topic.code)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to insert topic", e))?;
            row_to_topic(&row)
        })
    }

    fn insert_counter(&self, counter: NewCounter) -> BoxFuture<'_, StoreResult<Counter>> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO counters (label, open, closes_at) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(&counter.label)
            .bind(counter.open)
            .bind(counter.closes_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert counter", e))?;

            for topic in &counter.topics {
                sqlx::query("INSERT INTO counter_topics (counter_id, topic_id) VALUES ($1, $2)")
                    .bind(id)
                    .bind(topic.value())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| db_error("Failed to link counter topic", e))?;
            }
            Self::commit(tx).await?;

            debug!(counter_id = id, label = %counter.label, "Counter inserted");
            let mut topics = counter.topics;
            topics.sort();
            topics.dedup();
            Ok(Counter {
                id: CounterId(id),
                label: counter.label,
                open: counter.open,
                closes_at: counter.closes_at,
                topics,
            })
        })
    }

    fn set_counter_open(&self, id: CounterId, open: bool) -> BoxFuture<'_, StoreResult<Counter>> {
        Box::pin(async move {
            let updated = sqlx::query("UPDATE counters SET open = $2 WHERE id = $1")
                .bind(id.value())
                .bind(open)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("Failed to update counter", e))?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::not_found("counter", id.value()));
            }
            self.fetch_counter(id)
                .await?
                .ok_or_else(|| StoreError::not_found("counter", id.value()))
        })
    }

    fn topic(&self, id: TopicId) -> BoxFuture<'_, StoreResult<Option<Topic>>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT id, name_th, name_en, code FROM topics WHERE id = $1")
                .bind(id.value())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to load topic", e))?;
            row.as_ref().map(row_to_topic).transpose()
        })
    }

    fn counter(&self, id: CounterId) -> BoxFuture<'_, StoreResult<Option<Counter>>> {
        Box::pin(self.fetch_counter(id))
    }

    fn ticket(&self, id: TicketId) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(id.value())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to load ticket", e))?;
            row.as_ref().map(row_to_ticket).transpose()
        })
    }

    fn reserve(
        &self,
        new: NewTicket,
        day: DayWindow,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Ticket>> {
        Box::pin(async move {
            let mut tx = self.begin().await?;

            let code: String = sqlx::query_scalar("SELECT code FROM topics WHERE id = $1 FOR UPDATE")
                .bind(new.topic_id.value())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to lock topic", e))?
                .ok_or_else(|| StoreError::not_found("topic", new.topic_id.value()))?;

            let last: Option<String> = sqlx::query_scalar(
                r"
                SELECT no FROM tickets
                WHERE topic_id = $1 AND created_at >= $2 AND created_at < $3
                  AND starts_with(no, $4)
                ORDER BY length(no) DESC, no DESC
                LIMIT 1
                ",
            )
            .bind(new.topic_id.value())
            .bind(day.start)
            .bind(day.end)
            .bind(&code)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to read last ticket number", e))?;

            let no = next_ticket_no(&code, last.as_deref())?;

            let row = sqlx::query(&format!(
                "INSERT INTO tickets (no, origin, student_id, first_name, last_name, topic_id, \
                 note, status, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(no.encode())
            .bind(origin_of(&new.requester))
            .bind(new.requester.student_id())
            .bind(new.requester.first_name())
            .bind(new.requester.last_name())
            .bind(new.topic_id.value())
            .bind(new.note.as_deref())
            .bind(TicketStatus::Waiting.as_str())
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert ticket", e))?;
            let ticket = row_to_ticket(&row)?;

            Self::commit(tx).await?;
            Ok(ticket)
        })
    }

    fn call(&self, ticket: TicketId, counter: CounterId) -> BoxFuture<'_, StoreResult<CallOutcome>> {
        Box::pin(async move {
            let mut tx = self.begin().await?;

            sqlx::query_scalar::<_, i64>("SELECT id FROM counters WHERE id = $1 FOR UPDATE")
                .bind(counter.value())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to lock counter", e))?
                .ok_or_else(|| StoreError::not_found("counter", counter.value()))?;

            let mut current = Self::lock_ticket(&mut tx, ticket).await?;
            current.start(counter)?;

            let previous = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets \
                 WHERE counter_id = $1 AND status = 'IN_PROGRESS' FOR UPDATE"
            ))
            .bind(counter.value())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to lock serving ticket", e))?;

            let displaced = match previous {
                Some(row) => {
                    let mut previous = row_to_ticket(&row)?;
                    previous.finish()?;
                    Self::set_status(&mut tx, &previous).await?;
                    Some(previous)
                }
                None => None,
            };
            Self::set_status(&mut tx, &current).await?;

            Self::commit(tx).await?;
            Ok(CallOutcome { current, displaced })
        })
    }

    fn record_feedback(&self, ticket: TicketId) -> BoxFuture<'_, StoreResult<Ticket>> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            let mut current = Self::lock_ticket(&mut tx, ticket).await?;
            current.record_feedback()?;
            sqlx::query("UPDATE tickets SET feedback = TRUE WHERE id = $1")
                .bind(ticket.value())
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to record feedback", e))?;
            Self::commit(tx).await?;
            Ok(current)
        })
    }

    fn delete_ticket(&self, ticket: TicketId) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "DELETE FROM tickets WHERE id = $1 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(ticket.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete ticket", e))?;
            row.as_ref().map(row_to_ticket).transpose()
        })
    }

    fn close_due_counters(&self, query: ClosingQuery) -> BoxFuture<'_, StoreResult<ClosingOutcome>> {
        Box::pin(async move {
            let mut tx = self.begin().await?;

            let rows = sqlx::query(&format!(
                "{COUNTER_SELECT} WHERE c.open ORDER BY c.id FOR UPDATE OF c"
            ))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to lock open counters", e))?;

            let mut closed = Vec::new();
            for row in &rows {
                let counter = row_to_counter(row)?;
                if query.is_due(&counter) {
                    closed.push(counter.id);
                }
            }
            if closed.is_empty() {
                Self::commit(tx).await?;
                return Ok(ClosingOutcome::default());
            }
            let ids: Vec<i64> = closed.iter().map(|c| c.value()).collect();

            sqlx::query("UPDATE counters SET open = FALSE WHERE id = ANY($1)")
                .bind(&ids[..])
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to close counters", e))?;

            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets \
                 WHERE status = 'IN_PROGRESS' AND counter_id = ANY($1) ORDER BY id FOR UPDATE"
            ))
            .bind(&ids[..])
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to lock serving tickets", e))?;

            let mut displaced = Vec::with_capacity(rows.len());
            for row in &rows {
                let mut ticket = row_to_ticket(row)?;
                ticket.finish()?;
                Self::set_status(&mut tx, &ticket).await?;
                displaced.push(ticket);
            }

            Self::commit(tx).await?;
            Ok(ClosingOutcome { closed, displaced })
        })
    }

    fn delete_tickets_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM tickets WHERE created_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("Failed to delete old tickets", e))?;
            Ok(result.rows_affected())
        })
    }

    fn topic_tickets(&self, topic: TopicId, day: DayWindow) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {TICKET_COLUMNS} FROM tickets \
                 WHERE topic_id = $1 AND created_at >= $2 AND created_at < $3 \
                 ORDER BY length(no), no"
            );
            self.fetch_tickets(&sql, "Failed to load topic tickets", TicketFilter::TopicDay(topic, day))
                .await
        })
    }

    fn waiting_for_topics(
        &self,
        topics: Vec<TopicId>,
        day: DayWindow,
    ) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {TICKET_COLUMNS} FROM tickets \
                 WHERE status = 'WAITING' AND topic_id = ANY($1) \
                   AND created_at >= $2 AND created_at < $3 \
                 ORDER BY created_at, no"
            );
            self.fetch_tickets(&sql, "Failed to load waiting tickets", TicketFilter::TopicsDay(topics, day))
                .await
        })
    }

    fn serving_at(&self, counter: CounterId) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {TICKET_COLUMNS} FROM tickets \
                 WHERE counter_id = $1 AND status = 'IN_PROGRESS'"
            );
            let tickets = self
                .fetch_tickets(&sql, "Failed to load serving ticket", TicketFilter::Counter(counter))
                .await?;
            Ok(tickets.into_iter().next())
        })
    }

    fn waiting_by_name(
        &self,
        first_name: String,
        last_name: String,
        day: DayWindow,
    ) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {TICKET_COLUMNS} FROM tickets \
                 WHERE status = 'WAITING' AND first_name = $1 AND last_name = $2 \
                   AND created_at >= $3 AND created_at < $4 \
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            );
            let filter = TicketFilter::NameDay(
                first_name.trim().to_string(),
                last_name.trim().to_string(),
                day,
            );
            let tickets = self
                .fetch_tickets(&sql, "Failed to look up ticket by name", filter)
                .await?;
            Ok(tickets.into_iter().next())
        })
    }
}
