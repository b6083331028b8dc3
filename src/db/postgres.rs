use super::{snapshot_key, HistoryStore, OrderLedger, SnapshotWrite};
use crate::models::{Candle, FilledTotals, OrderBookSample, OrderSide, Project};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

/// Postgres-backed history store and order ledger
///
/// Every query is parameterized. Snapshot writes run in one transaction that
/// holds a per-symbol advisory lock, so the dedup check and the batch insert are
/// atomic across pollers and processes.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres and run migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    /// * `max_connections` - Pool size
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }

    fn sample_from_row(row: &PgRow) -> Result<OrderBookSample> {
        let side: String = row.try_get("side")?;

        Ok(OrderBookSample {
            sequence_id: row.try_get("sequence_id")?,
            symbol: row.try_get("symbol")?,
            side: side.parse()?,
            price: row.try_get("price")?,
            quantity: row.try_get("quantity")?,
            captured_at: row.try_get("captured_at")?,
        })
    }

    fn project_from_row(row: &PgRow) -> Result<Project> {
        Ok(Project {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            initial_balance_quote: row.try_get("initial_balance")?,
            balance_base: row.try_get("balance_base")?,
            balance_quote: row.try_get("balance_quote")?,
            roi: row.try_get("roi")?,
            created_at: row.try_get("created_at")?,
            force_quit: row.try_get("force_quit")?,
            quit_protect: row.try_get("quit_protect")?,
            client_order_id: row.try_get("client_order_id")?,
            order_id: row.try_get("order_id")?,
        })
    }
}

#[async_trait]
impl HistoryStore for PostgresStore {
    async fn has_snapshot(&self, symbol: &str, sequence_id: i64) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM order_book WHERE symbol = $1 AND sequence_id = $2
            ) AS found
            "#,
        )
        .bind(symbol)
        .bind(sequence_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("found")?)
    }

    async fn insert_snapshot(&self, samples: &[OrderBookSample]) -> Result<SnapshotWrite> {
        let (symbol, sequence_id) = snapshot_key(samples)?;

        let mut tx = self.pool.begin().await?;

        // Serialize writers of the same symbol until commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(symbol)
            .execute(&mut *tx)
            .await?;

        let exists: bool = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM order_book WHERE symbol = $1 AND sequence_id = $2)",
        )
        .bind(symbol)
        .bind(sequence_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get(0)?;

        if exists {
            tx.rollback().await?;
            return Ok(SnapshotWrite::Duplicate);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO order_book (sequence_id, symbol, side, price, quantity, captured_at) ",
        );
        builder.push_values(samples, |mut row, sample| {
            row.push_bind(sample.sequence_id)
                .push_bind(sample.symbol.clone())
                .push_bind(sample.side.as_str())
                .push_bind(sample.price)
                .push_bind(sample.quantity)
                .push_bind(sample.captured_at);
        });
        builder.build().execute(&mut *tx).await?;

        tx.commit().await?;

        tracing::debug!(
            "Saved {} order-book rows for {} #{} to Postgres",
            samples.len(),
            symbol,
            sequence_id
        );

        Ok(SnapshotWrite::Inserted(samples.len()))
    }

    async fn latest_bid(&self, symbol: &str) -> Result<Option<OrderBookSample>> {
        let row = sqlx::query(
            r#"
            SELECT sequence_id, symbol, side, price, quantity, captured_at
            FROM order_book
            WHERE symbol = $1 AND side = 'Bid'
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::sample_from_row).transpose()
    }

    async fn save_candles(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO klines (symbol, open_time, close_time, close_price) ");
        builder.push_values(candles, |mut row, candle| {
            row.push_bind(candle.symbol.clone())
                .push_bind(candle.open_time)
                .push_bind(candle.close_time)
                .push_bind(candle.close);
        });
        builder.push(
            r#"
            ON CONFLICT (symbol, open_time) DO UPDATE SET
                close_time = EXCLUDED.close_time,
                close_price = EXCLUDED.close_price,
                updated_at = NOW()
            "#,
        );

        let result = builder.build().execute(&self.pool).await?;

        Ok(result.rows_affected() as usize)
    }

    async fn recent_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, open_time, close_time, close_price
            FROM klines
            WHERE symbol = $1
            ORDER BY open_time DESC
            LIMIT $2
            "#,
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            candles.push(Candle {
                symbol: row.try_get("symbol")?,
                open_time: row.try_get("open_time")?,
                close_time: row.try_get("close_time")?,
                close: row.try_get("close_price")?,
            });
        }

        Ok(candles)
    }

    async fn load_active_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, roi, balance_base, balance_quote, initial_balance,
                   created_at, force_quit, quit_protect, client_order_id, order_id
            FROM projects
            WHERE is_closed = FALSE
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let projects = rows
            .iter()
            .map(Self::project_from_row)
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Loaded {} active projects from Postgres", projects.len());

        Ok(projects)
    }

    async fn update_project_roi(&self, project: &Project) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET roi = $1, balance_base = $2, balance_quote = $3
            WHERE id = $4
            "#,
        )
        .bind(project.roi)
        .bind(project.balance_base)
        .bind(project.balance_quote)
        .bind(project.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Store(format!("Project {} not found in projects", project.id)));
        }

        Ok(())
    }

    async fn close_project(&self, project_id: i64, closed_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET is_closed = TRUE, closed_at = $2
            WHERE id = $1
            "#,
        )
        .bind(project_id)
        .bind(closed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Store(format!("Project {} not found in projects", project_id)));
        }

        tracing::debug!("Closed project {} in Postgres", project_id);

        Ok(())
    }
}

#[async_trait]
impl OrderLedger for PostgresStore {
    async fn sum_filled_orders(&self, project_id: i64, side: OrderSide) -> Result<FilledTotals> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(executed_qty), 0) AS total_qty,
                   COALESCE(SUM(executed_qty * price), 0) AS total_quote
            FROM order_list
            WHERE project_id = $1 AND side = $2 AND status = 'FILLED' AND is_done = TRUE
            "#,
        )
        .bind(project_id)
        .bind(side.as_str())
        .fetch_one(&self.pool)
        .await?;

        let quantity: Decimal = row.try_get("total_qty")?;
        let quote_amount: Decimal = row.try_get("total_quote")?;

        Ok(FilledTotals {
            quantity,
            quote_amount,
        })
    }
}
