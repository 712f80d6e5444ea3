//! SQLite persistence
//!
//! Durable record of orders, fills, positions, and portfolio
//! snapshots. Orders and positions are upserts; fills and snapshots
//! are append-only. Decimals are stored as TEXT at fixed scale,
//! timestamps as RFC 3339.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::models::{Fill, OrderRequest, OrderStatus, OrderType, PortfolioSnapshot, Position, Side};

/// A persisted fill row. The row id is assigned by the database.
#[derive(Debug, Clone, Serialize)]
pub struct FillRow {
    pub id: i64,
    pub order_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    pub filled_at: DateTime<Utc>,
}

pub struct Storage {
    conn: Mutex<rusqlite::Connection>,
}

impl Storage {
    /// Open (or create) the database at `db_path`.
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = rusqlite::Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.create_tables().await?;

        info!(path = %db_path, "database initialized");
        Ok(storage)
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.create_tables().await?;
        Ok(storage)
    }

    async fn create_tables(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                order_type TEXT NOT NULL,
                limit_price TEXT,
                strategy_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price TEXT NOT NULL,
                filled_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                quantity INTEGER NOT NULL,
                avg_entry_price TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS portfolio_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                total_equity TEXT NOT NULL,
                total_unrealized_pnl TEXT NOT NULL,
                total_realized_pnl TEXT NOT NULL,
                snapshot_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_fills_order_id ON fills(order_id);
            CREATE INDEX IF NOT EXISTS idx_fills_symbol ON fills(symbol);
            CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol);
            CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
            CREATE INDEX IF NOT EXISTS idx_snapshots_at ON portfolio_snapshots(snapshot_at);
            "#,
        )?;

        Ok(())
    }

    pub async fn upsert_order(&self, order: &OrderRequest) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;

        // Terminal statuses never transition out, even when writes
        // arrive out of order.
        conn.execute(
            r#"
            INSERT INTO orders
            (id, symbol, side, quantity, order_type, limit_price, strategy_id, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET status = excluded.status
            WHERE orders.status NOT IN ('filled', 'cancelled', 'rejected')
            "#,
            rusqlite::params![
                order.id.to_string(),
                order.symbol,
                order.side.to_string(),
                order.quantity,
                order.order_type.to_string(),
                order.limit_price.map(|p| p.to_string()),
                order.strategy_id,
                order.status.to_string(),
                order.created_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE orders SET status = ?1 WHERE id = ?2
             AND status NOT IN ('filled', 'cancelled', 'rejected')",
            rusqlite::params![status.to_string(), order_id.to_string()],
        )?;
        Ok(())
    }

    pub async fn insert_fill(&self, fill: &Fill) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            INSERT INTO fills (order_id, symbol, side, quantity, price, filled_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            rusqlite::params![
                fill.order_id.to_string(),
                fill.symbol,
                fill.side.to_string(),
                fill.quantity,
                fill.price.to_string(),
                fill.filled_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub async fn upsert_position(&self, position: &Position) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO positions
            (symbol, quantity, avg_entry_price, realized_pnl, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            rusqlite::params![
                position.symbol,
                position.quantity,
                position.avg_entry_price.to_string(),
                position.realized_pnl.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub async fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            INSERT INTO portfolio_snapshots
            (total_equity, total_unrealized_pnl, total_realized_pnl, snapshot_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            rusqlite::params![
                snapshot.total_equity.to_string(),
                snapshot.total_unrealized_pnl.to_string(),
                snapshot.total_realized_pnl.to_string(),
                snapshot.snapshot_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub async fn get_orders(&self) -> anyhow::Result<Vec<OrderRequest>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            "SELECT id, symbol, side, quantity, order_type, limit_price, strategy_id, status, created_at
             FROM orders ORDER BY created_at DESC",
        )?;
        let orders = stmt
            .query_map([], Self::row_to_order)?
            .filter_map(Result::ok)
            .collect();

        Ok(orders)
    }

    pub async fn get_fills_for_order(&self, order_id: Uuid) -> anyhow::Result<Vec<FillRow>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            "SELECT id, order_id, symbol, side, quantity, price, filled_at
             FROM fills WHERE order_id = ?1 ORDER BY filled_at",
        )?;
        let fills = stmt
            .query_map([order_id.to_string()], Self::row_to_fill)?
            .filter_map(Result::ok)
            .collect();

        Ok(fills)
    }

    pub async fn get_positions(&self) -> anyhow::Result<Vec<Position>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            "SELECT symbol, quantity, avg_entry_price, realized_pnl FROM positions",
        )?;
        let positions = stmt
            .query_map([], |row| {
                let mut position = Position::flat(row.get::<_, String>(0)?);
                position.quantity = row.get(1)?;
                position.avg_entry_price =
                    Decimal::from_str(&row.get::<_, String>(2)?).unwrap_or_default();
                position.realized_pnl =
                    Decimal::from_str(&row.get::<_, String>(3)?).unwrap_or_default();
                Ok(position)
            })?
            .filter_map(Result::ok)
            .collect();

        Ok(positions)
    }

    pub async fn get_snapshots(&self, limit: usize) -> anyhow::Result<Vec<PortfolioSnapshot>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            "SELECT total_equity, total_unrealized_pnl, total_realized_pnl, snapshot_at
             FROM portfolio_snapshots ORDER BY snapshot_at DESC LIMIT ?1",
        )?;
        let snapshots = stmt
            .query_map([limit], |row| {
                Ok(PortfolioSnapshot {
                    cash: Decimal::ZERO,
                    total_equity: Decimal::from_str(&row.get::<_, String>(0)?)
                        .unwrap_or_default(),
                    total_unrealized_pnl: Decimal::from_str(&row.get::<_, String>(1)?)
                        .unwrap_or_default(),
                    total_realized_pnl: Decimal::from_str(&row.get::<_, String>(2)?)
                        .unwrap_or_default(),
                    drawdown_pct: Decimal::ZERO,
                    snapshot_at: parse_timestamp(&row.get::<_, String>(3)?),
                })
            })?
            .filter_map(Result::ok)
            .collect();

        Ok(snapshots)
    }

    fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<OrderRequest> {
        Ok(OrderRequest {
            id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
            symbol: row.get(1)?,
            side: row
                .get::<_, String>(2)?
                .parse::<Side>()
                .unwrap_or(Side::Buy),
            quantity: row.get(3)?,
            order_type: row
                .get::<_, String>(4)?
                .parse::<OrderType>()
                .unwrap_or(OrderType::Market),
            limit_price: row
                .get::<_, Option<String>>(5)?
                .and_then(|s| Decimal::from_str(&s).ok()),
            strategy_id: row.get(6)?,
            status: row
                .get::<_, String>(7)?
                .parse::<OrderStatus>()
                .unwrap_or(OrderStatus::Pending),
            created_at: parse_timestamp(&row.get::<_, String>(8)?),
        })
    }

    fn row_to_fill(row: &rusqlite::Row) -> rusqlite::Result<FillRow> {
        Ok(FillRow {
            id: row.get(0)?,
            order_id: Uuid::parse_str(&row.get::<_, String>(1)?).unwrap_or_default(),
            symbol: row.get(2)?,
            side: row
                .get::<_, String>(3)?
                .parse::<Side>()
                .unwrap_or(Side::Buy),
            quantity: row.get(4)?,
            price: Decimal::from_str(&row.get::<_, String>(5)?).unwrap_or_default(),
            filled_at: parse_timestamp(&row.get::<_, String>(6)?),
        })
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
