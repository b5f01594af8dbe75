use super::{PositionStore, SignalSource};
use crate::config::redact_url;
use crate::error::StoreError;
use crate::models::{
    Direction, LegFill, OrderId, Position, PositionStatus, Side, Signal, TradeType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

const POSITION_COLUMNS: &str = r#"
    transaction_id, order_id, sell_order_id, symbol, side, status, trade_type, amount,
    buy_price, sell_price, current_price,
    buy_orig_qty, buy_executed_qty, buy_cumulative_quote_qty, buy_actual_qty,
    sell_orig_qty, sell_executed_qty, sell_cumulative_quote_qty, sell_actual_qty,
    sold_qty, sold_quote_qty,
    unrealized_profit, realized_profit, update_time, expired, created_at
"#;

/// Postgres persistence for positions and the prediction feed
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Connect to Postgres and run pending migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", redact_url(database_url));

        Ok(Self { pool })
    }

    /// Insert or refresh one prediction row per symbol
    pub async fn upsert_signals(&self, signals: &[Signal]) -> Result<usize, StoreError> {
        for signal in signals {
            sqlx::query(
                r#"
                INSERT INTO predictions (
                    symbol, direction, trade_time, elapsed_minutes, entry_price, target_price,
                    current_price, price_spread, amount, current_profit, daily_profit,
                    monthly_profit, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
                ON CONFLICT (symbol) DO UPDATE SET
                    direction = EXCLUDED.direction,
                    trade_time = EXCLUDED.trade_time,
                    elapsed_minutes = EXCLUDED.elapsed_minutes,
                    entry_price = EXCLUDED.entry_price,
                    target_price = EXCLUDED.target_price,
                    current_price = EXCLUDED.current_price,
                    price_spread = EXCLUDED.price_spread,
                    amount = EXCLUDED.amount,
                    current_profit = EXCLUDED.current_profit,
                    daily_profit = EXCLUDED.daily_profit,
                    monthly_profit = EXCLUDED.monthly_profit,
                    updated_at = NOW()
                "#,
            )
            .bind(&signal.symbol)
            .bind(signal.direction.as_str())
            .bind(signal.trade_time)
            .bind(signal.elapsed_minutes)
            .bind(signal.entry_price)
            .bind(signal.target_price)
            .bind(signal.current_price)
            .bind(signal.price_spread)
            .bind(signal.amount)
            .bind(signal.current_profit)
            .bind(signal.daily_profit)
            .bind(signal.monthly_profit)
            .execute(&self.pool)
            .await?;
        }

        tracing::debug!("Upserted {} predictions", signals.len());

        Ok(signals.len())
    }

    async fn set_status(
        &self,
        transaction_id: Uuid,
        status: PositionStatus,
        expired: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = $2, expired = expired OR $3, updated_at = NOW()
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .bind(status.as_str())
        .bind(expired)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(transaction_id));
        }
        Ok(())
    }

    #[cfg(test)]
    async fn clear_all(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM positions")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM predictions")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_field<T: FromStr>(field: &'static str, value: String) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::Corrupt { field, value })
}

fn position_from_row(row: &PgRow) -> Result<Position, StoreError> {
    Ok(Position {
        transaction_id: row.try_get("transaction_id")?,
        order_id: row.try_get("order_id")?,
        sell_order_id: row.try_get("sell_order_id")?,
        symbol: row.try_get("symbol")?,
        side: parse_field::<Side>("side", row.try_get("side")?)?,
        status: parse_field::<PositionStatus>("status", row.try_get("status")?)?,
        trade_type: parse_field::<TradeType>("trade_type", row.try_get("trade_type")?)?,
        amount: row.try_get("amount")?,
        buy_price: row.try_get("buy_price")?,
        sell_price: row.try_get("sell_price")?,
        current_price: row.try_get("current_price")?,
        buy: LegFill {
            orig_qty: row.try_get("buy_orig_qty")?,
            executed_qty: row.try_get("buy_executed_qty")?,
            cumulative_quote_qty: row.try_get("buy_cumulative_quote_qty")?,
            actual_qty: row.try_get("buy_actual_qty")?,
        },
        sell: LegFill {
            orig_qty: row.try_get("sell_orig_qty")?,
            executed_qty: row.try_get("sell_executed_qty")?,
            cumulative_quote_qty: row.try_get("sell_cumulative_quote_qty")?,
            actual_qty: row.try_get("sell_actual_qty")?,
        },
        sold_qty: row.try_get("sold_qty")?,
        sold_quote_qty: row.try_get("sold_quote_qty")?,
        unrealized_profit: row.try_get("unrealized_profit")?,
        realized_profit: row.try_get("realized_profit")?,
        update_time: row.try_get("update_time")?,
        expired: row.try_get("expired")?,
        created_at: row.try_get("created_at")?,
    })
}

fn signal_from_row(row: &PgRow) -> Result<Signal, StoreError> {
    let direction: String = row.try_get("direction")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(Signal {
        symbol: row.try_get("symbol")?,
        direction: parse_field::<Direction>("direction", direction)?,
        elapsed_minutes: row.try_get("elapsed_minutes")?,
        trade_time: row.try_get("trade_time")?,
        entry_price: row.try_get::<Option<Decimal>, _>("entry_price")?,
        target_price: row.try_get("target_price")?,
        current_price: row.try_get("current_price")?,
        price_spread: row.try_get("price_spread")?,
        amount: row.try_get("amount")?,
        current_profit: row.try_get("current_profit")?,
        daily_profit: row.try_get("daily_profit")?,
        monthly_profit: row.try_get("monthly_profit")?,
        updated_at,
    })
}

#[async_trait]
impl PositionStore for PostgresPersistence {
    async fn upsert(&self, position: &Position) -> Result<Position, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                transaction_id, order_id, sell_order_id, symbol, side, status, trade_type, amount,
                buy_price, sell_price, current_price,
                buy_orig_qty, buy_executed_qty, buy_cumulative_quote_qty, buy_actual_qty,
                sell_orig_qty, sell_executed_qty, sell_cumulative_quote_qty, sell_actual_qty,
                sold_qty, sold_quote_qty,
                unrealized_profit, realized_profit, update_time, expired, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            ON CONFLICT (transaction_id) DO UPDATE SET
                order_id = EXCLUDED.order_id,
                sell_order_id = EXCLUDED.sell_order_id,
                side = EXCLUDED.side,
                status = EXCLUDED.status,
                amount = EXCLUDED.amount,
                buy_price = EXCLUDED.buy_price,
                sell_price = EXCLUDED.sell_price,
                current_price = EXCLUDED.current_price,
                buy_orig_qty = EXCLUDED.buy_orig_qty,
                buy_executed_qty = EXCLUDED.buy_executed_qty,
                buy_cumulative_quote_qty = EXCLUDED.buy_cumulative_quote_qty,
                buy_actual_qty = EXCLUDED.buy_actual_qty,
                sell_orig_qty = EXCLUDED.sell_orig_qty,
                sell_executed_qty = EXCLUDED.sell_executed_qty,
                sell_cumulative_quote_qty = EXCLUDED.sell_cumulative_quote_qty,
                sell_actual_qty = EXCLUDED.sell_actual_qty,
                sold_qty = EXCLUDED.sold_qty,
                sold_quote_qty = EXCLUDED.sold_quote_qty,
                unrealized_profit = EXCLUDED.unrealized_profit,
                realized_profit = EXCLUDED.realized_profit,
                update_time = EXCLUDED.update_time,
                expired = EXCLUDED.expired,
                updated_at = NOW()
            "#,
        )
        .bind(position.transaction_id)
        .bind(position.order_id)
        .bind(position.sell_order_id)
        .bind(&position.symbol)
        .bind(position.side.as_str())
        .bind(position.status.as_str())
        .bind(position.trade_type.as_str())
        .bind(position.amount)
        .bind(position.buy_price)
        .bind(position.sell_price)
        .bind(position.current_price)
        .bind(position.buy.orig_qty)
        .bind(position.buy.executed_qty)
        .bind(position.buy.cumulative_quote_qty)
        .bind(position.buy.actual_qty)
        .bind(position.sell.orig_qty)
        .bind(position.sell.executed_qty)
        .bind(position.sell.cumulative_quote_qty)
        .bind(position.sell.actual_qty)
        .bind(position.sold_qty)
        .bind(position.sold_quote_qty)
        .bind(position.unrealized_profit)
        .bind(position.realized_profit)
        .bind(position.update_time)
        .bind(position.expired)
        .bind(position.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Saved position {} ({}) for {} to Postgres",
            position.transaction_id,
            position.status,
            position.symbol
        );

        Ok(position.clone())
    }

    async fn find_open(
        &self,
        symbol: &str,
        trade_type: TradeType,
    ) -> Result<Option<Position>, StoreError> {
        let query = format!(
            r#"
            SELECT {}
            FROM positions
            WHERE symbol = $1 AND trade_type = $2
              AND status NOT IN ('CLOSED', 'CANCELED', 'EXPIRED')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            POSITION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(symbol)
            .bind(trade_type.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn find_by_order_id(&self, order_id: OrderId) -> Result<Option<Position>, StoreError> {
        let query = format!(
            "SELECT {} FROM positions WHERE order_id = $1 OR sell_order_id = $1 LIMIT 1",
            POSITION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn find(&self, transaction_id: Uuid) -> Result<Option<Position>, StoreError> {
        let query = format!(
            "SELECT {} FROM positions WHERE transaction_id = $1",
            POSITION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn mark_expired(&self, transaction_id: Uuid) -> Result<(), StoreError> {
        self.set_status(transaction_id, PositionStatus::Expired, true)
            .await
    }

    async fn mark_closed(&self, transaction_id: Uuid) -> Result<(), StoreError> {
        self.set_status(transaction_id, PositionStatus::Closed, false)
            .await
    }

    async fn mark_cancelled(&self, transaction_id: Uuid) -> Result<(), StoreError> {
        self.set_status(transaction_id, PositionStatus::Canceled, false)
            .await
    }

    async fn recent(&self, limit: i64) -> Result<Vec<Position>, StoreError> {
        let query = format!(
            "SELECT {} FROM positions ORDER BY created_at DESC LIMIT $1",
            POSITION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(position_from_row).collect()
    }
}

#[async_trait]
impl SignalSource for PostgresPersistence {
    async fn latest_signal(&self, symbol: &str) -> Result<Option<Signal>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT symbol, direction, trade_time, elapsed_minutes, entry_price, target_price,
                   current_price, price_spread, amount, current_profit, daily_profit,
                   monthly_profit, updated_at
            FROM predictions
            WHERE symbol = $1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(signal_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderResult, OrderStatus};
    use rust_decimal_macros::dec;

    async fn get_test_db() -> PostgresPersistence {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/spotbot_test".to_string());

        PostgresPersistence::new(&database_url)
            .await
            .expect("Failed to connect to test database")
    }

    fn test_position() -> Position {
        let order = OrderResult {
            order_id: 1001,
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            status: OrderStatus::New,
            price: dec!(20000),
            orig_qty: dec!(0.01),
            executed_qty: dec!(0),
            cumulative_quote_qty: dec!(0),
            update_time: None,
        };
        Position::opened("BTCUSDT", TradeType::Spot, dec!(0.01), dec!(20000), &order)
    }

    fn test_signal(direction: Direction) -> Signal {
        Signal {
            symbol: "btc".to_string(),
            direction,
            elapsed_minutes: Some(5),
            trade_time: None,
            entry_price: Some(dec!(20000)),
            target_price: Some(dec!(21000)),
            current_price: None,
            price_spread: None,
            amount: Some(dec!(0.01)),
            current_profit: None,
            daily_profit: None,
            monthly_profit: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_upsert_twice_keeps_one_row() {
        let db = get_test_db().await;
        db.clear_all().await.unwrap();

        let mut position = test_position();
        db.upsert(&position).await.unwrap();
        db.upsert(&position).await.unwrap();

        position.status = PositionStatus::Filled;
        position.buy.actual_qty = Some(dec!(0.0100));
        db.upsert(&position).await.unwrap();

        let recent = db.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, PositionStatus::Filled);
        assert_eq!(recent[0].buy.actual_qty, Some(dec!(0.0100)));

        db.clear_all().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_find_open_and_mark() {
        let db = get_test_db().await;
        db.clear_all().await.unwrap();

        let position = test_position();
        db.upsert(&position).await.unwrap();

        let open = db.find_open("BTCUSDT", TradeType::Spot).await.unwrap();
        assert_eq!(open.map(|p| p.transaction_id), Some(position.transaction_id));

        db.mark_expired(position.transaction_id).await.unwrap();
        assert!(db
            .find_open("BTCUSDT", TradeType::Spot)
            .await
            .unwrap()
            .is_none());

        let stored = db.find_by_order_id(1001).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Expired);
        assert!(stored.expired);

        db.clear_all().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_prediction_upsert_per_symbol() {
        let db = get_test_db().await;
        db.clear_all().await.unwrap();

        db.upsert_signals(&[test_signal(Direction::Long)])
            .await
            .unwrap();
        db.upsert_signals(&[test_signal(Direction::None)])
            .await
            .unwrap();

        let signal = db.latest_signal("btc").await.unwrap().unwrap();
        assert_eq!(signal.direction, Direction::None);
        assert_eq!(signal.elapsed_minutes, Some(5));

        db.clear_all().await.unwrap();
    }
}
