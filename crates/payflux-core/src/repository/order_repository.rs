//! Order repository with transaction-derived payment totals

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Currency, Order, OrderPaymentSummary};
use crate::{Error, Result};

const ORDER_COLUMNS: &str = r#"
    id, customer_id, subtotal, tax, shipping, discount, currency,
    created_at, updated_at
"#;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create(
        &self,
        customer_id: Uuid,
        subtotal: Decimal,
        tax: Decimal,
        shipping: Decimal,
        discount: Decimal,
        currency: Currency,
    ) -> Result<Order>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>>;

    /// Paid/refunded/outstanding amounts aggregated from the order's
    /// settled transactions
    async fn payment_summary(&self, order_id: Uuid) -> Result<OrderPaymentSummary>;
}

#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn create(
        &self,
        customer_id: Uuid,
        subtotal: Decimal,
        tax: Decimal,
        shipping: Decimal,
        discount: Decimal,
        currency: Currency,
    ) -> Result<Order> {
        let query = format!(
            r#"
            INSERT INTO orders (
                id, customer_id, subtotal, tax, shipping, discount, currency,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );

        Ok(sqlx::query_as::<_, Order>(&query)
            .bind(Uuid::new_v4())
            .bind(customer_id)
            .bind(subtotal)
            .bind(tax)
            .bind(shipping)
            .bind(discount)
            .bind(currency)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        let query = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        Ok(sqlx::query_as::<_, Order>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn payment_summary(&self, order_id: Uuid) -> Result<OrderPaymentSummary> {
        let order = self
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("order {}", order_id)))?;

        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (
                    WHERE transaction_type IN ('purchase', 'capture')
                      AND status IN ('captured', 'settled', 'partially_refunded', 'refunded')
                ), 0) AS paid,
                COALESCE(SUM(amount) FILTER (
                    WHERE transaction_type IN ('refund', 'partial_refund')
                      AND status = 'settled'
                ), 0) AS refunded
            FROM transactions
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await?;

        let paid: Decimal = row.try_get("paid")?;
        let refunded: Decimal = row.try_get("refunded")?;

        Ok(OrderPaymentSummary::from_amounts(order.total(), paid, refunded))
    }
}
