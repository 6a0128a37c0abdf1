//! Customer and payment method repository

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CreatePaymentMethodRequest, Customer, CustomerInput, PaymentMethod};
use crate::{Error, Result};

const CUSTOMER_COLUMNS: &str = r#"
    id, external_reference, email, first_name, last_name, phone,
    billing_address, processor_profile_id, active, created_at, updated_at
"#;

const PAYMENT_METHOD_COLUMNS: &str = r#"
    id, customer_id, method_type, token, brand, last_four,
    expiry_month, expiry_year, is_default, active, created_at, updated_at
"#;

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Customer>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>>;

    async fn create(&self, input: &CustomerInput) -> Result<Customer>;

    /// Record the processor profile id. The column is written once; a second
    /// write is a no-op because the id is immutable after creation.
    async fn set_processor_profile(&self, id: Uuid, profile_id: &str) -> Result<()>;

    async fn find_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>>;

    async fn create_payment_method(&self, request: &CreatePaymentMethodRequest) -> Result<PaymentMethod>;

    async fn list_payment_methods(&self, customer_id: Uuid) -> Result<Vec<PaymentMethod>>;
}

#[derive(Clone)]
pub struct PostgresCustomerRepository {
    pool: PgPool,
}

impl PostgresCustomerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerRepository for PostgresCustomerRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Customer>> {
        let query = format!("SELECT {} FROM customers WHERE id = $1", CUSTOMER_COLUMNS);
        Ok(sqlx::query_as::<_, Customer>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>> {
        let query = format!(
            "SELECT {} FROM customers WHERE LOWER(email) = LOWER($1)",
            CUSTOMER_COLUMNS
        );
        Ok(sqlx::query_as::<_, Customer>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create(&self, input: &CustomerInput) -> Result<Customer> {
        let query = format!(
            r#"
            INSERT INTO customers (
                id, external_reference, email, first_name, last_name,
                phone, billing_address, active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, NOW(), NOW())
            RETURNING {}
            "#,
            CUSTOMER_COLUMNS
        );

        let customer = sqlx::query_as::<_, Customer>(&query)
            .bind(Uuid::new_v4())
            .bind(&input.external_reference)
            .bind(&input.email)
            .bind(&input.first_name)
            .bind(&input.last_name)
            .bind(&input.phone)
            .bind(input.billing_address.clone().map(sqlx::types::Json))
            .fetch_one(&self.pool)
            .await?;

        Ok(customer)
    }

    async fn set_processor_profile(&self, id: Uuid, profile_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE customers
            SET processor_profile_id = $2, updated_at = NOW()
            WHERE id = $1 AND processor_profile_id IS NULL
            "#,
        )
        .bind(id)
        .bind(profile_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>> {
        let query = format!(
            "SELECT {} FROM payment_methods WHERE id = $1",
            PAYMENT_METHOD_COLUMNS
        );
        Ok(sqlx::query_as::<_, PaymentMethod>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_payment_method(&self, request: &CreatePaymentMethodRequest) -> Result<PaymentMethod> {
        if self.find_by_id(request.customer_id).await?.is_none() {
            return Err(Error::not_found(format!("customer {}", request.customer_id)));
        }

        let query = format!(
            r#"
            INSERT INTO payment_methods (
                id, customer_id, method_type, token, brand, last_four,
                expiry_month, expiry_year, is_default, active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE, NOW(), NOW())
            RETURNING {}
            "#,
            PAYMENT_METHOD_COLUMNS
        );

        let method = sqlx::query_as::<_, PaymentMethod>(&query)
            .bind(Uuid::new_v4())
            .bind(request.customer_id)
            .bind(request.method_type)
            .bind(&request.token)
            .bind(&request.brand)
            .bind(&request.last_four)
            .bind(request.expiry_month)
            .bind(request.expiry_year)
            .bind(request.is_default)
            .fetch_one(&self.pool)
            .await?;

        Ok(method)
    }

    async fn list_payment_methods(&self, customer_id: Uuid) -> Result<Vec<PaymentMethod>> {
        let query = format!(
            "SELECT {} FROM payment_methods WHERE customer_id = $1 AND active ORDER BY created_at",
            PAYMENT_METHOD_COLUMNS
        );
        Ok(sqlx::query_as::<_, PaymentMethod>(&query)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?)
    }
}
