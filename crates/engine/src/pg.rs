use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use orderalert_common::error::AppError;
use orderalert_common::types::{
    DeliveryReceipt, Message, MessageStatus, RawEvent, ReceiptStatus, Shop, ShopSettings,
    Template,
};

use crate::store::{
    MessageStore, NewMessage, RawEventStore, ShopStore, StatusUpdate, TemplateStore,
};

const MESSAGE_COLUMNS: &str = "id, job_id, shop_id, to_phone, template_key, body_text, variables, \
     status, attempts, provider_message_id, error, resend_of, created_at, sent_at, \
     delivered_at, read_at, failed_at";

/// Postgres implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ShopStore for PgStore {
    async fn find_by_domain(&self, domain: &str) -> Result<Option<Shop>, AppError> {
        let shop = sqlx::query_as::<_, Shop>(
            "SELECT id, domain, timezone, created_at FROM shops WHERE domain = $1",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(shop)
    }

    async fn settings(&self, shop_id: Uuid) -> Result<Option<ShopSettings>, AppError> {
        let settings = sqlx::query_as::<_, ShopSettings>(
            r#"
            SELECT shop_id, confirm_delay_minutes, business_hours_start,
                   business_hours_end, opt_out_keywords
            FROM shop_settings
            WHERE shop_id = $1
            "#,
        )
        .bind(shop_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(settings)
    }

    async fn is_opted_out(&self, shop_id: Uuid, phone: &str) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM opt_outs WHERE shop_id = $1 AND phone = $2)",
        )
        .bind(shop_id)
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn record_opt_out(
        &self,
        shop_id: Uuid,
        phone: &str,
        keyword: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO opt_outs (shop_id, phone, keyword)
            VALUES ($1, $2, $3)
            ON CONFLICT (shop_id, phone) DO NOTHING
            "#,
        )
        .bind(shop_id)
        .bind(phone)
        .bind(keyword)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl TemplateStore for PgStore {
    async fn find_template(&self, key: &str, shop_id: Uuid) -> Result<Option<Template>, AppError> {
        // Shop row sorts before the NULL (global default) row
        let template = sqlx::query_as::<_, Template>(
            r#"
            SELECT id, shop_id, key, locale, body, variables, active
            FROM templates
            WHERE key = $1 AND (shop_id = $2 OR shop_id IS NULL)
            ORDER BY shop_id NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(key)
        .bind(shop_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(template)
    }
}

#[async_trait]
impl RawEventStore for PgStore {
    async fn insert_raw_event(&self, event: &RawEvent) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO raw_events (id, shop_id, topic, webhook_id, signature, payload, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (webhook_id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.shop_id)
        .bind(&event.topic)
        .bind(&event.webhook_id)
        .bind(&event.signature)
        .bind(&event.payload)
        .bind(event.received_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_raw_event(&self, webhook_id: &str) -> Result<Option<RawEvent>, AppError> {
        let event = sqlx::query_as::<_, RawEvent>(
            r#"
            SELECT id, shop_id, topic, webhook_id, signature, payload, received_at
            FROM raw_events
            WHERE webhook_id = $1
            "#,
        )
        .bind(webhook_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn find_message(&self, id: Uuid) -> Result<Option<Message>, AppError> {
        let sql = format!("SELECT {} FROM messages WHERE id = $1", MESSAGE_COLUMNS);
        let message = sqlx::query_as::<_, Message>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<Message>, AppError> {
        let sql = format!("SELECT {} FROM messages WHERE job_id = $1", MESSAGE_COLUMNS);
        let message = sqlx::query_as::<_, Message>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, AppError> {
        let sql = format!(
            "SELECT {} FROM messages WHERE provider_message_id = $1",
            MESSAGE_COLUMNS
        );
        let message = sqlx::query_as::<_, Message>(&sql)
            .bind(provider_message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn create_sending(&self, new: &NewMessage) -> Result<Option<Message>, AppError> {
        let sql = format!(
            r#"
            INSERT INTO messages (id, job_id, shop_id, to_phone, template_key, body_text,
                                  variables, status, attempts, resend_of, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, $9, NOW())
            ON CONFLICT (job_id) DO NOTHING
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        );
        let message = sqlx::query_as::<_, Message>(&sql)
            .bind(new.id)
            .bind(&new.job_id)
            .bind(new.shop_id)
            .bind(&new.to_phone)
            .bind(&new.template_key)
            .bind(&new.body_text)
            .bind(&new.variables)
            .bind(MessageStatus::Sending)
            .bind(new.resend_of)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        update: &StatusUpdate,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET
                status = $3,
                provider_message_id = COALESCE($4, provider_message_id),
                error = COALESCE($5, error),
                attempts = attempts + $6,
                sent_at = CASE WHEN $3 = 'sent' THEN $7 ELSE sent_at END,
                delivered_at = CASE WHEN $3 = 'delivered' THEN $7 ELSE delivered_at END,
                read_at = CASE WHEN $3 = 'read' THEN $7 ELSE read_at END,
                failed_at = CASE WHEN $3 = 'failed' THEN $7 ELSE failed_at END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(update.status)
        .bind(&update.provider_message_id)
        .bind(&update.error)
        .bind(if update.new_attempt { 1i32 } else { 0i32 })
        .bind(update.at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_receipt(
        &self,
        message_id: Uuid,
        receipt: &DeliveryReceipt,
        applied: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO message_receipts (message_id, status, error, applied, received_at)
            VALUES ($1, $2, $3, $4, COALESCE($5, NOW()))
            "#,
        )
        .bind(message_id)
        .bind(receipt.status.to_string())
        .bind(&receipt.error)
        .bind(applied)
        .bind(receipt.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn park_receipt(&self, receipt: &DeliveryReceipt) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO parked_receipts (provider_message_id, status, error, occurred_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&receipt.provider_message_id)
        .bind(receipt.status)
        .bind(&receipt.error)
        .bind(receipt.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_parked_receipts(
        &self,
        provider_message_id: &str,
    ) -> Result<Vec<DeliveryReceipt>, AppError> {
        let mut rows: Vec<(i64, ReceiptStatus, Option<String>, Option<DateTime<Utc>>)> =
            sqlx::query_as(
                r#"
                DELETE FROM parked_receipts
                WHERE provider_message_id = $1
                RETURNING id, status, error, occurred_at
                "#,
            )
            .bind(provider_message_id)
            .fetch_all(&self.pool)
            .await?;
        rows.sort_by_key(|(id, ..)| *id);

        Ok(rows
            .into_iter()
            .map(|(_, status, error, occurred_at)| DeliveryReceipt {
                provider_message_id: provider_message_id.to_string(),
                status,
                error,
                occurred_at,
            })
            .collect())
    }

    async fn latest_shop_for_phone(&self, phone: &str) -> Result<Option<Uuid>, AppError> {
        let shop_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT shop_id FROM messages
            WHERE to_phone = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(shop_id)
    }

    async fn list_failed(&self, shop_id: Option<Uuid>, limit: i64) -> Result<Vec<Message>, AppError> {
        let sql = format!(
            r#"
            SELECT {} FROM messages
            WHERE status = 'failed' AND ($1::uuid IS NULL OR shop_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            MESSAGE_COLUMNS
        );
        let messages = sqlx::query_as::<_, Message>(&sql)
            .bind(shop_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(messages)
    }
}
