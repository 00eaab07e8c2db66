//! PostgreSQL ledger store.
//!
//! Every `lock_*` method issues `SELECT ... FOR UPDATE`, so the row stays
//! locked until the surrounding transaction commits or rolls back. Storage
//! constraint failures (CHECK, append-only trigger) surface as
//! [`LedgerError::Integrity`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{LedgerStore, LedgerTx};
use crate::ledger::{
    Earnings, EntryType, GiftEarnings, HistoryQuery, LedgerEntry, LedgerError, LedgerResult,
    Metadata, NewLedgerEntry, Page, Reference, UserId, Wallet, WalletId,
};
use crate::payments::{IntentStatus, PaymentIntent};

const WALLET_COLUMNS: &str = "id, user_id, balance, currency, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, wallet_id, entry_type, amount, balance_after, reference_type, \
     reference_id, description, metadata, created_at";

const INTENT_COLUMNS: &str = "id, user_id, provider, provider_order_id, provider_transaction_id, \
     session_url, package_id, amount_minor, credits_amount, currency, status, idempotency_key, \
     webhook_received_at, metadata, created_at, updated_at";

/// SQLSTATE classes treated as integrity violations
const INTEGRITY_CODES: [&str; 3] = [
    "23000", // integrity_constraint_violation (append-only trigger)
    "23514", // check_violation
    "23505", // unique_violation
];

/// Map a sqlx error, promoting constraint failures to integrity errors
fn map_db_error(e: sqlx::Error) -> LedgerError {
    if let Some(db) = e.as_database_error() {
        if db
            .code()
            .as_deref()
            .is_some_and(|code| INTEGRITY_CODES.contains(&code))
        {
            return LedgerError::Integrity(db.message().to_string());
        }
    }
    LedgerError::Database(e)
}

fn wallet_from_row(row: &PgRow) -> LedgerResult<Wallet> {
    Ok(Wallet {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        balance: row.try_get("balance")?,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> LedgerResult<LedgerEntry> {
    let entry_type: String = row.try_get("entry_type")?;
    let reference_type: Option<String> = row.try_get("reference_type")?;
    let reference_id: Option<String> = row.try_get("reference_id")?;
    let metadata: Json<Metadata> = row.try_get("metadata")?;

    Ok(LedgerEntry {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        entry_type: entry_type.parse().map_err(LedgerError::Integrity)?,
        amount: row.try_get("amount")?,
        balance_after: row.try_get("balance_after")?,
        reference: Reference::from_parts(reference_type.as_deref(), reference_id.as_deref())
            .map_err(LedgerError::Integrity)?,
        description: row.try_get("description")?,
        metadata: metadata.0,
        created_at: row.try_get("created_at")?,
    })
}

fn intent_from_row(row: &PgRow) -> LedgerResult<PaymentIntent> {
    let status: String = row.try_get("status")?;
    let metadata: Json<Metadata> = row.try_get("metadata")?;

    Ok(PaymentIntent {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        provider: row.try_get("provider")?,
        provider_order_id: row.try_get("provider_order_id")?,
        provider_transaction_id: row.try_get("provider_transaction_id")?,
        session_url: row.try_get("session_url")?,
        package_id: row.try_get("package_id")?,
        amount_minor: row.try_get("amount_minor")?,
        credits_amount: row.try_get("credits_amount")?,
        currency: row.try_get("currency")?,
        status: status
            .parse::<IntentStatus>()
            .map_err(LedgerError::Integrity)?,
        idempotency_key: row.try_get("idempotency_key")?,
        webhook_received_at: row.try_get("webhook_received_at")?,
        metadata: metadata.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// PostgreSQL-backed [`LedgerStore`]
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Transaction over a [`PgLedgerStore`]
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

impl PgLedgerTx {
    async fn lock_intent_where(
        &mut self,
        column: &str,
        value: &str,
    ) -> LedgerResult<Option<PaymentIntent>> {
        let sql = format!("SELECT {INTENT_COLUMNS} FROM payment_intents WHERE {column} = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        row.as_ref().map(intent_from_row).transpose()
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn ensure_wallet(
        &mut self,
        user_id: UserId,
        currency: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<WalletId> {
        // Blocks on a concurrent insert of the same user until that transaction ends
        sqlx::query(
            "INSERT INTO wallets (user_id, balance, currency, created_at, updated_at)
             VALUES ($1, 0, $2, $3, $3)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(currency)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        let row = sqlx::query("SELECT id FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        Ok(row.try_get("id")?)
    }

    async fn lock_wallet(&mut self, wallet_id: WalletId) -> LedgerResult<Wallet> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(wallet_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| LedgerError::Integrity(format!("wallet {wallet_id} does not exist")))?;

        wallet_from_row(&row)
    }

    async fn update_balance(
        &mut self,
        wallet_id: WalletId,
        balance: i64,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        sqlx::query("UPDATE wallets SET balance = $1, updated_at = $2 WHERE id = $3")
            .bind(balance)
            .bind(now)
            .bind(wallet_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn insert_entry(&mut self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        let (reference_type, reference_id) = match entry.reference.as_ref().map(Reference::to_parts)
        {
            Some((kind, id)) => (Some(kind), Some(id)),
            None => (None, None),
        };

        let row = sqlx::query(
            r#"
            INSERT INTO ledger_entries
                (wallet_id, entry_type, amount, balance_after, reference_type, reference_id,
                 description, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(entry.wallet_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(reference_type)
        .bind(reference_id)
        .bind(entry.description.as_deref())
        .bind(Json(&entry.metadata))
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        Ok(LedgerEntry {
            id: row.try_get("id")?,
            wallet_id: entry.wallet_id,
            entry_type: entry.entry_type,
            amount: entry.amount,
            balance_after: entry.balance_after,
            reference: entry.reference,
            description: entry.description,
            metadata: entry.metadata,
            created_at: entry.created_at,
        })
    }

    async fn insert_intent_if_absent(
        &mut self,
        intent: &PaymentIntent,
    ) -> LedgerResult<PaymentIntent> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents
                (id, user_id, provider, provider_order_id, provider_transaction_id, session_url,
                 package_id, amount_minor, credits_amount, currency, status, idempotency_key,
                 webhook_received_at, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(intent.id)
        .bind(intent.user_id)
        .bind(&intent.provider)
        .bind(intent.provider_order_id.as_deref())
        .bind(intent.provider_transaction_id.as_deref())
        .bind(intent.session_url.as_deref())
        .bind(&intent.package_id)
        .bind(intent.amount_minor)
        .bind(intent.credits_amount)
        .bind(&intent.currency)
        .bind(intent.status.as_str())
        .bind(&intent.idempotency_key)
        .bind(intent.webhook_received_at)
        .bind(Json(&intent.metadata))
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        self.lock_intent_by_key(&intent.idempotency_key)
            .await?
            .ok_or_else(|| {
                LedgerError::Integrity(format!(
                    "payment intent with key {} vanished after insert",
                    intent.idempotency_key
                ))
            })
    }

    async fn lock_intent(&mut self, id: Uuid) -> LedgerResult<Option<PaymentIntent>> {
        let sql = format!("SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        row.as_ref().map(intent_from_row).transpose()
    }

    async fn lock_intent_by_key(&mut self, key: &str) -> LedgerResult<Option<PaymentIntent>> {
        self.lock_intent_where("idempotency_key", key).await
    }

    async fn lock_intent_by_order(
        &mut self,
        order_id: &str,
    ) -> LedgerResult<Option<PaymentIntent>> {
        self.lock_intent_where("provider_order_id", order_id).await
    }

    async fn update_intent(&mut self, intent: &PaymentIntent) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payment_intents
            SET provider_order_id = $1,
                provider_transaction_id = $2,
                session_url = $3,
                status = $4,
                webhook_received_at = $5,
                metadata = $6,
                updated_at = $7
            WHERE id = $8
            "#,
        )
        .bind(intent.provider_order_id.as_deref())
        .bind(intent.provider_transaction_id.as_deref())
        .bind(intent.session_url.as_deref())
        .bind(intent.status.as_str())
        .bind(intent.webhook_received_at)
        .bind(Json(&intent.metadata))
        .bind(intent.updated_at)
        .bind(intent.id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::Integrity(format!(
                "payment intent {} does not exist",
                intent.id
            )));
        }
        Ok(())
    }

    async fn commit(self) -> LedgerResult<()> {
        self.tx.commit().await.map_err(map_db_error)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> LedgerResult<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PgLedgerTx { tx })
    }

    async fn health_check(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_wallet(&self, user_id: UserId) -> LedgerResult<Option<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1");
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn list_entries(
        &self,
        wallet_id: WalletId,
        query: &HistoryQuery,
    ) -> LedgerResult<Page<LedgerEntry>> {
        let (page, per_page) = query.normalized();
        let entry_type = query.entry_type.map(|t| t.as_str());

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM ledger_entries
             WHERE wallet_id = $1 AND ($2::TEXT IS NULL OR entry_type = $2)",
        )
        .bind(wallet_id)
        .bind(entry_type)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE wallet_id = $1 AND ($2::TEXT IS NULL OR entry_type = $2)
             ORDER BY id DESC
             LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&sql)
            .bind(wallet_id)
            .bind(entry_type)
            .bind(i64::from(per_page))
            .bind(query.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: rows.iter().map(entry_from_row).collect::<LedgerResult<_>>()?,
            total,
            page,
            per_page,
        })
    }

    async fn entry_chain(&self, wallet_id: WalletId) -> LedgerResult<Vec<LedgerEntry>> {
        let sql =
            format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE wallet_id = $1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(wallet_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn earnings(
        &self,
        wallet_id: WalletId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> LedgerResult<Earnings> {
        let rows = sqlx::query(
            r#"
            SELECT COALESCE(metadata->>'gift_id', 'transfer') AS gift_id,
                   MAX(metadata->>'gift_name') AS gift_name,
                   SUM(amount)::BIGINT AS credits,
                   COUNT(*) AS count
            FROM ledger_entries
            WHERE wallet_id = $1
              AND entry_type = $2
              AND ($3::TIMESTAMPTZ IS NULL OR created_at >= $3)
              AND ($4::TIMESTAMPTZ IS NULL OR created_at <= $4)
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(wallet_id)
        .bind(EntryType::GiftReceived.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut earnings = Earnings::default();
        for row in rows {
            let gift = GiftEarnings {
                gift_id: row.try_get("gift_id")?,
                gift_name: row.try_get("gift_name")?,
                credits: row.try_get("credits")?,
                count: row.try_get("count")?,
            };
            earnings.total_credits += gift.credits;
            earnings.gift_count += gift.count;
            earnings.by_gift.push(gift);
        }
        Ok(earnings)
    }

    async fn find_intent(&self, id: Uuid) -> LedgerResult<Option<PaymentIntent>> {
        let sql = format!("SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        row.as_ref().map(intent_from_row).transpose()
    }

    async fn list_intents(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<PaymentIntent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(intent_from_row).collect()
    }
}
