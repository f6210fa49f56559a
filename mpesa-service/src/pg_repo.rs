use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{
    Environment, InvoiceRef, MpesaPayment, MpesaSettings, PaymentEntry, PaymentStatus, PosInvoice, SalesInvoice,
    SALES_INVOICE,
};
use crate::repo::LedgerStore;

const PAYMENT_COLUMNS: &str = "name, pos_invoice, sales_invoice, amount, phone_number, status, \
     checkout_request_id, merchant_request_id, result_code, result_desc, receipt_number, \
     transaction_date, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct SettingsRow {
    consumer_key: Option<String>,
    consumer_secret: Option<String>,
    passkey: Option<String>,
    shortcode: Option<String>,
    callback_url: Option<String>,
    access_token: Option<String>,
    token_expiry: Option<DateTime<Utc>>,
    environment: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    name: String,
    pos_invoice: Option<String>,
    sales_invoice: Option<String>,
    amount: BigDecimal,
    phone_number: String,
    status: String,
    checkout_request_id: Option<String>,
    merchant_request_id: Option<String>,
    result_code: Option<String>,
    result_desc: Option<String>,
    receipt_number: Option<String>,
    transaction_date: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for MpesaPayment {
    type Error = anyhow::Error;

    fn try_from(row: PaymentRow) -> Result<Self> {
        let invoice = match (row.pos_invoice, row.sales_invoice) {
            (Some(name), None) => InvoiceRef::Pos(name),
            (None, Some(name)) => InvoiceRef::Sales(name),
            _ => return Err(anyhow!("Mpesa Payment {} must reference exactly one invoice", row.name)),
        };
        let status = PaymentStatus::parse(&row.status)
            .ok_or_else(|| anyhow!("Mpesa Payment {} has unknown status {}", row.name, row.status))?;
        Ok(MpesaPayment {
            name: row.name,
            invoice,
            amount: row.amount,
            phone_number: row.phone_number,
            status,
            checkout_request_id: row.checkout_request_id,
            merchant_request_id: row.merchant_request_id,
            result_code: row.result_code,
            result_desc: row.result_desc,
            receipt_number: row.receipt_number,
            transaction_date: row.transaction_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres adapter. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running mpesa-service migrations")?;
        Ok(())
    }

    async fn fetch_payment(&self, filter: &str, value: &str) -> Result<Option<MpesaPayment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM mpesa_payments WHERE {filter} = $1");
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(MpesaPayment::try_from).transpose()
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn settings(&self) -> Result<MpesaSettings> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"SELECT consumer_key, consumer_secret, passkey, shortcode, callback_url,
                      access_token, token_expiry, environment
               FROM mpesa_settings WHERE id = 1"#,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow!("Mpesa Settings row is missing; run migrations"))?;
        let environment = Environment::parse(&row.environment)
            .ok_or_else(|| anyhow!("unknown environment {} in Mpesa Settings", row.environment))?;
        Ok(MpesaSettings {
            consumer_key: row.consumer_key,
            consumer_secret: row.consumer_secret,
            passkey: row.passkey,
            shortcode: row.shortcode,
            callback_url: row.callback_url,
            access_token: row.access_token,
            token_expiry: row.token_expiry,
            environment,
        })
    }

    async fn save_settings(&self, settings: &MpesaSettings) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO mpesa_settings (id, consumer_key, consumer_secret, passkey, shortcode,
                                           callback_url, access_token, token_expiry, environment)
               VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (id) DO UPDATE SET
                   consumer_key = EXCLUDED.consumer_key,
                   consumer_secret = EXCLUDED.consumer_secret,
                   passkey = EXCLUDED.passkey,
                   shortcode = EXCLUDED.shortcode,
                   callback_url = EXCLUDED.callback_url,
                   access_token = EXCLUDED.access_token,
                   token_expiry = EXCLUDED.token_expiry,
                   environment = EXCLUDED.environment"#,
        )
        .bind(settings.consumer_key.as_deref())
        .bind(settings.consumer_secret.as_deref())
        .bind(settings.passkey.as_deref())
        .bind(settings.shortcode.as_deref())
        .bind(settings.callback_url.as_deref())
        .bind(settings.access_token.as_deref())
        .bind(settings.token_expiry)
        .bind(settings.environment.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_access_token(&self, token: &str, expiry: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE mpesa_settings SET access_token = $1, token_expiry = $2 WHERE id = 1")
            .bind(token)
            .bind(expiry)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pos_invoice(&self, name: &str) -> Result<Option<PosInvoice>> {
        let row = sqlx::query_as::<_, (String, String, String, BigDecimal)>(
            "SELECT name, customer, company, grand_total FROM pos_invoices WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(name, customer, company, grand_total)| PosInvoice { name, customer, company, grand_total }))
    }

    async fn sales_invoice(&self, name: &str) -> Result<Option<SalesInvoice>> {
        let row = sqlx::query_as::<_, (String, String, String, Option<chrono::NaiveDate>, BigDecimal, BigDecimal)>(
            r#"SELECT name, customer, company, due_date, grand_total, outstanding_amount
               FROM sales_invoices WHERE name = $1"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(name, customer, company, due_date, grand_total, outstanding_amount)| SalesInvoice {
            name,
            customer,
            company,
            due_date,
            grand_total,
            outstanding_amount,
        }))
    }

    async fn insert_payment(&self, payment: &MpesaPayment) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO mpesa_payments (name, pos_invoice, sales_invoice, amount, phone_number, status,
                                           checkout_request_id, merchant_request_id, result_code, result_desc,
                                           receipt_number, transaction_date, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
        )
        .bind(&payment.name)
        .bind(payment.invoice.pos_invoice())
        .bind(payment.invoice.sales_invoice())
        .bind(&payment.amount)
        .bind(&payment.phone_number)
        .bind(payment.status.as_str())
        .bind(payment.checkout_request_id.as_deref())
        .bind(payment.merchant_request_id.as_deref())
        .bind(payment.result_code.as_deref())
        .bind(payment.result_desc.as_deref())
        .bind(payment.receipt_number.as_deref())
        .bind(payment.transaction_date.as_deref())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("creating Mpesa Payment for {} {}", payment.invoice.doctype(), payment.invoice.name()))?;
        Ok(())
    }

    async fn save_payment(&self, payment: &MpesaPayment) -> Result<()> {
        let updated = sqlx::query(
            r#"UPDATE mpesa_payments
               SET phone_number = $2,
                   status = $3,
                   checkout_request_id = $4,
                   merchant_request_id = $5,
                   result_code = $6,
                   result_desc = $7,
                   receipt_number = $8,
                   transaction_date = $9,
                   updated_at = now()
               WHERE name = $1"#,
        )
        .bind(&payment.name)
        .bind(&payment.phone_number)
        .bind(payment.status.as_str())
        .bind(payment.checkout_request_id.as_deref())
        .bind(payment.merchant_request_id.as_deref())
        .bind(payment.result_code.as_deref())
        .bind(payment.result_desc.as_deref())
        .bind(payment.receipt_number.as_deref())
        .bind(payment.transaction_date.as_deref())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(anyhow!("Mpesa Payment {} does not exist", payment.name));
        }
        Ok(())
    }

    async fn payment(&self, name: &str) -> Result<Option<MpesaPayment>> {
        self.fetch_payment("name", name).await
    }

    async fn payment_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<MpesaPayment>> {
        self.fetch_payment("checkout_request_id", checkout_request_id).await
    }

    async fn submitted_entry_for_reference(&self, reference_no: &str) -> Result<Option<String>> {
        let name = sqlx::query_scalar::<_, String>(
            "SELECT name FROM payment_entries WHERE reference_no = $1 AND docstatus = 1 LIMIT 1",
        )
        .bind(reference_no)
        .fetch_optional(&self.pool)
        .await?;
        Ok(name)
    }

    async fn submit_payment_entry(&self, entry: &PaymentEntry) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"INSERT INTO payment_entries (name, payment_type, party_type, party, company, posting_date,
                                            paid_to, paid_amount, received_amount, target_exchange_rate,
                                            reference_no, reference_date, mode_of_payment, docstatus)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 1)
               ON CONFLICT (reference_no) WHERE docstatus = 1 DO NOTHING"#,
        )
        .bind(&entry.name)
        .bind(&entry.payment_type)
        .bind(&entry.party_type)
        .bind(&entry.party)
        .bind(&entry.company)
        .bind(entry.posting_date)
        .bind(&entry.paid_to)
        .bind(&entry.paid_amount)
        .bind(&entry.received_amount)
        .bind(&entry.target_exchange_rate)
        .bind(&entry.reference_no)
        .bind(entry.reference_date)
        .bind(&entry.mode_of_payment)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for (idx, reference) in entry.references.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO payment_entry_references (payment_entry, idx, reference_doctype, reference_name,
                                                         due_date, total_amount, outstanding_amount, allocated_amount)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
            )
            .bind(&entry.name)
            .bind(idx as i32 + 1)
            .bind(&reference.reference_doctype)
            .bind(&reference.reference_name)
            .bind(reference.due_date)
            .bind(&reference.total_amount)
            .bind(&reference.outstanding_amount)
            .bind(&reference.allocated_amount)
            .execute(&mut *tx)
            .await?;

            if reference.reference_doctype == SALES_INVOICE {
                sqlx::query(
                    r#"UPDATE sales_invoices
                       SET outstanding_amount = GREATEST(outstanding_amount - $2, 0)
                       WHERE name = $1"#,
                )
                .bind(&reference.reference_name)
                .bind(&reference.allocated_amount)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn account_matching(&self, keyword: &str) -> Result<Option<String>> {
        let name = sqlx::query_scalar::<_, String>(
            r#"SELECT name FROM accounts
               WHERE account_name ILIKE $1 ESCAPE '\' AND NOT is_group AND NOT disabled
               ORDER BY name LIMIT 1"#,
        )
        .bind(format!("%{}%", escape_like(keyword)))
        .fetch_optional(&self.pool)
        .await?;
        Ok(name)
    }

    async fn company_default_cash_account(&self, company: &str) -> Result<Option<String>> {
        let account = sqlx::query_scalar::<_, Option<String>>(
            "SELECT default_cash_account FROM companies WHERE name = $1",
        )
        .bind(company)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account.flatten().filter(|a| !a.is_empty()))
    }

    async fn any_cash_account(&self) -> Result<Option<String>> {
        let name = sqlx::query_scalar::<_, String>(
            r#"SELECT name FROM accounts
               WHERE account_type = 'Cash' AND NOT is_group AND NOT disabled
               ORDER BY name LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(name)
    }
}

/// Escape `ILIKE` wildcards so the keyword matches literally, like the in-memory adapter.
fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
