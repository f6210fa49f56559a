mod support;

use mpesa_service::{
    gateway::DarajaClient,
    metrics::MpesaMetrics,
    models::{InvoiceRef, MpesaPayment, PaymentStatus},
    pg_repo::PgStore,
    repo::LedgerStore,
    MpesaConfig, MpesaService, ServiceOptions,
};
use sqlx::PgPool;
use std::sync::Arc;
use support::*;

struct Seeded {
    store: Arc<PgStore>,
    pool: PgPool,
    suffix: String,
}

impl Seeded {
    fn company(&self) -> String {
        format!("Acme {}", self.suffix)
    }

    fn invoice(&self) -> String {
        format!("SINV-{}", self.suffix)
    }
}

async fn seeded() -> Seeded {
    let dsn = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this ignored test");
    let pool = PgPool::connect(&dsn).await.unwrap();
    let store = PgStore::new(pool.clone());
    store.migrate().await.unwrap();

    let seeded = Seeded { store: Arc::new(store), pool, suffix: uuid::Uuid::new_v4().simple().to_string() };
    sqlx::query("INSERT INTO companies (name) VALUES ($1)")
        .bind(seeded.company())
        .execute(&seeded.pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO sales_invoices (name, customer, company, grand_total, outstanding_amount)
         VALUES ($1, 'Wanjiku Stores', $2, 1500, 1500)",
    )
    .bind(seeded.invoice())
    .bind(seeded.company())
    .execute(&seeded.pool)
    .await
    .unwrap();
    seeded
}

#[tokio::test]
#[ignore]
async fn payment_round_trips_through_postgres() {
    let db = seeded().await;
    let invoice = InvoiceRef::Sales(db.invoice());
    let checkout = format!("ws_CO_{}", db.suffix);

    let mut payment = MpesaPayment::initiated(invoice.clone(), dec("1000"), "254722123456".into());
    db.store.insert_payment(&payment).await.unwrap();
    payment.checkout_request_id = Some(checkout.clone());
    payment.status = PaymentStatus::Completed;
    payment.receipt_number = Some(format!("R{}", &db.suffix[..9]));
    db.store.save_payment(&payment).await.unwrap();

    let loaded = db.store.payment_by_checkout_id(&checkout).await.unwrap().unwrap();
    assert_eq!(loaded.name, payment.name);
    assert_eq!(loaded.invoice, invoice);
    assert_eq!(loaded.status, PaymentStatus::Completed);
    assert_eq!(loaded.amount, dec("1000"));
}

#[tokio::test]
#[ignore]
async fn duplicate_callback_posts_one_entry_in_postgres() {
    let db = seeded().await;
    sqlx::query("INSERT INTO accounts (name, account_name, account_type, company) VALUES ($1, $2, 'Bank', $3)")
        .bind(format!("Mpesa {} - AK", db.suffix))
        .bind(format!("Mpesa {}", db.suffix))
        .bind(db.company())
        .execute(&db.pool)
        .await
        .unwrap();

    let checkout = format!("ws_CO_{}", db.suffix);
    let mut payment = MpesaPayment::initiated(InvoiceRef::Sales(db.invoice()), dec("1000"), "254722123456".into());
    payment.checkout_request_id = Some(checkout.clone());
    db.store.insert_payment(&payment).await.unwrap();

    let config = MpesaConfig { account_keyword: db.suffix.clone(), ..MpesaConfig::default() };
    let service = MpesaService::new(
        db.store.clone(),
        Arc::new(DarajaClient::from_config(&config).unwrap()),
        Arc::new(MpesaMetrics::new().unwrap()),
        ServiceOptions::from(&config),
    );
    let receipt = format!("R{}", &db.suffix[..9]).to_uppercase();
    let body = success_callback(&checkout, &receipt);
    service.handle_callback(&body).await.unwrap();
    service.handle_callback(&body).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payment_entries WHERE reference_no = $1")
        .bind(&receipt)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
    let invoice = db.store.sales_invoice(&db.invoice()).await.unwrap().unwrap();
    assert_eq!(invoice.outstanding_amount, dec("500"));
}

#[tokio::test]
#[ignore]
async fn account_keyword_matches_underscore_literally() {
    let db = seeded().await;
    for (name, account_name) in [
        (format!("MXPESA {} - AK", db.suffix), format!("MXPESA{}", db.suffix)),
        (format!("M_PESA {} - AK", db.suffix), format!("M_PESA{}", db.suffix)),
    ] {
        sqlx::query("INSERT INTO accounts (name, account_name, account_type, company) VALUES ($1, $2, 'Bank', $3)")
            .bind(name)
            .bind(account_name)
            .bind(db.company())
            .execute(&db.pool)
            .await
            .unwrap();
    }

    let found = db.store.account_matching(&format!("m_pesa{}", db.suffix)).await.unwrap();
    assert_eq!(found, Some(format!("M_PESA {} - AK", db.suffix)));
}
