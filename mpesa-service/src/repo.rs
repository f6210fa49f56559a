use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_money::saturating_deduct;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{
    Account, Company, MpesaPayment, MpesaSettings, PaymentEntry, PosInvoice, SalesInvoice, SALES_INVOICE,
};

/// Persistence for the documents the integration reads and writes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn settings(&self) -> Result<MpesaSettings>;
    async fn save_settings(&self, settings: &MpesaSettings) -> Result<()>;
    /// Persist a refreshed token. Concurrent refreshes overwrite each other.
    async fn store_access_token(&self, token: &str, expiry: DateTime<Utc>) -> Result<()>;

    async fn pos_invoice(&self, name: &str) -> Result<Option<PosInvoice>>;
    async fn sales_invoice(&self, name: &str) -> Result<Option<SalesInvoice>>;

    async fn insert_payment(&self, payment: &MpesaPayment) -> Result<()>;
    async fn save_payment(&self, payment: &MpesaPayment) -> Result<()>;
    async fn payment(&self, name: &str) -> Result<Option<MpesaPayment>>;
    async fn payment_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<MpesaPayment>>;

    /// Name of a submitted payment entry carrying `reference_no`, if one exists.
    async fn submitted_entry_for_reference(&self, reference_no: &str) -> Result<Option<String>>;
    /// Insert and submit `entry`, reducing the outstanding amount of referenced sales invoices.
    /// Returns `false` without writing when a submitted entry already holds the same reference number.
    async fn submit_payment_entry(&self, entry: &PaymentEntry) -> Result<bool>;

    /// First postable account whose name contains `keyword`, ignoring case.
    async fn account_matching(&self, keyword: &str) -> Result<Option<String>>;
    async fn company_default_cash_account(&self, company: &str) -> Result<Option<String>>;
    /// First postable account of type `Cash`.
    async fn any_cash_account(&self) -> Result<Option<String>>;
}

pub type DynLedgerStore = Arc<dyn LedgerStore>;

struct Inner {
    settings: MpesaSettings,
    pos_invoices: BTreeMap<String, PosInvoice>,
    sales_invoices: BTreeMap<String, SalesInvoice>,
    payments: BTreeMap<String, MpesaPayment>,
    entries: Vec<PaymentEntry>,
    accounts: BTreeMap<String, Account>,
    companies: BTreeMap<String, Company>,
}

/// Process-local store used for tests and for running without a database.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new(settings: MpesaSettings) -> Self {
        Self {
            inner: RwLock::new(Inner {
                settings,
                pos_invoices: BTreeMap::new(),
                sales_invoices: BTreeMap::new(),
                payments: BTreeMap::new(),
                entries: Vec::new(),
                accounts: BTreeMap::new(),
                companies: BTreeMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_pos_invoice(self, invoice: PosInvoice) -> Self {
        self.write().pos_invoices.insert(invoice.name.clone(), invoice);
        self
    }

    pub fn with_sales_invoice(self, invoice: SalesInvoice) -> Self {
        self.write().sales_invoices.insert(invoice.name.clone(), invoice);
        self
    }

    pub fn with_account(self, account: Account) -> Self {
        self.write().accounts.insert(account.name.clone(), account);
        self
    }

    pub fn with_company(self, company: Company) -> Self {
        self.write().companies.insert(company.name.clone(), company);
        self
    }

    pub fn payments(&self) -> Vec<MpesaPayment> {
        self.read().payments.values().cloned().collect()
    }

    pub fn payment_entries(&self) -> Vec<PaymentEntry> {
        self.read().entries.clone()
    }

    pub fn sales_invoice_snapshot(&self, name: &str) -> Option<SalesInvoice> {
        self.read().sales_invoices.get(name).cloned()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn settings(&self) -> Result<MpesaSettings> {
        Ok(self.read().settings.clone())
    }

    async fn save_settings(&self, settings: &MpesaSettings) -> Result<()> {
        self.write().settings = settings.clone();
        Ok(())
    }

    async fn store_access_token(&self, token: &str, expiry: DateTime<Utc>) -> Result<()> {
        let mut guard = self.write();
        guard.settings.access_token = Some(token.to_string());
        guard.settings.token_expiry = Some(expiry);
        Ok(())
    }

    async fn pos_invoice(&self, name: &str) -> Result<Option<PosInvoice>> {
        Ok(self.read().pos_invoices.get(name).cloned())
    }

    async fn sales_invoice(&self, name: &str) -> Result<Option<SalesInvoice>> {
        Ok(self.read().sales_invoices.get(name).cloned())
    }

    async fn insert_payment(&self, payment: &MpesaPayment) -> Result<()> {
        let mut guard = self.write();
        if guard.payments.contains_key(&payment.name) {
            return Err(anyhow!("Mpesa Payment {} already exists", payment.name));
        }
        guard.payments.insert(payment.name.clone(), payment.clone());
        Ok(())
    }

    async fn save_payment(&self, payment: &MpesaPayment) -> Result<()> {
        let mut guard = self.write();
        let slot = guard
            .payments
            .get_mut(&payment.name)
            .ok_or_else(|| anyhow!("Mpesa Payment {} does not exist", payment.name))?;
        let mut updated = payment.clone();
        updated.updated_at = Utc::now();
        *slot = updated;
        Ok(())
    }

    async fn payment(&self, name: &str) -> Result<Option<MpesaPayment>> {
        Ok(self.read().payments.get(name).cloned())
    }

    async fn payment_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<MpesaPayment>> {
        Ok(self
            .read()
            .payments
            .values()
            .find(|p| p.checkout_request_id.as_deref() == Some(checkout_request_id))
            .cloned())
    }

    async fn submitted_entry_for_reference(&self, reference_no: &str) -> Result<Option<String>> {
        Ok(self
            .read()
            .entries
            .iter()
            .find(|e| e.submitted && e.reference_no == reference_no)
            .map(|e| e.name.clone()))
    }

    async fn submit_payment_entry(&self, entry: &PaymentEntry) -> Result<bool> {
        let mut guard = self.write();
        if guard.entries.iter().any(|e| e.submitted && e.reference_no == entry.reference_no) {
            return Ok(false);
        }
        for reference in entry.references.iter().filter(|r| r.reference_doctype == SALES_INVOICE) {
            if let Some(invoice) = guard.sales_invoices.get_mut(&reference.reference_name) {
                invoice.outstanding_amount =
                    saturating_deduct(&invoice.outstanding_amount, &reference.allocated_amount);
            }
        }
        let mut submitted = entry.clone();
        submitted.submitted = true;
        guard.entries.push(submitted);
        Ok(true)
    }

    async fn account_matching(&self, keyword: &str) -> Result<Option<String>> {
        let needle = keyword.to_lowercase();
        Ok(self
            .read()
            .accounts
            .values()
            .find(|a| a.is_postable() && a.account_name.to_lowercase().contains(&needle))
            .map(|a| a.name.clone()))
    }

    async fn company_default_cash_account(&self, company: &str) -> Result<Option<String>> {
        Ok(self
            .read()
            .companies
            .get(company)
            .and_then(|c| c.default_cash_account.clone())
            .filter(|account| !account.is_empty()))
    }

    async fn any_cash_account(&self) -> Result<Option<String>> {
        Ok(self
            .read()
            .accounts
            .values()
            .find(|a| a.is_postable() && a.account_type.as_deref() == Some("Cash"))
            .map(|a| a.name.clone()))
    }
}
