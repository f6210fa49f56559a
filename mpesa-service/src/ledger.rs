use bigdecimal::BigDecimal;
use chrono::Utc;
use common_money::normalize_scale;
use tracing::{error, info, warn};

use crate::error::MpesaError;
use crate::models::{InvoiceRef, MpesaPayment, PaymentEntry, PaymentReference, SALES_INVOICE};
use crate::service::{east_africa_time, MpesaService};

/// What happened when a completed payment was posted to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    Created(String),
    AlreadyRecorded(String),
    /// POS invoices are settled when the POS session closes.
    Deferred,
    MissingReceipt,
    Failed(String),
}

impl LedgerOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            LedgerOutcome::Created(_) => "created",
            LedgerOutcome::AlreadyRecorded(_) => "duplicate",
            LedgerOutcome::Deferred => "deferred",
            LedgerOutcome::MissingReceipt => "missing_receipt",
            LedgerOutcome::Failed(_) => "failed",
        }
    }
}

impl MpesaService {
    /// Post a completed payment. Errors are returned so the caller decides whether
    /// they are fatal.
    pub async fn create_payment_entries(&self, payment: &MpesaPayment) -> Result<LedgerOutcome, MpesaError> {
        match &payment.invoice {
            InvoiceRef::Pos(name) => {
                match self.store.pos_invoice(name).await? {
                    Some(_) => info!(
                        invoice = %name,
                        receipt = payment.receipt_number.as_deref().unwrap_or_default(),
                        "POS Invoice payment completed; settlement happens at POS closing"
                    ),
                    None => warn!(invoice = %name, payment = %payment.name, "POS Invoice for completed payment not found"),
                }
                Ok(LedgerOutcome::Deferred)
            }
            InvoiceRef::Sales(name) => self.create_sales_invoice_payment_entry(payment, name).await,
        }
    }

    async fn create_sales_invoice_payment_entry(
        &self,
        payment: &MpesaPayment,
        invoice_name: &str,
    ) -> Result<LedgerOutcome, MpesaError> {
        let Some(receipt) = payment.receipt_number.as_deref().filter(|r| !r.is_empty()) else {
            error!(payment = %payment.name, "Completed payment has no receipt number; no Payment Entry created");
            return Ok(LedgerOutcome::MissingReceipt);
        };

        if let Some(existing) = self.store.submitted_entry_for_reference(receipt).await? {
            info!(payment_entry = %existing, receipt, "Payment Entry already exists");
            return Ok(LedgerOutcome::AlreadyRecorded(existing));
        }

        let invoice = self
            .store
            .sales_invoice(invoice_name)
            .await?
            .ok_or_else(|| MpesaError::InvoiceNotFound { doctype: SALES_INVOICE, name: invoice_name.to_string() })?;
        let paid_to = self.resolve_receiving_account(&invoice.company).await?;
        let today = east_africa_time(Utc::now()).date();
        let amount = normalize_scale(&payment.amount);

        let entry = PaymentEntry {
            name: format!("ACC-PAY-{}", uuid::Uuid::new_v4().simple()),
            payment_type: "Receive".into(),
            party_type: "Customer".into(),
            party: invoice.customer.clone(),
            company: invoice.company.clone(),
            posting_date: today,
            paid_to,
            paid_amount: amount.clone(),
            received_amount: amount.clone(),
            target_exchange_rate: BigDecimal::from(1),
            reference_no: receipt.to_string(),
            reference_date: today,
            mode_of_payment: self.options.mode_of_payment.clone(),
            submitted: false,
            references: vec![PaymentReference {
                reference_doctype: SALES_INVOICE.into(),
                reference_name: invoice.name.clone(),
                due_date: invoice.due_date,
                total_amount: invoice.grand_total.clone(),
                outstanding_amount: invoice.outstanding_amount.clone(),
                allocated_amount: amount,
            }],
        };

        if !self.store.submit_payment_entry(&entry).await? {
            // Lost the race against a concurrent callback carrying the same receipt.
            let existing = self
                .store
                .submitted_entry_for_reference(receipt)
                .await?
                .unwrap_or_default();
            info!(payment_entry = %existing, receipt, "Payment Entry already exists");
            return Ok(LedgerOutcome::AlreadyRecorded(existing));
        }
        info!(payment_entry = %entry.name, invoice = %invoice.name, receipt, "Payment Entry created");
        Ok(LedgerOutcome::Created(entry.name))
    }

    /// Receiving account for M-Pesa funds: keyword match, then the company's
    /// default cash account, then any cash account.
    pub async fn resolve_receiving_account(&self, company: &str) -> Result<String, MpesaError> {
        if let Some(account) = self.store.account_matching(&self.options.account_keyword).await? {
            return Ok(account);
        }
        if let Some(account) = self.store.company_default_cash_account(company).await? {
            return Ok(account);
        }
        if let Some(account) = self.store.any_cash_account().await? {
            warn!(%account, "No dedicated M-Pesa account; falling back to a cash account");
            return Ok(account);
        }
        Err(MpesaError::NoReceivingAccount)
    }
}
