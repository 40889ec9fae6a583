use chrono::Utc;

use shopdesk_auth::Principal;
use shopdesk_billing::invoice::AGGREGATE_TYPE as INVOICE;
use shopdesk_billing::{
    CapturePayment, InvoiceCommand, InvoiceId, InvoiceStatus, PaymentId, PaymentMethod, RefundPayment, VoidInvoice,
};
use shopdesk_core::{AggregateId, Money};
use shopdesk_orders::order::AGGREGATE_TYPE as ORDER;
use shopdesk_orders::{ChangeStatus, OrderCommand, OrderId, OrderStatus};

use super::Backoffice;
use crate::command_dispatcher::{DispatchError, retry_on_conflict};
use crate::projections::InvoiceView;

/// Outcome of a captured payment, with the order it may have settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub invoice: InvoiceView,
    pub payment_id: PaymentId,
    pub order_id: Option<OrderId>,
    pub order_status: Option<OrderStatus>,
}

impl Backoffice {
    /// Captures a payment against an invoice. When the invoice becomes
    /// settled, a pending linked order moves to `PAID` in the same commit.
    pub fn pay_invoice(
        &self,
        cashier: &Principal,
        invoice_id: InvoiceId,
        method: &str,
        amount: Money,
        txn_id: Option<String>,
    ) -> Result<PaymentReceipt, DispatchError> {
        let method = PaymentMethod::parse(method)?;
        let payment_id = PaymentId::new(AggregateId::new());

        let (order_id, order_status) = retry_on_conflict(|| {
            let now = Utc::now();
            let mut invoice = self.load_invoice(invoice_id)?;
            let mut uow = self.dispatcher.begin();

            uow.execute(
                invoice_id.0,
                INVOICE,
                &mut invoice,
                &InvoiceCommand::CapturePayment(CapturePayment {
                    payment_id,
                    method,
                    amount,
                    txn_id: txn_id.clone(),
                    received_by: Some(cashier.user_id),
                    occurred_at: now,
                }),
            )?;

            let mut order_status = None;
            if let Some(order_id) = invoice.order_id() {
                let mut order = self.load_order(order_id)?;
                if invoice.is_settled() && order.status() == OrderStatus::Pending {
                    uow.execute(
                        order_id.0,
                        ORDER,
                        &mut order,
                        &OrderCommand::ChangeStatus(ChangeStatus { to: OrderStatus::Paid, occurred_at: now }),
                    )?;
                }
                order_status = Some(order.status());
            }

            uow.commit()?;
            Ok((invoice.order_id(), order_status))
        })?;

        tracing::info!(%invoice_id, %payment_id, %method, %amount, received_by = %cashier.user_id, "payment captured");
        Ok(PaymentReceipt {
            invoice: self.invoice_view(invoice_id)?,
            payment_id,
            order_id,
            order_status,
        })
    }

    /// Refunds one captured payment; a settled invoice reopens.
    pub fn refund_payment(&self, invoice_id: InvoiceId, payment_id: PaymentId) -> Result<InvoiceView, DispatchError> {
        let mut invoice = self.load_invoice(invoice_id)?;
        let mut uow = self.dispatcher.begin();
        uow.execute(
            invoice_id.0,
            INVOICE,
            &mut invoice,
            &InvoiceCommand::RefundPayment(RefundPayment { payment_id, occurred_at: Utc::now() }),
        )?;
        uow.commit()?;

        tracing::info!(%invoice_id, %payment_id, "payment refunded");
        self.invoice_view(invoice_id)
    }

    pub fn void_invoice(&self, invoice_id: InvoiceId) -> Result<InvoiceView, DispatchError> {
        let mut invoice = self.load_invoice(invoice_id)?;
        let mut uow = self.dispatcher.begin();
        uow.execute(
            invoice_id.0,
            INVOICE,
            &mut invoice,
            &InvoiceCommand::Void(VoidInvoice { occurred_at: Utc::now() }),
        )?;
        uow.commit()?;

        tracing::info!(%invoice_id, "invoice voided");
        self.invoice_view(invoice_id)
    }

    /// Staff listing, newest first, optionally narrowed to one status.
    pub fn invoices(&self, status: Option<InvoiceStatus>) -> Vec<InvoiceView> {
        self.projections.invoices.query(|i| status.is_none_or(|s| i.status == s))
    }

    pub fn invoice(&self, invoice_id: InvoiceId) -> Result<InvoiceView, DispatchError> {
        self.invoice_view(invoice_id)
    }

    pub fn invoices_for_user(&self, user: &Principal) -> Vec<InvoiceView> {
        self.projections.invoices.query(|i| i.customer_id == Some(user.user_id))
    }

    /// Customers only see their own invoices; anything else is not found.
    pub fn invoice_for_user(&self, user: &Principal, invoice_id: InvoiceId) -> Result<InvoiceView, DispatchError> {
        self.invoice_view(invoice_id)
            .ok()
            .filter(|i| i.customer_id == Some(user.user_id))
            .ok_or_else(|| DispatchError::not_found("Invoice not found"))
    }
}
