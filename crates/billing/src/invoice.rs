use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopdesk_catalog::ProductId;
use shopdesk_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, UserId};
use shopdesk_events::Event;
use shopdesk_orders::OrderId;

use crate::payment::{Payment, PaymentId, PaymentMethod, PaymentStatus, TXN_ID_MAX};

pub const AGGREGATE_TYPE: &str = "billing.invoice";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// `online` invoices are derived from storefront orders, `manual` ones come
/// from the POS counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceMode {
    Online,
    Manual,
}

impl InvoiceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceMode::Online => "online",
            InvoiceMode::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Open => "open",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoiceLine {
    pub product_id: Option<ProductId>,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub product_id: Option<ProductId>,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

/// Aggregate root: Invoice.
///
/// Invariants:
/// - `total = max(subtotal - discount, 0)`
/// - `paid_amount` is the sum of captured (not refunded) payments and never
///   exceeds `total`
/// - status is `paid` exactly when money was captured and covers the total
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    mode: InvoiceMode,
    status: InvoiceStatus,
    order_id: Option<OrderId>,
    customer_id: Option<UserId>,
    customer_name: String,
    customer_phone: String,
    cashier_id: Option<UserId>,
    lines: Vec<InvoiceLine>,
    subtotal: Money,
    discount: Money,
    total: Money,
    paid_amount: Money,
    payments: Vec<Payment>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Invoice {
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            mode: InvoiceMode::Online,
            status: InvoiceStatus::Open,
            order_id: None,
            customer_id: None,
            customer_name: String::new(),
            customer_phone: String::new(),
            cashier_id: None,
            lines: Vec::new(),
            subtotal: Money::ZERO,
            discount: Money::ZERO,
            total: Money::ZERO,
            paid_amount: Money::ZERO,
            payments: Vec::new(),
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn mode(&self) -> InvoiceMode {
        self.mode
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn customer_id(&self) -> Option<UserId> {
        self.customer_id
    }

    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn customer_phone(&self) -> &str {
        &self.customer_phone
    }

    pub fn cashier_id(&self) -> Option<UserId> {
        self.cashier_id
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn discount(&self) -> Money {
        self.discount
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    pub fn balance_due(&self) -> Money {
        self.total.saturating_sub(self.paid_amount)
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_settled(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInvoice {
    pub invoice_id: InvoiceId,
    pub mode: InvoiceMode,
    pub order_id: Option<OrderId>,
    pub customer_id: Option<UserId>,
    pub customer_name: String,
    pub customer_phone: String,
    pub cashier_id: Option<UserId>,
    pub discount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLines {
    pub lines: Vec<NewInvoiceLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturePayment {
    pub payment_id: PaymentId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub txn_id: Option<String>,
    pub received_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPayment {
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidInvoice {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    Open(OpenInvoice),
    AddLines(AddLines),
    CapturePayment(CapturePayment),
    RefundPayment(RefundPayment),
    Void(VoidInvoice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceOpened {
    pub invoice_id: InvoiceId,
    pub mode: InvoiceMode,
    pub order_id: Option<OrderId>,
    pub customer_id: Option<UserId>,
    pub customer_name: String,
    pub customer_phone: String,
    pub cashier_id: Option<UserId>,
    pub discount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesAdded {
    pub invoice_id: InvoiceId,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Money,
    pub total: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCaptured {
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub paid_amount: Money,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub paid_amount: Money,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceVoided {
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    Opened(InvoiceOpened),
    LinesAdded(LinesAdded),
    PaymentCaptured(PaymentCaptured),
    PaymentRefunded(PaymentRefunded),
    Voided(InvoiceVoided),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::Opened(_) => "billing.invoice.opened",
            InvoiceEvent::LinesAdded(_) => "billing.invoice.lines_added",
            InvoiceEvent::PaymentCaptured(_) => "billing.invoice.payment_captured",
            InvoiceEvent::PaymentRefunded(_) => "billing.invoice.payment_refunded",
            InvoiceEvent::Voided(_) => "billing.invoice.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::Opened(e) => e.occurred_at,
            InvoiceEvent::LinesAdded(e) => e.occurred_at,
            InvoiceEvent::PaymentCaptured(e) => e.occurred_at,
            InvoiceEvent::PaymentRefunded(e) => e.occurred_at,
            InvoiceEvent::Voided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::Opened(e) => {
                self.id = e.invoice_id;
                self.mode = e.mode;
                self.status = InvoiceStatus::Open;
                self.order_id = e.order_id;
                self.customer_id = e.customer_id;
                self.customer_name = e.customer_name.clone();
                self.customer_phone = e.customer_phone.clone();
                self.cashier_id = e.cashier_id;
                self.discount = e.discount;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            InvoiceEvent::LinesAdded(e) => {
                self.lines.extend(e.lines.iter().cloned());
                self.subtotal = e.subtotal;
                self.total = e.total;
            }
            InvoiceEvent::PaymentCaptured(e) => {
                self.payments.push(e.payment.clone());
                self.paid_amount = e.paid_amount;
                self.status = e.status;
            }
            InvoiceEvent::PaymentRefunded(e) => {
                if let Some(p) = self.payments.iter_mut().find(|p| p.payment_id == e.payment_id) {
                    p.status = PaymentStatus::Refunded;
                }
                self.paid_amount = e.paid_amount;
                self.status = e.status;
            }
            InvoiceEvent::Voided(_) => self.status = InvoiceStatus::Void,
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::Open(cmd) => self.handle_open(cmd),
            InvoiceCommand::AddLines(cmd) => self.handle_add_lines(cmd),
            InvoiceCommand::CapturePayment(cmd) => self.handle_capture(cmd),
            InvoiceCommand::RefundPayment(cmd) => self.handle_refund(cmd),
            InvoiceCommand::Void(cmd) => self.handle_void(cmd),
        }
    }
}

impl Invoice {
    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("Invoice not found"));
        }
        Ok(())
    }

    fn ensure_not_void(&self) -> Result<(), DomainError> {
        if self.status == InvoiceStatus::Void {
            return Err(DomainError::invariant("Invoice is void."));
        }
        Ok(())
    }

    fn status_for(&self, paid_amount: Money) -> InvoiceStatus {
        if !paid_amount.is_zero() && paid_amount >= self.total {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Open
        }
    }

    fn handle_open(&self, cmd: &OpenInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }

        Ok(vec![InvoiceEvent::Opened(InvoiceOpened {
            invoice_id: cmd.invoice_id,
            mode: cmd.mode,
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            customer_name: cmd.customer_name.trim().to_string(),
            customer_phone: cmd.customer_phone.trim().to_string(),
            cashier_id: cmd.cashier_id,
            discount: cmd.discount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_lines(&self, cmd: &AddLines) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists()?;
        if self.status != InvoiceStatus::Open {
            return Err(DomainError::invariant("Lines can only be added to open invoices."));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("At least one line is required."));
        }

        let too_large = || DomainError::validation("Invoice total is too large.");
        let mut lines = Vec::with_capacity(cmd.lines.len());
        let mut subtotal = self.subtotal;
        for l in &cmd.lines {
            if l.quantity < 1 {
                return Err(DomainError::validation("Quantity must be >= 1."));
            }
            let line_total = l.unit_price.checked_mul(l.quantity).ok_or_else(too_large)?;
            subtotal = subtotal.checked_add(line_total).ok_or_else(too_large)?;
            lines.push(InvoiceLine {
                product_id: l.product_id,
                name: l.name.trim().to_string(),
                quantity: l.quantity,
                unit_price: l.unit_price,
                line_total,
            });
        }

        Ok(vec![InvoiceEvent::LinesAdded(LinesAdded {
            invoice_id: self.id,
            lines,
            subtotal,
            total: subtotal.saturating_sub(self.discount),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_capture(&self, cmd: &CapturePayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists()?;
        if self.status == InvoiceStatus::Void {
            return Err(DomainError::invariant("Cannot take payment on a void invoice."));
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("Amount must be greater than zero."));
        }
        let due = self.balance_due();
        if due.is_zero() {
            return Err(DomainError::invariant("Invoice is already paid."));
        }
        if cmd.amount > due {
            return Err(DomainError::validation(format!(
                "Amount exceeds balance due ({due})."
            )));
        }
        let txn_id = cmd.txn_id.as_deref().unwrap_or("").trim().to_string();
        if txn_id.chars().count() > TXN_ID_MAX {
            return Err(DomainError::validation(format!(
                "txn_id must be at most {TXN_ID_MAX} characters."
            )));
        }
        if self.payments.iter().any(|p| p.payment_id == cmd.payment_id) {
            return Err(DomainError::conflict("payment already recorded"));
        }

        let paid_amount = self
            .paid_amount
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::validation("Amount is too large."))?;
        Ok(vec![InvoiceEvent::PaymentCaptured(PaymentCaptured {
            invoice_id: self.id,
            payment: Payment {
                payment_id: cmd.payment_id,
                method: cmd.method,
                status: PaymentStatus::Captured,
                amount: cmd.amount,
                txn_id,
                received_by: cmd.received_by,
                created_at: cmd.occurred_at,
            },
            paid_amount,
            status: self.status_for(paid_amount),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &RefundPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_void()?;
        let payment = self
            .payments
            .iter()
            .find(|p| p.payment_id == cmd.payment_id)
            .ok_or_else(|| DomainError::not_found("Payment not found"))?;
        if payment.status == PaymentStatus::Refunded {
            return Err(DomainError::conflict("Payment already refunded."));
        }

        let paid_amount = self.paid_amount.saturating_sub(payment.amount);
        Ok(vec![InvoiceEvent::PaymentRefunded(PaymentRefunded {
            invoice_id: self.id,
            payment_id: payment.payment_id,
            amount: payment.amount,
            paid_amount,
            status: self.status_for(paid_amount),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists()?;
        if self.status == InvoiceStatus::Void {
            return Err(DomainError::conflict("Invoice is already void."));
        }
        if !self.paid_amount.is_zero() {
            return Err(DomainError::invariant(
                "Invoices with captured payments cannot be voided. Refund them first.",
            ));
        }
        Ok(vec![InvoiceEvent::Voided(InvoiceVoided {
            invoice_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
