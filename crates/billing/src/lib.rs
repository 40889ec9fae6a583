//! Billing domain module (event-sourced).
//!
//! Invoices with their lines and payments, and the policy deciding how an
//! online order turns into a settled invoice.

pub mod derive;
pub mod invoice;
pub mod payment;

pub use derive::{BillingPolicy, Derivation, TXN_ID_FROM_REFERENCE_MAX};
pub use invoice::{
    AddLines, CapturePayment, Invoice, InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceLine,
    InvoiceMode, InvoiceOpened, InvoiceStatus, InvoiceVoided, LinesAdded, NewInvoiceLine,
    OpenInvoice, PaymentCaptured, PaymentRefunded, RefundPayment, VoidInvoice,
};
pub use payment::{Payment, PaymentId, PaymentMethod, PaymentStatus, TXN_ID_MAX};
