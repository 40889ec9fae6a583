use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopdesk_core::{AggregateId, DomainError, Money, UserId};

pub const TXN_ID_MAX: usize = 128;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub AggregateId);

impl PaymentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Online,
    Cash,
    Upi,
    Card,
    Cod,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 5] = [
        PaymentMethod::Online,
        PaymentMethod::Cash,
        PaymentMethod::Upi,
        PaymentMethod::Card,
        PaymentMethod::Cod,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Online => "online",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Card => "card",
            PaymentMethod::Cod => "cod",
        }
    }

    /// Case-insensitive.
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|m| m.as_str() == wanted).ok_or_else(|| {
            DomainError::validation("Unsupported method. Use one of [online, cash, upi, card, cod].")
        })
    }

    /// Gateway-style methods count as online payment on the order.
    pub fn is_prepaid(self) -> bool {
        matches!(self, PaymentMethod::Online | PaymentMethod::Upi | PaymentMethod::Card)
    }
}

impl core::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Captured,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: PaymentId,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount: Money,
    pub txn_id: String,
    pub received_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(PaymentMethod::parse(" UPI ").unwrap(), PaymentMethod::Upi);
    }

    #[test]
    fn unknown_method_lists_choices() {
        let err = PaymentMethod::parse("cheque").unwrap_err();
        assert_eq!(
            err,
            DomainError::validation("Unsupported method. Use one of [online, cash, upi, card, cod].")
        );
    }
}
