use serde::{Deserialize, Serialize};

use shopdesk_core::{DomainError, ValueObject};

/// Shipping snapshot taken when the order is placed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub phone: String,
    pub line1: String,
    #[serde(default)]
    pub line2: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
}

impl ValueObject for ShippingAddress {}

impl ShippingAddress {
    pub fn trimmed(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            line1: self.line1.trim().to_string(),
            line2: self.line2.trim().to_string(),
            city: self.city.trim().to_string(),
            state: self.state.trim().to_string(),
            pincode: self.pincode.trim().to_string(),
        }
    }

    /// Every field except `line2` must be present.
    pub fn validate(&self) -> Result<(), DomainError> {
        let required = [
            ("shipping_name", &self.name),
            ("shipping_phone", &self.phone),
            ("address_line1", &self.line1),
            ("city", &self.city),
            ("state", &self.state),
            ("pincode", &self.pincode),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(DomainError::validation(format!("{field} is required.")));
            }
        }
        Ok(())
    }
}
