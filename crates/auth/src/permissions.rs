use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission string such as `"invoices.pay"`; `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

pub const CATALOG_READ: Permission = Permission::from_static("catalog.read");
pub const CATALOG_WRITE: Permission = Permission::from_static("catalog.write");
pub const STOCK_SHEETS: Permission = Permission::from_static("stock.sheets");
pub const ORDERS_PLACE: Permission = Permission::from_static("orders.place");
pub const ORDERS_OWN: Permission = Permission::from_static("orders.own");
pub const ORDERS_READ: Permission = Permission::from_static("orders.read");
pub const ORDERS_MANAGE: Permission = Permission::from_static("orders.manage");
pub const POS_SELL: Permission = Permission::from_static("pos.sell");
pub const INVOICES_OWN: Permission = Permission::from_static("invoices.own");
pub const INVOICES_READ: Permission = Permission::from_static("invoices.read");
pub const INVOICES_PAY: Permission = Permission::from_static("invoices.pay");
pub const INVOICES_ADJUST: Permission = Permission::from_static("invoices.adjust");
pub const REPORTS_READ: Permission = Permission::from_static("reports.read");
pub const DEVICES_MANAGE: Permission = Permission::from_static("devices.manage");
pub const ACCOUNTS_SELF: Permission = Permission::from_static("accounts.self");
pub const ACCOUNTS_MANAGE: Permission = Permission::from_static("accounts.manage");
