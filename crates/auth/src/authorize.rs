use std::collections::HashSet;

use thiserror::Error;

use shopdesk_core::UserId;

use crate::permissions::*;
use crate::{Permission, Role};

/// An authenticated caller and the permissions its roles grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn from_roles(user_id: UserId, roles: Vec<Role>) -> Self {
        let permissions = permissions_for_roles(&roles);
        Self {
            user_id,
            roles,
            permissions,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.roles.iter().any(Role::is_staff)
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == &Role::ADMIN)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Implemented by request wrappers that declare what they need.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let perms: HashSet<&str> = principal.permissions.iter().map(|p| p.as_str()).collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Role table. Unknown roles grant nothing; `admin` grants everything.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    if roles.iter().any(|r| r == &Role::ADMIN) {
        return vec![Permission::new("*")];
    }

    let mut out: Vec<Permission> = Vec::new();
    let mut grant = |p: &Permission| {
        if !out.contains(p) {
            out.push(p.clone());
        }
    };

    for role in roles {
        match role.as_str() {
            "customer" => {
                for p in CUSTOMER_PERMISSIONS {
                    grant(p);
                }
            }
            "cashier" => {
                for p in CUSTOMER_PERMISSIONS.iter().chain(CASHIER_PERMISSIONS) {
                    grant(p);
                }
            }
            _ => {}
        }
    }
    out
}

const CUSTOMER_PERMISSIONS: &[Permission] = &[
    CATALOG_READ,
    ORDERS_PLACE,
    ORDERS_OWN,
    INVOICES_OWN,
    DEVICES_MANAGE,
    ACCOUNTS_SELF,
];

const CASHIER_PERMISSIONS: &[Permission] = &[
    POS_SELL,
    INVOICES_READ,
    INVOICES_PAY,
    ORDERS_READ,
    REPORTS_READ,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_is_wildcard() {
        let p = Principal::from_roles(UserId::new(), vec![Role::ADMIN]);
        assert!(authorize(&p, &STOCK_SHEETS).is_ok());
        assert!(p.is_staff());
    }

    #[test]
    fn cashier_can_sell_but_not_import_stock() {
        let p = Principal::from_roles(UserId::new(), vec![Role::CASHIER]);
        assert!(authorize(&p, &POS_SELL).is_ok());
        assert!(authorize(&p, &ORDERS_PLACE).is_ok());
        assert_eq!(
            authorize(&p, &STOCK_SHEETS),
            Err(AuthzError::Forbidden("stock.sheets".to_string()))
        );
    }

    #[test]
    fn customer_cannot_take_payments() {
        let p = Principal::from_roles(UserId::new(), vec![Role::CUSTOMER]);
        assert!(authorize(&p, &INVOICES_PAY).is_err());
        assert!(!p.is_staff());
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        let p = Principal::from_roles(UserId::new(), vec![Role::new("auditor")]);
        assert!(p.permissions.is_empty());
    }
}
