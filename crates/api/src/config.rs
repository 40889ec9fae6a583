//! Process configuration.
//!
//! Everything comes from environment variables; a `.env` file in the working
//! directory is loaded first when present. Unset variables fall back to the
//! defaults below, malformed ones are startup errors.

use std::net::SocketAddr;

use thiserror::Error;

use shopdesk_billing::{BillingPolicy, PaymentMethod};
use shopdesk_catalog::DEFAULT_HEADER_ROWS;
use shopdesk_infra::backoffice::{BackofficeConfig, DEFAULT_UTC_OFFSET_MINUTES, PosAddress, shop_offset};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// `Some` selects the Postgres event store.
    pub database_url: Option<String>,
    pub backoffice: BackofficeConfig,
}

impl AppConfig {
    /// In-memory stores and default shop settings.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: jwt_secret.into(),
            database_url: None,
            backoffice: BackofficeConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| invalid("BIND_ADDR", e))?;

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let persistent = match var("USE_PERSISTENT_STORES") {
            Some(raw) => parse_bool("USE_PERSISTENT_STORES", &raw)?,
            None => false,
        };
        let database_url = if persistent {
            Some(var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?)
        } else {
            None
        };

        let defaults = BillingPolicy::default();
        let triggers = match var("BILLING_TRIGGER_STATUSES") {
            Some(raw) => BillingPolicy::parse_triggers(&raw).map_err(|e| invalid("BILLING_TRIGGER_STATUSES", e))?,
            None => defaults.trigger_statuses().to_vec(),
        };
        let online_method = match var("BILLING_ONLINE_METHOD") {
            Some(raw) => PaymentMethod::parse(&raw).map_err(|e| invalid("BILLING_ONLINE_METHOD", e))?,
            None => defaults.online_method(),
        };

        let pos_address = match var("BILLING_POS_DEFAULT_ADDRESS") {
            Some(raw) => PosAddress::parse(&raw).map_err(|e| invalid("BILLING_POS_DEFAULT_ADDRESS", e))?,
            None => PosAddress::default(),
        };

        let include_shipping_phone_match = match var("ORDERS_INCLUDE_SHIPPING_PHONE_MATCH") {
            Some(raw) => parse_bool("ORDERS_INCLUDE_SHIPPING_PHONE_MATCH", &raw)?,
            None => false,
        };

        let offset_minutes = match var("SHOP_UTC_OFFSET_MINUTES") {
            Some(raw) => raw.parse::<i32>().map_err(|e| invalid("SHOP_UTC_OFFSET_MINUTES", e))?,
            None => DEFAULT_UTC_OFFSET_MINUTES,
        };
        if offset_minutes.abs() >= 24 * 60 {
            return Err(invalid("SHOP_UTC_OFFSET_MINUTES", "must be within one day of UTC"));
        }

        let stock_sheet_header_rows = match var("STOCK_SHEET_HEADER_ROWS") {
            Some(raw) => raw.parse::<usize>().map_err(|e| invalid("STOCK_SHEET_HEADER_ROWS", e))?,
            None => DEFAULT_HEADER_ROWS,
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            database_url,
            backoffice: BackofficeConfig {
                billing: BillingPolicy::new(triggers, online_method),
                pos_address,
                include_shipping_phone_match,
                shop_offset: shop_offset(offset_minutes),
                stock_sheet_header_rows,
            },
        })
    }
}

fn invalid(name: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, format!("expected a boolean, got {raw:?}"))),
    }
}
