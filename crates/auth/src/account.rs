//! Shop account (customer or staff member), event-sourced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopdesk_core::{Aggregate, AggregateRoot, DomainError, UserId};
use shopdesk_events::Event;

use crate::Role;

pub const AGGREGATE_TYPE: &str = "accounts.account";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Customer,
    Cashier,
    Admin,
}

impl AccountRole {
    pub fn as_role(self) -> Role {
        match self {
            AccountRole::Customer => Role::CUSTOMER,
            AccountRole::Cashier => Role::CASHIER,
            AccountRole::Admin => Role::ADMIN,
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(AccountRole::Customer),
            "cashier" | "staff" => Ok(AccountRole::Cashier),
            "admin" => Ok(AccountRole::Admin),
            other => Err(DomainError::validation(format!(
                "Invalid role '{other}'. Use one of [customer, cashier, admin]"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: UserId,
    phone: String,
    name: String,
    address: String,
    gender: Option<String>,
    role: AccountRole,
    active: bool,
    joined_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Account {
    pub fn empty(id: UserId) -> Self {
        Self {
            id,
            phone: String::new(),
            name: String::new(),
            address: String::new(),
            gender: None,
            role: AccountRole::Customer,
            active: false,
            joined_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> AccountRole {
        self.role
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl AggregateRoot for Account {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAccount {
    pub user_id: UserId,
    pub phone: String,
    pub confirm_phone: String,
    pub name: String,
    pub address: String,
    pub gender: Option<String>,
    pub role: AccountRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProfile {
    pub name: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRole {
    pub role: AccountRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateAccount {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    Register(RegisterAccount),
    UpdateProfile(UpdateProfile),
    ChangeRole(ChangeRole),
    Deactivate(DeactivateAccount),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRegistered {
    pub user_id: UserId,
    pub phone: String,
    pub name: String,
    pub address: String,
    pub gender: Option<String>,
    pub role: AccountRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdated {
    pub user_id: UserId,
    pub name: String,
    pub address: String,
    pub gender: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChanged {
    pub user_id: UserId,
    pub role: AccountRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDeactivated {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    Registered(AccountRegistered),
    ProfileUpdated(ProfileUpdated),
    RoleChanged(RoleChanged),
    Deactivated(AccountDeactivated),
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::Registered(_) => "accounts.account.registered",
            AccountEvent::ProfileUpdated(_) => "accounts.account.profile_updated",
            AccountEvent::RoleChanged(_) => "accounts.account.role_changed",
            AccountEvent::Deactivated(_) => "accounts.account.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::Registered(e) => e.occurred_at,
            AccountEvent::ProfileUpdated(e) => e.occurred_at,
            AccountEvent::RoleChanged(e) => e.occurred_at,
            AccountEvent::Deactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Account {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::Registered(e) => {
                self.id = e.user_id;
                self.phone = e.phone.clone();
                self.name = e.name.clone();
                self.address = e.address.clone();
                self.gender = e.gender.clone();
                self.role = e.role;
                self.active = true;
                self.joined_at = Some(e.occurred_at);
                self.created = true;
            }
            AccountEvent::ProfileUpdated(e) => {
                self.name = e.name.clone();
                self.address = e.address.clone();
                self.gender = e.gender.clone();
            }
            AccountEvent::RoleChanged(e) => self.role = e.role,
            AccountEvent::Deactivated(_) => self.active = false,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountCommand::Register(cmd) => self.handle_register(cmd),
            AccountCommand::UpdateProfile(cmd) => self.handle_update(cmd),
            AccountCommand::ChangeRole(cmd) => self.handle_change_role(cmd),
            AccountCommand::Deactivate(cmd) => self.handle_deactivate(cmd),
        }
    }
}

/// Phone numbers are stored as digits only (an optional leading `+` is dropped).
pub fn normalize_phone(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if digits.len() < 10 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(DomainError::validation("Phone must be 10 to 15 digits."));
    }
    Ok(digits.to_string())
}

impl Account {
    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("Account not found"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterAccount) -> Result<Vec<AccountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("account already exists"));
        }
        if cmd.phone.trim() != cmd.confirm_phone.trim() {
            return Err(DomainError::validation("Phone numbers do not match."));
        }
        let phone = normalize_phone(&cmd.phone)?;
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("Name is required."));
        }

        Ok(vec![AccountEvent::Registered(AccountRegistered {
            user_id: cmd.user_id,
            phone,
            name: name.to_string(),
            address: cmd.address.trim().to_string(),
            gender: cmd.gender.clone().filter(|g| !g.trim().is_empty()),
            role: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateProfile) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_exists()?;

        let name = match &cmd.name {
            Some(n) if n.trim().is_empty() => {
                return Err(DomainError::validation("Name is required."));
            }
            Some(n) => n.trim().to_string(),
            None => self.name.clone(),
        };
        let address = cmd
            .address
            .as_deref()
            .map(|a| a.trim().to_string())
            .unwrap_or_else(|| self.address.clone());
        let gender = match &cmd.gender {
            Some(g) if g.trim().is_empty() => None,
            Some(g) => Some(g.trim().to_string()),
            None => self.gender.clone(),
        };

        if name == self.name && address == self.address && gender == self.gender {
            return Ok(vec![]);
        }

        Ok(vec![AccountEvent::ProfileUpdated(ProfileUpdated {
            user_id: self.id,
            name,
            address,
            gender,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_role(&self, cmd: &ChangeRole) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_exists()?;
        if self.role == cmd.role {
            return Ok(vec![]);
        }
        Ok(vec![AccountEvent::RoleChanged(RoleChanged {
            user_id: self.id,
            role: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateAccount) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_exists()?;
        if !self.active {
            return Err(DomainError::conflict("account is already inactive"));
        }
        Ok(vec![AccountEvent::Deactivated(AccountDeactivated {
            user_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopdesk_events::execute;

    fn register_cmd(user_id: UserId, phone: &str, confirm: &str) -> AccountCommand {
        AccountCommand::Register(RegisterAccount {
            user_id,
            phone: phone.to_string(),
            confirm_phone: confirm.to_string(),
            name: " Asha ".to_string(),
            address: "12 Market Rd".to_string(),
            gender: Some(String::new()),
            role: AccountRole::Customer,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn register_normalizes_fields() {
        let id = UserId::new();
        let mut account = Account::empty(id);
        execute(&mut account, &register_cmd(id, "+919876543210", "+919876543210")).unwrap();

        assert_eq!(account.phone(), "919876543210");
        assert_eq!(account.name(), "Asha");
        assert!(account.is_active());
        assert_eq!(account.version(), 1);
    }

    #[test]
    fn register_requires_matching_confirmation() {
        let id = UserId::new();
        let err = Account::empty(id)
            .handle(&register_cmd(id, "9876543210", "9876543211"))
            .unwrap_err();
        assert_eq!(err, DomainError::validation("Phone numbers do not match."));
    }

    #[test]
    fn register_rejects_short_phone() {
        let id = UserId::new();
        let err = Account::empty(id)
            .handle(&register_cmd(id, "12345", "12345"))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn unchanged_profile_emits_nothing() {
        let id = UserId::new();
        let mut account = Account::empty(id);
        execute(&mut account, &register_cmd(id, "9876543210", "9876543210")).unwrap();

        let events = account
            .handle(&AccountCommand::UpdateProfile(UpdateProfile {
                name: Some("Asha".to_string()),
                address: None,
                gender: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn role_parse_accepts_staff_alias() {
        assert_eq!(AccountRole::parse("Staff").unwrap(), AccountRole::Cashier);
        assert!(AccountRole::parse("owner").is_err());
    }
}
