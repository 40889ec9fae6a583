use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use shopdesk_auth::account::AGGREGATE_TYPE as ACCOUNT;
use shopdesk_auth::{AccountEvent, AccountRole};
use shopdesk_core::UserId;
use shopdesk_events::EventEnvelope;

use super::cursor::StreamCursors;
use super::{decode, ProjectionError};
use crate::read_model::{InMemoryReadStore, ReadStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountView {
    pub user_id: UserId,
    pub phone: String,
    pub name: String,
    pub address: String,
    pub gender: Option<String>,
    pub role: AccountRole,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

/// Account directory; also the phone uniqueness index.
#[derive(Debug, Default)]
pub struct AccountsProjection {
    accounts: InMemoryReadStore<UserId, AccountView>,
    by_phone: InMemoryReadStore<String, UserId>,
    cursors: StreamCursors,
}

impl AccountsProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &UserId) -> Option<AccountView> {
        self.accounts.get(user_id)
    }

    /// `phone` must already be normalized.
    pub fn by_phone(&self, phone: &str) -> Option<AccountView> {
        self.by_phone
            .get(&phone.to_string())
            .and_then(|id| self.accounts.get(&id))
    }

    /// Accounts ordered by join time, oldest first.
    pub fn list(&self) -> Vec<AccountView> {
        let mut all = self.accounts.list();
        all.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.user_id.cmp(&b.user_id)));
        all
    }

    pub fn clear(&self) {
        self.accounts.clear();
        self.by_phone.clear();
        self.cursors.clear();
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != ACCOUNT {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        match decode::<AccountEvent>(envelope)? {
            AccountEvent::Registered(e) => {
                self.by_phone.upsert(e.phone.clone(), e.user_id);
                self.accounts.upsert(
                    e.user_id,
                    AccountView {
                        user_id: e.user_id,
                        phone: e.phone,
                        name: e.name,
                        address: e.address,
                        gender: e.gender,
                        role: e.role,
                        active: true,
                        joined_at: e.occurred_at,
                    },
                );
            }
            AccountEvent::ProfileUpdated(e) => {
                self.accounts.update(&e.user_id, &mut |a| {
                    a.name = e.name.clone();
                    a.address = e.address.clone();
                    a.gender = e.gender.clone();
                });
            }
            AccountEvent::RoleChanged(e) => {
                self.accounts.update(&e.user_id, &mut |a| a.role = e.role);
            }
            AccountEvent::Deactivated(e) => {
                self.accounts.update(&e.user_id, &mut |a| a.active = false);
            }
        }

        self.cursors.advance(envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }
}
