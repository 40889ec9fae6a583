use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use shopdesk_core::UserId;
use shopdesk_events::EventEnvelope;
use shopdesk_notifications::device::AGGREGATE_TYPE as DEVICE;
use shopdesk_notifications::{DeviceEvent, DeviceId, Platform};

use super::cursor::StreamCursors;
use super::{decode, ProjectionError};
use crate::read_model::{InMemoryReadStore, ReadStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceView {
    pub id: DeviceId,
    pub token: String,
    pub platform: Platform,
    pub user_id: Option<UserId>,
    pub is_admin: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Push token registry used to address notifications.
#[derive(Debug, Default)]
pub struct DevicesProjection {
    devices: InMemoryReadStore<DeviceId, DeviceView>,
    cursors: StreamCursors,
}

impl DevicesProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &DeviceId) -> Option<DeviceView> {
        self.devices.get(id)
    }

    pub fn active(&self) -> Vec<DeviceView> {
        let mut all: Vec<DeviceView> = self.devices.list().into_iter().filter(|d| d.active).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.token.cmp(&b.token)));
        all
    }

    pub fn admin_tokens(&self) -> Vec<String> {
        self.active().into_iter().filter(|d| d.is_admin).map(|d| d.token).collect()
    }

    pub fn tokens_for_user(&self, user_id: UserId) -> Vec<String> {
        self.active()
            .into_iter()
            .filter(|d| d.user_id == Some(user_id))
            .map(|d| d.token)
            .collect()
    }

    pub fn clear(&self) {
        self.devices.clear();
        self.cursors.clear();
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != DEVICE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        match decode::<DeviceEvent>(envelope)? {
            DeviceEvent::Registered(e) => {
                // A token may come back after being unregistered; keep its first sighting.
                let created_at = self
                    .devices
                    .get(&e.device_id)
                    .map(|d| d.created_at)
                    .unwrap_or(e.occurred_at);
                self.devices.upsert(
                    e.device_id,
                    DeviceView {
                        id: e.device_id,
                        token: e.token,
                        platform: e.platform,
                        user_id: e.user_id,
                        is_admin: e.is_admin,
                        active: true,
                        created_at,
                        last_seen: e.occurred_at,
                    },
                );
            }
            DeviceEvent::Refreshed(e) => {
                self.devices.update(&e.device_id, &mut |d| {
                    d.platform = e.platform;
                    d.user_id = e.user_id;
                    d.is_admin = e.is_admin;
                    d.last_seen = e.occurred_at;
                });
            }
            DeviceEvent::Unregistered(e) => {
                self.devices.update(&e.device_id, &mut |d| d.active = false);
            }
        }

        self.cursors.advance(envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }
}
