use chrono::Utc;

use shopdesk_auth::Principal;
use shopdesk_notifications::device::AGGREGATE_TYPE as DEVICE;
use shopdesk_notifications::{Device, DeviceCommand, DeviceEvent, DeviceId, Platform, RegisterDevice, UnregisterDevice};

use super::Backoffice;
use crate::command_dispatcher::{DispatchError, retry_on_conflict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRegistration {
    pub created: bool,
    pub platform: Platform,
    pub is_admin: bool,
}

impl Backoffice {
    /// Creates or refreshes the device behind `token`. The admin flag is
    /// only honoured for staff.
    pub fn register_device(
        &self,
        actor: &Principal,
        token: &str,
        platform: Option<&str>,
        wants_admin: bool,
    ) -> Result<DeviceRegistration, DispatchError> {
        let platform = platform.map(Platform::parse).transpose()?.unwrap_or_default();
        let is_admin = wants_admin && actor.is_staff();
        let device_id = DeviceId::for_token(token);

        let events = retry_on_conflict(|| {
            let mut device = self.dispatcher.load(device_id.0, |a| Device::empty(DeviceId(a)))?;
            let mut uow = self.dispatcher.begin();
            let events = uow.execute(
                device_id.0,
                DEVICE,
                &mut device,
                &DeviceCommand::Register(RegisterDevice {
                    token: token.to_string(),
                    platform,
                    user_id: Some(actor.user_id),
                    is_admin,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.commit()?;
            Ok(events)
        })?;

        let created = events.iter().any(|e| matches!(e, DeviceEvent::Registered(_)));
        tracing::info!(%device_id, user_id = %actor.user_id, created, platform = platform.as_str(), "device registered");
        Ok(DeviceRegistration { created, platform, is_admin })
    }

    /// Drops the caller's device. Tokens owned by someone else are left alone.
    pub fn unregister_device(&self, actor: &Principal, token: &str) -> Result<(), DispatchError> {
        if token.trim().is_empty() {
            return Err(DispatchError::validation("token required"));
        }
        self.drop_device(token, Some(actor))
    }

    /// Removes a token the push provider reported as dead.
    pub fn prune_device(&self, token: &str) -> Result<(), DispatchError> {
        self.drop_device(token, None)
    }

    /// Tokens a test push goes to: the given one, or all of the caller's.
    pub fn test_push_tokens(&self, actor: &Principal, token: Option<&str>) -> Vec<String> {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => vec![token.to_string()],
            None => self.projections.devices.tokens_for_user(actor.user_id),
        }
    }

    fn drop_device(&self, token: &str, requested_by: Option<&Principal>) -> Result<(), DispatchError> {
        let device_id = DeviceId::for_token(token);
        self.dispatcher.dispatch(
            device_id.0,
            DEVICE,
            DeviceCommand::Unregister(UnregisterDevice {
                requested_by: requested_by.map(|p| p.user_id),
                occurred_at: Utc::now(),
            }),
            |a| Device::empty(DeviceId(a)),
        )?;
        Ok(())
    }
}
