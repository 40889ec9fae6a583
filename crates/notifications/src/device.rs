use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopdesk_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use shopdesk_events::Event;

pub const AGGREGATE_TYPE: &str = "notifications.device";

pub const TOKEN_MAX: usize = 512;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub AggregateId);

impl DeviceId {
    /// The stream id is a function of the token, so two registrations of the
    /// same token always land on the same stream.
    pub fn for_token(token: &str) -> Self {
        Self(AggregateId::from_natural_key("device", token.trim()))
    }
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Android,
    Ios,
    Web,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "web" => Ok(Platform::Web),
            _ => Err(DomainError::validation("Invalid platform. Use one of [android, ios, web]")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnregisterReason {
    /// The owner removed the device.
    User,
    /// The push provider reported the token as dead.
    Pruned,
}

/// Aggregate root: Device (one push token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    id: DeviceId,
    token: String,
    platform: Platform,
    user_id: Option<UserId>,
    is_admin: bool,
    active: bool,
    created_at: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    version: u64,
}

impl Device {
    pub fn empty(id: DeviceId) -> Self {
        Self {
            id,
            token: String::new(),
            platform: Platform::Android,
            user_id: None,
            is_admin: false,
            active: false,
            created_at: None,
            last_seen: None,
            version: 0,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl AggregateRoot for Device {
    type Id = DeviceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDevice {
    pub token: String,
    pub platform: Platform,
    pub user_id: Option<UserId>,
    pub is_admin: bool,
    pub occurred_at: DateTime<Utc>,
}

/// `requested_by` is `None` when the system prunes a dead token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterDevice {
    pub requested_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCommand {
    Register(RegisterDevice),
    Unregister(UnregisterDevice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistered {
    pub device_id: DeviceId,
    pub token: String,
    pub platform: Platform,
    pub user_id: Option<UserId>,
    pub is_admin: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRefreshed {
    pub device_id: DeviceId,
    pub platform: Platform,
    pub user_id: Option<UserId>,
    pub is_admin: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUnregistered {
    pub device_id: DeviceId,
    pub token: String,
    pub reason: UnregisterReason,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    Registered(DeviceRegistered),
    Refreshed(DeviceRefreshed),
    Unregistered(DeviceUnregistered),
}

impl Event for DeviceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeviceEvent::Registered(_) => "notifications.device.registered",
            DeviceEvent::Refreshed(_) => "notifications.device.refreshed",
            DeviceEvent::Unregistered(_) => "notifications.device.unregistered",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DeviceEvent::Registered(e) => e.occurred_at,
            DeviceEvent::Refreshed(e) => e.occurred_at,
            DeviceEvent::Unregistered(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Device {
    type Command = DeviceCommand;
    type Event = DeviceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DeviceEvent::Registered(e) => {
                self.id = e.device_id;
                self.token = e.token.clone();
                self.platform = e.platform;
                self.user_id = e.user_id;
                self.is_admin = e.is_admin;
                self.active = true;
                self.created_at = Some(e.occurred_at);
                self.last_seen = Some(e.occurred_at);
            }
            DeviceEvent::Refreshed(e) => {
                self.platform = e.platform;
                self.user_id = e.user_id;
                self.is_admin = e.is_admin;
                self.last_seen = Some(e.occurred_at);
            }
            DeviceEvent::Unregistered(_) => self.active = false,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DeviceCommand::Register(cmd) => {
                let token = cmd.token.trim();
                if token.is_empty() {
                    return Err(DomainError::validation("token required"));
                }
                if token.chars().count() > TOKEN_MAX {
                    return Err(DomainError::validation(format!(
                        "token must be at most {TOKEN_MAX} characters."
                    )));
                }
                if DeviceId::for_token(token) != self.id {
                    return Err(DomainError::invariant("device id does not match token"));
                }

                if self.active {
                    Ok(vec![DeviceEvent::Refreshed(DeviceRefreshed {
                        device_id: self.id,
                        platform: cmd.platform,
                        user_id: cmd.user_id,
                        is_admin: cmd.is_admin,
                        occurred_at: cmd.occurred_at,
                    })])
                } else {
                    Ok(vec![DeviceEvent::Registered(DeviceRegistered {
                        device_id: self.id,
                        token: token.to_string(),
                        platform: cmd.platform,
                        user_id: cmd.user_id,
                        is_admin: cmd.is_admin,
                        occurred_at: cmd.occurred_at,
                    })])
                }
            }
            DeviceCommand::Unregister(cmd) => {
                if !self.active {
                    return Ok(vec![]);
                }
                // Owners may only drop their own tokens; anything else is a silent no-op.
                let reason = match cmd.requested_by {
                    Some(user) if self.user_id != Some(user) => return Ok(vec![]),
                    Some(_) => UnregisterReason::User,
                    None => UnregisterReason::Pruned,
                };
                Ok(vec![DeviceEvent::Unregistered(DeviceUnregistered {
                    device_id: self.id,
                    token: self.token.clone(),
                    reason,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}
