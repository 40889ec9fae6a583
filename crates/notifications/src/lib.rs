//! Push notification domain: device registry, message composition and the
//! delivery seam.

pub mod device;
pub mod message;
pub mod sender;

pub use device::{
    Device, DeviceCommand, DeviceEvent, DeviceId, DeviceRefreshed, DeviceRegistered,
    DeviceUnregistered, Platform, RegisterDevice, UnregisterDevice, UnregisterReason, TOKEN_MAX,
};
pub use message::{PushMessage, order_placed_message, status_changed_message, test_message};
pub use sender::{LoggingPushSender, PushSender, SendError, SendReport, is_dead_token_code};
