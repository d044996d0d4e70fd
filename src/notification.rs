//! ## Notification
//!
//! Decoding of the fixed 4-byte interrupt-IN frames and the dispatcher
//! that fans them out to per-type handlers. Handlers are registered once
//! while the device is being set up, before interrupt polling is armed,
//! so the handler table is read-only by the time it is shared with the
//! polling thread.
//!

use crate::wire;

use log::{debug, warn};

/// Number of slots in the notification handler table (indices 1..6 used).
pub const NOTIFICATION_HANDLERS_SIZE: usize = 7;

/// The types of notifications an I3C function may send to the host.
#[allow(unused)]
pub mod notification_types {
    /// Result of an INITIALIZE_I3C_BUS request
    pub const I3C_BUS_INITIALIZATION_STATUS: u8 = 0x1;
    /// Result of an address change request or a successful hot-join
    pub const ADDRESS_CHANGE_STATUS: u8 = 0x2;
    /// An error occurred on the I3C bus
    pub const I3C_BUS_ERROR: u8 = 0x3;
    /// IBI or hot-join to the controller
    pub const I3C_IBI: u8 = 0x4;
    /// Event from the active I3C controller to a target device
    pub const ACTIVE_I3C_CONTROLLER_EVENT: u8 = 0x5;
    /// The I3C controller stalled the execution of commands
    pub const STALL_ON_NACK: u8 = 0x6;
}

/// Codes for the I3C_BUS_INITIALIZATION_STATUS notification.
#[allow(unused)]
pub mod bus_init_codes {
    pub const SUCCESSFUL_I3C_BUS_INITIALIZATION: u16 = 0x0;
    pub const FAILURE_ENABLE_I3C_BUS: u16 = 0x1;
    pub const FAILURE_DEVICE_DISCOVERY: u16 = 0x2;
    pub const FAILURE_TARGET_DEVICE_TABLE_GENERATION: u16 = 0x3;
}

/// Codes for the ADDRESS_CHANGE_STATUS notification.
#[allow(unused)]
pub mod address_change_codes {
    pub const ALL_ADDRESS_CHANGE_SUCCEEDED: u16 = 0x0;
    pub const SOME_ADDRESS_CHANGE_FAILED: u16 = 0x1;
    pub const HOTJOIN_ADDRESS_ASSIGNMENT_SUCCEEDED: u16 = 0x2;
    pub const HOTJOIN_ADDRESS_ASSIGNMENT_FAILED: u16 = 0x3;
}

/// Codes for the I3C_IBI notification.
#[allow(unused)]
pub mod ibi_codes {
    pub const REGULAR_IBI_NO_PAYLOAD_ACKED: u16 = 0x1;
    pub const REGULAR_IBI_PAYLOAD_ACKED: u16 = 0x2;
    pub const IBI_AUTOCOMMAND_INITIATED: u16 = 0x3;
    pub const REGULAR_IBI_NACKED: u16 = 0x4;
    pub const HOTJOIN_IBI_ACKED: u16 = 0x5;
    pub const HOTJOIN_IBI_NACKED: u16 = 0x6;
    pub const CONTROLLER_ROLE_REQUEST_ACKED: u16 = 0x7;
    pub const CONTROLLER_ROLE_REQUEST_NACKED: u16 = 0x8;
}

/// ### Controller Event Code
///
/// The type of event a target device can receive from the active I3C
/// controller.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerEventCode {
    ReceivedCcc,
    ReceivedReadRequest,
    ReceivedWriteRequest,
}

impl ControllerEventCode {
    pub(crate) fn from_wire(code: u16) -> Option<ControllerEventCode> {
        match code {
            0x2 => Some(ControllerEventCode::ReceivedCcc),
            0x3 => Some(ControllerEventCode::ReceivedReadRequest),
            0x4 => Some(ControllerEventCode::ReceivedWriteRequest),
            _ => None,
        }
    }
}

/// ### Notification
///
/// One decoded interrupt notification.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Notification {
    /// The type of notification, indexing the handler table
    pub notification_type: u8,
    /// The notification value; its meaning depends on the type
    pub code: u16,
}

/// A handler for one notification type.
pub type NotificationHandler = Box<dyn Fn(Notification) + Send + Sync>;

/// ### Notification Dispatcher
///
/// A fixed table of per-type handlers. Indices follow the notification
/// type values; slot 0 is never used. The dispatcher is installed behind
/// the interrupt polling loop, which is the only reader, so the table
/// needs no locking once polling is armed.
///
#[derive(Default)]
pub struct NotificationDispatcher {
    handlers: [Option<NotificationHandler>; NOTIFICATION_HANDLERS_SIZE],
}

impl NotificationDispatcher {
    pub fn new() -> NotificationDispatcher {
        NotificationDispatcher::default()
    }

    /// Registers the handler for one notification type.
    pub fn register(&mut self, notification_type: u8, handler: NotificationHandler) {
        self.handlers[notification_type as usize] = Some(handler);
    }

    /// Decodes one interrupt frame and fans it out to the handler for its
    /// type. Unknown and zero types are dropped with a warning.
    pub fn dispatch(&self, buffer: &[u8]) {
        let notification = match wire::parse_notification(buffer) {
            Ok(raw) => Notification {
                notification_type: raw.notification_type,
                code: raw.code,
            },
            Err(_) => {
                warn!("invalid notification format");
                return;
            }
        };

        if notification.notification_type == 0
            || notification.notification_type as usize >= NOTIFICATION_HANDLERS_SIZE
        {
            warn!(
                "notification type {} not supported, it will be ignored",
                notification.notification_type
            );
            return;
        }

        match &self.handlers[notification.notification_type as usize] {
            Some(handler) => handler(notification),
            None => debug!(
                "no handler registered for notification type {}",
                notification.notification_type
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_routes_to_the_handler_for_the_type() {
        let mut dispatcher = NotificationDispatcher::new();
        let seen = Arc::new(AtomicU32::new(0));

        let stall_seen = Arc::clone(&seen);
        dispatcher.register(
            notification_types::STALL_ON_NACK,
            Box::new(move |notification| {
                stall_seen.store(notification.code as u32, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&wire::build_notification(
            notification_types::STALL_ON_NACK,
            1234,
        ));
        assert_eq!(seen.load(Ordering::SeqCst), 1234);
    }

    #[test]
    fn dispatch_drops_zero_and_out_of_range_types() {
        let mut dispatcher = NotificationDispatcher::new();
        let calls = Arc::new(AtomicU32::new(0));
        for slot in 1..NOTIFICATION_HANDLERS_SIZE as u8 {
            let counter = Arc::clone(&calls);
            dispatcher.register(
                slot,
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        dispatcher.dispatch(&wire::build_notification(0, 1));
        dispatcher.dispatch(&wire::build_notification(7, 1));
        dispatcher.dispatch(&wire::build_notification(0xFF, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispatch_ignores_malformed_frames() {
        let mut dispatcher = NotificationDispatcher::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        dispatcher.register(
            notification_types::I3C_IBI,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&[notification_types::I3C_IBI, 0x0]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn controller_event_codes_decode() {
        assert_eq!(
            ControllerEventCode::from_wire(0x2),
            Some(ControllerEventCode::ReceivedCcc)
        );
        assert_eq!(
            ControllerEventCode::from_wire(0x4),
            Some(ControllerEventCode::ReceivedWriteRequest)
        );
        assert_eq!(ControllerEventCode::from_wire(0x9), None);
    }
}
