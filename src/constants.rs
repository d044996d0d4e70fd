//! ## Constants
//!
//! Various constants used throughout the project.
//!

#[allow(unused)]
pub mod usb {
    /// The device class code for USB-I3C
    pub const USBI3C_CLASS_CODE: u8 = 0x3C;
    /// Index of the default control endpoint used in class-specific requests
    pub const CONTROL_ENDPOINT_INDEX: u16 = 0;
    /// Index of the bulk endpoint pair on the I3C interface
    pub const BULK_ENDPOINT_INDEX: u16 = 1;
    /// Index of the interrupt-IN endpoint on the I3C interface
    pub const INTERRUPT_ENDPOINT_INDEX: u16 = 2;
}

#[allow(unused)]
pub mod misc {
    use std::time::Duration;

    /// The default timeout duration for USB transactions
    pub const DEFAULT_TIMEOUT_DURATION: Duration = Duration::from_secs(2);
    /// How many endpoint packets fit in the perpetual bulk-IN response buffer
    pub const BULK_RESPONSE_BUFFER_PACKETS: usize = 1000;
    /// Default number of times a stalled request is resumed before it is cancelled
    pub const DEFAULT_REATTEMPT_MAX: u32 = 2;
    /// Size in bytes of a DWORD as used by the wire structures
    pub const DWORD_SIZE: usize = 4;
}

#[allow(unused)]
pub mod addresses {
    /// Broadcast address reserved by the I3C bus
    pub const BROADCAST_ADDRESS: u8 = 0x7E;
    /// Reserved address a target device uses to hot-join an initialized bus
    pub const HOT_JOIN_ADDRESS: u8 = 0x02;
}

#[allow(unused)]
pub mod class_requests {
    /// Class-specific bRequest values defined by the USB-I3C device class
    pub const GET_I3C_CAPABILITY: u8 = 0x01;
    pub const INITIALIZE_I3C_BUS: u8 = 0x02;
    pub const GET_TARGET_DEVICE_TABLE: u8 = 0x03;
    pub const SET_TARGET_DEVICE_CONFIG: u8 = 0x04;
    pub const CHANGE_DYNAMIC_ADDRESS: u8 = 0x05;
    pub const GET_ADDRESS_CHANGE_RESULT: u8 = 0x06;
    pub const CANCEL_OR_RESUME_BULK_REQUEST: u8 = 0x07;
    pub const GET_BUFFER_AVAILABLE: u8 = 0x08;
    /// Standard bRequest values reused by the class for feature toggles
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;

    /// wValue for CANCEL_OR_RESUME_BULK_REQUEST: clear the stalled command
    /// and cancel subsequent dependent commands
    pub const CANCEL_BULK_REQUEST: u16 = 0x0;
    /// wValue for CANCEL_OR_RESUME_BULK_REQUEST: retry the stalled command
    pub const RESUME_BULK_REQUEST: u16 = 0x1;
}

#[allow(unused)]
pub mod feature_selectors {
    /// The I3C bus (CLEAR_FEATURE only)
    pub const I3C_BUS: u16 = 0x01;
    /// The I3C controller role handoff
    pub const I3C_CONTROLLER_ROLE_HANDOFF: u16 = 0x02;
    /// All regular in-band interrupts from I3C target devices
    pub const REGULAR_IBI: u16 = 0x03;
    /// The Hot-Join feature
    pub const HOT_JOIN: u16 = 0x04;
    /// USB remote wake from regular in-band interrupts
    pub const REGULAR_IBI_WAKE: u16 = 0x06;
    /// USB remote wake from Hot-Join
    pub const HOT_JOIN_WAKE: u16 = 0x07;
    /// USB remote wake from an I3C controller role request
    pub const I3C_CONTROLLER_ROLE_REQUEST_WAKE: u16 = 0x08;
    /// Forces I3C target devices to exit HDR mode (CLEAR_FEATURE only)
    pub const HDR_MODE_EXIT_RECOVERY: u16 = 0x09;
}

#[allow(unused)]
pub mod address_assignment {
    /// The I3C controller decides the dynamic address assignment mode
    pub const CONTROLLER_DECIDED: u16 = 0x0;
    /// Broadcast ENTDAA to enter dynamic address assignment
    pub const ENTER_DYNAMIC_ADDRESS_ASSIGNMENT: u16 = 0x1;
    /// Use each device's static address as its dynamic address
    pub const SET_STATIC_ADDRESS_AS_DYNAMIC: u16 = 0x2;
}

#[allow(unused)]
pub mod ccc {
    /// Broadcast RSTDAA (reset dynamic address assignment)
    pub const RSTDAA: u8 = 0x06;
    /// Broadcast RSTACT (target reset action) with defining byte
    pub const BROADCAST_RSTACT: u8 = 0x2A;
    /// Directed RSTACT with defining byte
    pub const DIRECT_RSTACT: u8 = 0x9A;
}
