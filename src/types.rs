//! ## Types
//!
//! The different types used across the crate
//!

use rusb::{Direction, TransferType};

/// ### Device Role
///
/// The role the I3C device behind the USB bridge can take on the bus.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceRole {
    /// The device has the primary I3C controller role
    PrimaryController,
    /// The device has the I3C target device role
    Target,
    /// The device is a target capable of the secondary controller role
    TargetCapableOfSecondaryController,
}

impl DeviceRole {
    pub(crate) fn from_wire(value: u8) -> Option<DeviceRole> {
        match value {
            0x1 => Some(DeviceRole::PrimaryController),
            0x2 => Some(DeviceRole::Target),
            0x3 => Some(DeviceRole::TargetCapableOfSecondaryController),
            _ => None,
        }
    }
}

/// ### Capability Data Type
///
/// The awareness the I3C device has about the target devices on its bus.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityDataType {
    /// The device is aware of the target devices on the I3C bus
    StaticData,
    /// The device is not aware of the target devices on the I3C bus
    NoStaticData,
    /// The device is aware of the target devices through info sent from the host
    DynamicData,
}

impl CapabilityDataType {
    pub(crate) fn from_wire(value: u8) -> Option<CapabilityDataType> {
        match value {
            0x1 => Some(CapabilityDataType::StaticData),
            0x2 => Some(CapabilityDataType::NoStaticData),
            0x3 => Some(CapabilityDataType::DynamicData),
            _ => None,
        }
    }
}

/// ### Bus Capabilities
///
/// The collected capabilities of the I3C device connected via USB,
/// read with GET_I3C_CAPABILITY.
///
#[derive(Clone, Debug, Default)]
pub struct BusCapabilities {
    /// The type of I2C target devices present on the I3C bus
    pub devices_present: u8,
    /// The device is capable of handing off the I3C controller role
    pub handoff_controller_role: bool,
    /// The device is capable of handling Hot-Joins
    pub hot_join_capability: bool,
    /// The device is capable of handling IBIs
    pub in_band_interrupt_capability: bool,
    /// The device supports pending read for an IBI
    pub pending_read_capability: bool,
    /// Pending read is initiated by the device rather than the host
    pub self_initiated: bool,
    /// The device performs delayed rather than immediate pending reads
    pub delayed_pending_read: bool,
    /// Pending read is supported in SDR mode
    pub pending_read_sdr: bool,
    /// Pending read is supported in HDR mode
    pub pending_read_hdr: bool,
    /// Pending read works with a single command rather than multiple
    pub single_command_pending_read: bool,
    pub i3c_minor_ver: u16,
    pub i3c_major_ver: u16,
    pub disco_minor_ver: u16,
    pub disco_major_ver: u16,
    pub i2c_data_transfer_rates: u8,
    pub clock_frequency_i2c_udr1: u16,
    pub clock_frequency_i2c_udr2: u16,
    pub clock_frequency_i2c_udr3: u16,
    pub i3c_data_transfer_modes: u8,
    pub i3c_data_transfer_rates: u8,
    pub transfer_mode_extended_capability_length: u16,
    pub clock_frequency_i3c_udr1: u32,
    pub clock_frequency_i3c_udr2: u32,
    /// Max IBI payload size supported by the controller
    pub max_ibi_payload_size: u32,
}

/// ### Device State
///
/// The current state of the I3C device.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceState {
    /// The I3C device is the active I3C controller
    pub active_i3c_controller: bool,
    /// The controller role handoff feature is enabled
    pub handoff_controller_role_enabled: bool,
    /// The Hot-Join feature is enabled
    pub hot_join_enabled: bool,
    /// The in-band interrupt feature is enabled
    pub in_band_interrupt_enabled: bool,
}

/// ### Device Info
///
/// Role, bus knowledge, address and capability snapshot of the I3C device,
/// populated from the GET_I3C_CAPABILITY response.
///
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    /// The dynamic address of the I3C device itself
    pub address: u8,
    /// The role of the I3C device
    pub device_role: DeviceRole,
    /// The type of data in the capability structure
    pub data_type: CapabilityDataType,
    pub capabilities: BusCapabilities,
    pub device_state: DeviceState,
}

/// ### I3C Mode
///
/// The I3C communication mode options applied to every enqueued command.
///
/// The I3C bus is always initialized and configured in SDR mode, never in
/// any of the HDR modes. SDR is the default mode of the bus and is also
/// used to enter other modes and states, and for built-in features such
/// as CCCs and in-band interrupts.
///
#[derive(Clone, Copy, Debug)]
pub struct I3cMode {
    /// The transfer mode for the I3C or I2C commands
    pub transfer_mode: u8,
    /// The transfer rate for the selected transfer mode
    pub transfer_rate: u8,
    /// Reserved for transfer mode specific information
    pub tm_specific_info: u8,
}

impl Default for I3cMode {
    fn default() -> I3cMode {
        I3cMode {
            transfer_mode: crate::commands::TransferMode::I3cSdr as u8,
            transfer_rate: crate::commands::I3cTransferRate::Rate2Mhz as u8,
            tm_specific_info: 0,
        }
    }
}

/// USB device address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceAddr {
    /// USB bus number
    pub bus: u8,
    /// USB device number
    pub device: u8,
}

/// USB device identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceId {
    /// USB Id Vendor
    pub vendor_id: u16,
    /// USB Id Product
    pub product_id: u16,
}

/// USB-level info about a discovered USB-I3C device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub id: DeviceId,
    pub address: DeviceAddr,
}

/// ### Device Mode
///
/// A collection of the configuration, interface and interface number. Also if the interface has a kernel driver attached.
///
#[derive(Debug, Clone, Default)]
pub struct DeviceMode {
    /// The USB configuration number
    pub config_number: u8,
    /// The interface number specific to the configuration
    pub interface_number: u8,
    /// The setting number specific to the interface
    pub setting_number: u8,
    /// If the device has a kernel driver. Important for returning control to the OS (on Linux).
    pub has_kernel_driver: bool,
}

/// ### Endpoint
///
/// Properties of an endpoint.
///
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// Address of the endpoint on the interface
    pub address: u8,
    /// The maximal size a packet can have on this endpoint
    pub max_packet_size: u16,
    /// The transfer type of the endpoint (for USB-I3C, Bulk or Interrupt)
    pub transfer_type: TransferType,
    /// The direction of the endpoint
    pub direction: Direction,
}

/// ### USB-I3C Endpoints
///
/// Endpoints specific to the USB-I3C device class.
///
#[derive(Clone, Debug)]
pub struct I3cEndpoints {
    /// The mandatory BULK OUT endpoint
    pub bulk_out_ep: Endpoint,
    /// The mandatory BULK IN endpoint
    pub bulk_in_ep: Endpoint,
    /// The mandatory INTERRUPT IN endpoint
    pub interrupt_ep: Endpoint,
}
