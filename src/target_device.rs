//! ## Target Device
//!
//! One entry of the target device table: the device's addresses and
//! provisioned ID, the capability snapshot reported by the bridge, and
//! the configurable per-device data. Conversions from the wire entries
//! and the buffer builders for per-device requests live here.
//!

use crate::wire;

/// ### Target Device Type
///
/// Whether a target device on the bus is an I3C or an I2C device.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetType {
    I3c = 0,
    I2c = 1,
}

/// ### ASA Support
///
/// The kind of dynamic address assignment from a static address the
/// device supports.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsaSupport {
    /// The target does not have a static address
    NoStaticAddress = 0x0,
    /// The target supports the SETDASA directed CCC
    SupportsSetdasa = 0x1,
    /// The target supports the SETAASA broadcast CCC
    SupportsSetaasa = 0x2,
    /// The target supports both SETDASA and SETAASA
    SupportsSetdasaAndSetaasa = 0x3,
}

impl AsaSupport {
    pub(crate) fn from_wire(value: u8) -> AsaSupport {
        match value & 0x3 {
            0x1 => AsaSupport::SupportsSetdasa,
            0x2 => AsaSupport::SupportsSetaasa,
            0x3 => AsaSupport::SupportsSetdasaAndSetaasa,
            _ => AsaSupport::NoStaticAddress,
        }
    }
}

/// Capability snapshot of one target device, from GET_I3C_CAPABILITY.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceCapability {
    /// The static address the capability entry reported for the device
    pub static_address: u8,
    /// IBI priority, lower value is higher priority
    pub ibi_prioritization: u8,
    pub disco_minor_ver: u16,
    pub disco_major_ver: u16,
    /// Maximum amount of data the device may send as an IBI pending read
    pub max_ibi_pending_read_size: u32,
}

/// Configurable data of one target device, from the target device table.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceData {
    /// Wire encoding: 0 means the controller accepts interrupts
    pub target_interrupt_request: bool,
    /// Wire encoding: 0 means the controller accepts role requests
    pub controller_role_request: bool,
    pub ibi_timestamp: bool,
    pub asa: u8,
    pub daa: bool,
    pub change_flags: u8,
    pub target_type: u8,
    pub pending_read_capability: bool,
    pub valid_pid: bool,
    pub max_ibi_payload_size: u32,
    pub bus_characteristic_register: u8,
    pub device_characteristic_register: u8,
}

/// ### Target Device
///
/// The authoritative local mirror of one device on the I3C bus.
///
#[derive(Clone, Debug, Default)]
pub struct TargetDevice {
    /// The device's current (dynamic) address, 0 when unassigned
    pub target_address: u8,
    /// Bits 15:0 of the 48-bit provisioned ID
    pub pid_lo: u16,
    /// Bits 47:16 of the 48-bit provisioned ID
    pub pid_hi: u32,
    pub device_capability: DeviceCapability,
    pub device_data: DeviceData,
}

impl TargetDevice {
    /// The full 48-bit provisioned ID.
    pub fn pid(&self) -> u64 {
        ((self.pid_hi as u64) << 16) | self.pid_lo as u64
    }

    /// Creates a device from a capability entry.
    pub fn from_capability_entry(entry: &wire::CapabilityDeviceEntry) -> TargetDevice {
        let mut device = TargetDevice {
            target_address: entry.address,
            pid_lo: entry.pid_lo,
            pid_hi: entry.pid_hi,
            ..Default::default()
        };
        device.update_from_capability_entry(entry);
        device
    }

    /// Updates the capability snapshot from a capability entry.
    pub fn update_from_capability_entry(&mut self, entry: &wire::CapabilityDeviceEntry) {
        self.device_capability.static_address = entry.address;
        self.device_capability.ibi_prioritization = entry.ibi_prioritization;
        self.device_capability.disco_minor_ver = entry.mipi_disco_minor_version;
        self.device_capability.disco_major_ver = entry.mipi_disco_major_version;
        self.device_capability.max_ibi_pending_read_size = entry.max_ibi_pending_size;
    }

    /// Creates a device from a target device table entry.
    pub fn from_table_entry(entry: &wire::TargetDeviceTableEntry) -> TargetDevice {
        let mut device = TargetDevice {
            target_address: entry.address,
            pid_lo: entry.pid_lo,
            pid_hi: entry.pid_hi,
            ..Default::default()
        };
        device.update_from_table_entry(entry);
        device
    }

    /// Updates the configurable data from a target device table entry.
    pub fn update_from_table_entry(&mut self, entry: &wire::TargetDeviceTableEntry) {
        self.device_data.target_interrupt_request = entry.target_interrupt_request;
        self.device_data.controller_role_request = entry.controller_role_request;
        self.device_data.ibi_timestamp = entry.ibi_timestamp;
        self.device_data.asa = entry.asa;
        self.device_data.daa = entry.daa;
        self.device_data.change_flags = entry.change_flags;
        self.device_data.target_type = entry.target_type;
        self.device_data.pending_read_capability = entry.pending_read_capability;
        self.device_data.valid_pid = entry.valid_pid;
        self.device_data.max_ibi_payload_size = entry.max_ibi_payload_size;
        self.device_data.bus_characteristic_register = entry.bcr;
        self.device_data.device_characteristic_register = entry.dcr;
    }

    /// The device as a target device table entry.
    pub fn table_entry(&self) -> wire::TargetDeviceTableEntry {
        wire::TargetDeviceTableEntry {
            address: self.target_address,
            target_interrupt_request: self.device_data.target_interrupt_request,
            controller_role_request: self.device_data.controller_role_request,
            ibi_timestamp: self.device_data.ibi_timestamp,
            asa: self.device_data.asa,
            daa: self.device_data.daa,
            change_flags: self.device_data.change_flags,
            target_type: self.device_data.target_type,
            pending_read_capability: self.device_data.pending_read_capability,
            valid_pid: self.device_data.valid_pid,
            max_ibi_payload_size: self.device_data.max_ibi_payload_size,
            bcr: self.device_data.bus_characteristic_register,
            dcr: self.device_data.device_characteristic_register,
            pid_lo: self.pid_lo,
            pid_hi: self.pid_hi,
        }
    }

    /// The 3-bit TIR/CRR/IBIT configuration value of the device.
    pub fn config(&self) -> u8 {
        (self.device_data.target_interrupt_request as u8)
            | ((self.device_data.controller_role_request as u8) << 1)
            | ((self.device_data.ibi_timestamp as u8) << 2)
    }

    /// Applies a 3-bit TIR/CRR/IBIT configuration value.
    pub fn apply_config(&mut self, config: u8) {
        self.device_data.target_interrupt_request = config & 0x1 != 0;
        self.device_data.controller_role_request = (config >> 1) & 0x1 != 0;
        self.device_data.ibi_timestamp = (config >> 2) & 0x1 != 0;
    }
}

/// ### Target Device Info
///
/// The user-facing representation of an I3C or I2C device.
///
/// When the I3C controller is not aware of the target devices on its bus,
/// users provide them before initialization, with at least the I2C
/// devices and their static addresses; I3C devices that support dynamic
/// address assignment may be left out. The same structure is returned
/// when users request the table contents.
///
#[derive(Clone, Copy, Debug)]
pub struct TargetDeviceInfo {
    /// Whether the device is an I3C or an I2C device
    pub device_type: TargetType,
    /// The static address (mandatory for I2C devices, optional for I3C)
    pub static_address: u8,
    /// The dynamic address assigned by the I3C controller (never assigned
    /// by users)
    pub dynamic_address: u8,
    /// The 48-bit provisioned ID every I3C device must have unless it has
    /// a static address
    pub provisioned_id: u64,
    /// The type of address assignment from static address supported
    pub assignment_from_static_address: AsaSupport,
    /// Whether the device supports dynamic address assignment with ENTDAA
    pub dynamic_address_assignment_enabled: bool,
    /// Whether the controller should accept interrupts from this device
    pub target_interrupt_request_enabled: bool,
    /// Whether the controller should accept role requests from this device
    pub controller_role_request_enabled: bool,
    /// Whether the controller should time-stamp IBIs from this device
    pub ibi_timestamp_enabled: bool,
    /// The maximum IBI payload size the device is allowed to send
    pub max_ibi_payload_size: u32,
}

impl Default for TargetDeviceInfo {
    fn default() -> TargetDeviceInfo {
        TargetDeviceInfo {
            device_type: TargetType::I3c,
            static_address: 0,
            dynamic_address: 0,
            provisioned_id: 0,
            assignment_from_static_address: AsaSupport::NoStaticAddress,
            dynamic_address_assignment_enabled: false,
            target_interrupt_request_enabled: false,
            controller_role_request_enabled: false,
            ibi_timestamp_enabled: false,
            max_ibi_payload_size: 0,
        }
    }
}

impl From<&TargetDevice> for TargetDeviceInfo {
    fn from(device: &TargetDevice) -> TargetDeviceInfo {
        TargetDeviceInfo {
            device_type: if device.device_data.target_type == TargetType::I2c as u8 {
                TargetType::I2c
            } else {
                TargetType::I3c
            },
            static_address: device.device_capability.static_address,
            dynamic_address: device.target_address,
            provisioned_id: device.pid(),
            assignment_from_static_address: AsaSupport::from_wire(device.device_data.asa),
            dynamic_address_assignment_enabled: device.device_data.daa,
            // on the wire a zero TIR/CRR bit means the controller accepts
            // the request
            target_interrupt_request_enabled: !device.device_data.target_interrupt_request,
            controller_role_request_enabled: !device.device_data.controller_role_request,
            ibi_timestamp_enabled: device.device_data.ibi_timestamp,
            max_ibi_payload_size: device.device_data.max_ibi_payload_size,
        }
    }
}

impl From<&TargetDeviceInfo> for TargetDevice {
    fn from(info: &TargetDeviceInfo) -> TargetDevice {
        let mut device = TargetDevice {
            target_address: info.static_address,
            pid_lo: (info.provisioned_id & 0xFFFF) as u16,
            pid_hi: (info.provisioned_id >> 16) as u32,
            ..Default::default()
        };
        device.device_capability.static_address = info.static_address;
        device.device_data.target_type = info.device_type as u8;
        if info.device_type == TargetType::I3c {
            device.device_data.asa = info.assignment_from_static_address as u8;
            device.device_data.daa = info.dynamic_address_assignment_enabled;
            device.device_data.target_interrupt_request = !info.target_interrupt_request_enabled;
            device.device_data.controller_role_request = !info.controller_role_request_enabled;
            device.device_data.ibi_timestamp = info.ibi_timestamp_enabled;
            device.device_data.max_ibi_payload_size = info.max_ibi_payload_size;
            device.device_data.valid_pid = info.provisioned_id != 0;
        }
        device
    }
}

/// Builds a single-entry SET_TARGET_DEVICE_CONFIG buffer for one device.
pub fn build_set_configuration_buffer(
    address: u8,
    config: u8,
    max_ibi_payload_size: u32,
) -> Vec<u8> {
    wire::build_device_config_buffer(&[wire::DeviceConfigEntry {
        address,
        target_interrupt_request: config & 0x1 != 0,
        controller_role_request: (config >> 1) & 0x1 != 0,
        ibi_timestamp: (config >> 2) & 0x1 != 0,
        max_ibi_payload_size,
    }])
}

/// Builds a single-entry CHANGE_DYNAMIC_ADDRESS buffer for one device.
pub fn build_address_change_buffer(
    device: &TargetDevice,
    address: u8,
    new_address: u8,
) -> Vec<u8> {
    wire::build_address_change_buffer(&[wire::AddressChangeEntry {
        current_address: address,
        new_address,
        pid_lo: device.pid_lo,
        pid_hi: device.pid_hi,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_combines_hi_and_lo() {
        let device = TargetDevice {
            pid_lo: 0xBEEF,
            pid_hi: 0x1234_5678,
            ..Default::default()
        };
        assert_eq!(device.pid(), 0x1234_5678_BEEF);
    }

    #[test]
    fn table_entry_round_trips_through_device() {
        let entry = wire::TargetDeviceTableEntry {
            address: 100,
            target_interrupt_request: true,
            ibi_timestamp: true,
            asa: 0x1,
            daa: true,
            target_type: TargetType::I3c as u8,
            valid_pid: true,
            max_ibi_payload_size: 64,
            bcr: 0x42,
            dcr: 0x17,
            pid_lo: 0xAAAA,
            pid_hi: 0xBBBB,
            ..Default::default()
        };
        let device = TargetDevice::from_table_entry(&entry);
        assert_eq!(device.target_address, 100);
        assert_eq!(device.config(), 0b101);
        let rebuilt = device.table_entry();
        assert_eq!(rebuilt.address, entry.address);
        assert_eq!(rebuilt.bcr, entry.bcr);
        assert_eq!(rebuilt.pid_lo, entry.pid_lo);
    }

    #[test]
    fn config_applies_and_reads_back() {
        let mut device = TargetDevice::default();
        device.apply_config(0b111);
        assert!(device.device_data.target_interrupt_request);
        assert!(device.device_data.controller_role_request);
        assert!(device.device_data.ibi_timestamp);
        assert_eq!(device.config(), 0b111);
    }

    #[test]
    fn capability_entry_sets_static_address() {
        let entry = wire::CapabilityDeviceEntry {
            address: 0x50,
            ibi_prioritization: 2,
            max_ibi_pending_size: 128,
            ..Default::default()
        };
        let device = TargetDevice::from_capability_entry(&entry);
        assert_eq!(device.target_address, 0x50);
        assert_eq!(device.device_capability.static_address, 0x50);
        assert_eq!(device.device_capability.max_ibi_pending_read_size, 128);
    }
}
