//! ## Wire
//!
//! Bit-exact packing and parsing of every structure the USB-I3C device
//! class puts on the wire: bulk transfer headers, command and response
//! blocks, capability buffers, target device tables, device configs,
//! address changes, IBI response frames and interrupt notifications.
//!
//! All multi-byte fields are little-endian and packed to DWORD (4-byte)
//! alignment. Data blocks that are not 4-byte aligned are padded in the
//! leading (low-address) bytes with zero, not the trailing bytes; that
//! padding is observable on the wire.
//!

use crate::commands::{CommandDescriptor, CommandType, Direction, ErrorHandling, ExecutionStatus};
use crate::constants::misc::DWORD_SIZE;
use crate::error::Error;

use anyhow::Result;

/// Size in bytes of the common bulk transfer header
pub const BULK_TRANSFER_HEADER_SIZE: usize = 4;
/// Size in bytes of a bulk request command block header
pub const COMMAND_BLOCK_HEADER_SIZE: usize = 4;
/// Size in bytes of a bulk request command descriptor
pub const COMMAND_DESCRIPTOR_SIZE: usize = 16;
/// Size in bytes of a bulk response block header
pub const RESPONSE_BLOCK_HEADER_SIZE: usize = 4;
/// Size in bytes of a bulk response descriptor
pub const RESPONSE_DESCRIPTOR_SIZE: usize = 8;
/// Size in bytes of the capability header
pub const CAPABILITY_HEADER_SIZE: usize = 4;
/// Size in bytes of the capability bus block
pub const CAPABILITY_BUS_SIZE: usize = 36;
/// Size in bytes of one capability device entry
pub const CAPABILITY_DEVICE_SIZE: usize = 16;
/// Size in bytes of the target device table header
pub const TARGET_DEVICE_HEADER_SIZE: usize = 4;
/// Size in bytes of one target device table entry
pub const TARGET_DEVICE_ENTRY_SIZE: usize = 16;
/// Size in bytes of the device config header
pub const DEVICE_CONFIG_HEADER_SIZE: usize = 4;
/// Size in bytes of one device config entry
pub const DEVICE_CONFIG_ENTRY_SIZE: usize = 8;
/// Size in bytes of the address change header
pub const ADDRESS_CHANGE_HEADER_SIZE: usize = 4;
/// Size in bytes of one address change entry
pub const ADDRESS_CHANGE_ENTRY_SIZE: usize = 8;
/// Size in bytes of the address change result header
pub const ADDRESS_CHANGE_RESULT_HEADER_SIZE: usize = 4;
/// Size in bytes of one address change result entry
pub const ADDRESS_CHANGE_RESULT_ENTRY_SIZE: usize = 4;
/// Size in bytes of an IBI response frame header
pub const IBI_RESPONSE_HEADER_SIZE: usize = 4;
/// Size in bytes of an IBI response frame footer
pub const IBI_RESPONSE_FOOTER_SIZE: usize = 4;
/// Size in bytes of an interrupt notification
pub const NOTIFICATION_SIZE: usize = 4;

/// The I3C device contains the capability data structure
pub const DEVICE_CONTAINS_CAPABILITY_DATA: u8 = 0x00;
/// The I3C device does not contain the capability data structure
pub const DEVICE_DOES_NOT_CONTAIN_CAPABILITY_DATA: u8 = 0xFF;

/// config_change_command_type for SET_TARGET_DEVICE_CONFIG
pub const CHANGE_CONFIG_COMMAND_TYPE: u8 = 0x1;
/// address_change_command_type for CHANGE_DYNAMIC_ADDRESS
pub const ADDRESS_CHANGE_COMMAND_TYPE: u8 = 0x1;

/// Gets the size of a data block padded to the closest 32-bit chunk.
///
/// Data in transfers must be 32-bit aligned; data that is not gets padded
/// to the closest 4-byte chunk.
pub fn dword_block_size(size: usize) -> usize {
    (size + DWORD_SIZE - 1) / DWORD_SIZE * DWORD_SIZE
}

fn read_u32(buffer: &[u8], offset: usize) -> Result<u32> {
    let bytes = buffer
        .get(offset..offset + 4)
        .ok_or(Error::MalformedFrame("buffer shorter than its layout"))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn write_u32(buffer: &mut Vec<u8>, value: u32) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

/// Copies `data` into `buffer` as a DWORD-aligned block, zero-padding the
/// leading bytes.
fn write_padded_block(buffer: &mut Vec<u8>, data: &[u8]) {
    let padding = dword_block_size(data.len()) - data.len();
    buffer.extend(std::iter::repeat(0u8).take(padding));
    buffer.extend_from_slice(data);
}

/// Reads a DWORD-aligned block of `data_length` bytes, skipping the
/// leading padding.
fn read_padded_block(buffer: &[u8], offset: usize, data_length: usize) -> Result<Vec<u8>> {
    let block_size = dword_block_size(data_length);
    let padding = block_size - data_length;
    let data = buffer
        .get(offset + padding..offset + block_size)
        .ok_or(Error::MalformedFrame("data block exceeds buffer"))?;
    Ok(data.to_vec())
}

/**************************
 * Bulk transfer framing  *
 **************************/

/// ### Bulk Tag
///
/// The type of a bulk transfer, carried in the low two bits of the header.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkTag {
    Regular = 0x0,
    Ibi = 0x1,
    VendorSpecific = 0x2,
}

impl BulkTag {
    fn from_wire(value: u32) -> Option<BulkTag> {
        match value {
            0x0 => Some(BulkTag::Regular),
            0x1 => Some(BulkTag::Ibi),
            0x2 => Some(BulkTag::VendorSpecific),
            _ => None,
        }
    }
}

/// Packs the 32-bit bulk transfer header shared by requests and responses.
pub fn put_bulk_transfer_header(buffer: &mut Vec<u8>, tag: BulkTag, dependent_on_previous: bool) {
    let word = (tag as u32) | ((dependent_on_previous as u32) << 2);
    write_u32(buffer, word);
}

/// Reads the tag and dependent_on_previous bit from a bulk transfer header.
pub fn parse_bulk_transfer_header(buffer: &[u8]) -> Result<(BulkTag, bool)> {
    let word = read_u32(buffer, 0)?;
    let tag = BulkTag::from_wire(word & 0x3).ok_or(Error::MalformedFrame("unknown bulk tag"))?;
    Ok((tag, (word >> 2) & 0x1 != 0))
}

/**************************
 * Bulk request commands  *
 **************************/

/// Packs one command block: block header, command descriptor and the
/// leading-padded data block (if any). Returns the number of bytes added.
pub fn put_command_block(
    buffer: &mut Vec<u8>,
    request_id: u16,
    descriptor: &CommandDescriptor,
    data: Option<&[u8]>,
) -> usize {
    let start = buffer.len();

    // only CCCs or Write commands carry a data block; Read commands use
    // data_length to say how much to read back
    let has_data = descriptor.direction != Direction::Read && descriptor.data_length > 0;
    write_u32(buffer, (request_id as u32) | ((has_data as u32) << 16));

    let word0 = (descriptor.command_type as u32)
        | ((descriptor.direction as u32) << 3)
        | ((descriptor.error_handling as u32) << 4)
        | ((descriptor.target_address as u32) << 8)
        | (((descriptor.transfer_mode & 0x1F) as u32) << 16)
        | (((descriptor.transfer_rate & 0x7) as u32) << 21)
        | ((descriptor.tm_specific_info as u32) << 24);
    write_u32(buffer, word0);
    write_u32(
        buffer,
        (descriptor.defining_byte as u32) | ((descriptor.common_command_code as u32) << 8),
    );
    write_u32(buffer, descriptor.data_length & 0x3F_FFFF);
    write_u32(buffer, 0);

    if has_data {
        if let Some(data) = data {
            write_padded_block(buffer, data);
        }
    }

    buffer.len() - start
}

/// A command block parsed back from a bulk request buffer.
#[derive(Debug)]
pub struct ParsedCommandBlock {
    pub request_id: u16,
    pub has_data: bool,
    pub descriptor: CommandDescriptor,
    pub data: Option<Vec<u8>>,
    /// Total size of the block in the buffer, data block included
    pub block_size: usize,
}

/// Parses one command block starting at `offset` in a bulk request buffer.
pub fn parse_command_block(buffer: &[u8], offset: usize) -> Result<ParsedCommandBlock> {
    let header = read_u32(buffer, offset)?;
    let request_id = (header & 0xFFFF) as u16;
    let has_data = (header >> 16) & 0x1 != 0;

    let word0 = read_u32(buffer, offset + 4)?;
    let word1 = read_u32(buffer, offset + 8)?;
    let word2 = read_u32(buffer, offset + 12)?;

    let command_type = CommandType::from_wire((word0 & 0x7) as u8)
        .ok_or(Error::MalformedFrame("unknown command type"))?;
    let direction = if (word0 >> 3) & 0x1 != 0 {
        Direction::Read
    } else {
        Direction::Write
    };
    let error_handling = match (word0 >> 4) & 0xF {
        0x0 => ErrorHandling::TerminateOnAnyError,
        0x1 => ErrorHandling::TerminateOnAnyErrorExceptNack,
        0x2 => ErrorHandling::DoNotTerminateOnError,
        0x3 => ErrorHandling::TerminateOnShortRead,
        0x4 => ErrorHandling::TerminateOnErrorButStallOnNack,
        _ => return Err(Error::MalformedFrame("unknown error handling").into()),
    };

    let descriptor = CommandDescriptor {
        command_type,
        direction,
        error_handling,
        target_address: ((word0 >> 8) & 0xFF) as u8,
        transfer_mode: ((word0 >> 16) & 0x1F) as u8,
        transfer_rate: ((word0 >> 21) & 0x7) as u8,
        tm_specific_info: ((word0 >> 24) & 0xFF) as u8,
        defining_byte: (word1 & 0xFF) as u8,
        common_command_code: ((word1 >> 8) & 0xFF) as u8,
        data_length: word2 & 0x3F_FFFF,
    };

    let fixed = COMMAND_BLOCK_HEADER_SIZE + COMMAND_DESCRIPTOR_SIZE;
    let (data, block_size) = if has_data {
        let data = read_padded_block(buffer, offset + fixed, descriptor.data_length as usize)?;
        let size = fixed + dword_block_size(descriptor.data_length as usize);
        (Some(data), size)
    } else {
        (None, fixed)
    };

    Ok(ParsedCommandBlock {
        request_id,
        has_data,
        descriptor,
        data,
        block_size,
    })
}

/**************************
 * Bulk response blocks   *
 **************************/

/// A response block parsed from a regular bulk response buffer.
#[derive(Debug)]
pub struct ParsedResponseBlock {
    pub request_id: u16,
    pub attempted: bool,
    pub has_data: bool,
    pub error_status: ExecutionStatus,
    pub data_length: u32,
    pub data: Option<Vec<u8>>,
    /// Total size of the block in the buffer, data block included
    pub block_size: usize,
}

/// Parses one response block starting at `offset` in a bulk response buffer.
pub fn parse_response_block(buffer: &[u8], offset: usize) -> Result<ParsedResponseBlock> {
    let header = read_u32(buffer, offset)?;
    let request_id = (header & 0xFFFF) as u16;
    let has_data = (header >> 24) & 0x1 != 0;
    let attempted = (header >> 25) & 0x1 != 0;

    // a command that was not attempted has no response descriptor
    let (error_status, data_length, mut block_size) = if attempted {
        let word = read_u32(buffer, offset + RESPONSE_BLOCK_HEADER_SIZE)?;
        let status = ExecutionStatus::from_wire(((word >> 28) & 0xF) as u8)
            .ok_or(Error::MalformedFrame("unknown execution status"))?;
        (
            status,
            word & 0x3F_FFFF,
            RESPONSE_BLOCK_HEADER_SIZE + RESPONSE_DESCRIPTOR_SIZE,
        )
    } else {
        (ExecutionStatus::Succeeded, 0, RESPONSE_BLOCK_HEADER_SIZE)
    };

    let data = if has_data && data_length > 0 {
        let data = read_padded_block(buffer, offset + block_size, data_length as usize)?;
        block_size += dword_block_size(data_length as usize);
        Some(data)
    } else {
        None
    };

    Ok(ParsedResponseBlock {
        request_id,
        attempted,
        has_data,
        error_status,
        data_length,
        data,
        block_size,
    })
}

/// Packs one response block. Used to build response transfers in tests and
/// by bridges; the driver itself only parses these.
pub fn put_response_block(
    buffer: &mut Vec<u8>,
    request_id: u16,
    attempted: bool,
    error_status: ExecutionStatus,
    data: Option<&[u8]>,
) {
    let has_data = data.is_some();
    write_u32(
        buffer,
        (request_id as u32) | ((has_data as u32) << 24) | ((attempted as u32) << 25),
    );
    if attempted {
        let data_length = data.map(|d| d.len() as u32).unwrap_or(0);
        write_u32(
            buffer,
            (data_length & 0x3F_FFFF) | ((error_status as u32) << 28),
        );
        write_u32(buffer, 0);
    }
    if let Some(data) = data {
        write_padded_block(buffer, data);
    }
}

/**************************
 * Vendor specific        *
 **************************/

/// Builds a vendor-specific bulk request: the vendor tag followed by the
/// caller's data, leading-padded to DWORD alignment.
pub fn build_vendor_specific_buffer(data: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(BULK_TRANSFER_HEADER_SIZE + dword_block_size(data.len()));
    put_bulk_transfer_header(&mut buffer, BulkTag::VendorSpecific, false);
    write_padded_block(&mut buffer, data);
    buffer
}

/**************************
 * Capability             *
 **************************/

/// Header of a GET_I3C_CAPABILITY response.
#[derive(Clone, Copy, Debug)]
pub struct CapabilityHeader {
    pub total_length: u16,
    pub device_role: u8,
    pub data_type: u8,
    pub error_code: u8,
}

/// Capabilities of the I3C device connected via USB.
#[derive(Clone, Debug, Default)]
pub struct CapabilityBus {
    pub i3c_device_address: u8,
    pub devices_present: u8,
    pub handoff_controller_role: bool,
    pub hot_join_capability: bool,
    pub in_band_interrupt_capability: bool,
    pub pending_read_capability: bool,
    pub self_initiated: bool,
    pub delayed_pending_read: bool,
    pub pending_read_sdr: bool,
    pub pending_read_hdr: bool,
    pub single_command_pending_read: bool,
    pub mipi_minor_version: u16,
    pub mipi_major_version: u16,
    pub mipi_disco_minor_version: u16,
    pub mipi_disco_major_version: u16,
    pub i2c_data_transfer_rates: u8,
    pub clock_frequency_i2c_udr1: u16,
    pub clock_frequency_i2c_udr2: u16,
    pub clock_frequency_i2c_udr3: u16,
    pub i3c_data_transfer_modes: u8,
    pub i3c_data_transfer_rates: u8,
    pub transfer_mode_extended_cap_len: u16,
    pub clock_frequency_i3c_udr1: u32,
    pub clock_frequency_i3c_udr2: u32,
    pub max_ibi_payload_size: u32,
}

/// Capability entry describing one target device.
#[derive(Clone, Copy, Debug, Default)]
pub struct CapabilityDeviceEntry {
    pub address: u8,
    pub ibi_prioritization: u8,
    pub pid_lo: u16,
    pub pid_hi: u32,
    pub mipi_disco_minor_version: u16,
    pub mipi_disco_major_version: u16,
    pub max_ibi_pending_size: u32,
}

/// A fully parsed GET_I3C_CAPABILITY response.
#[derive(Clone, Debug)]
pub struct CapabilityBuffer {
    pub header: CapabilityHeader,
    /// Absent when the device reports it has no capability data
    pub bus: Option<CapabilityBus>,
    pub devices: Vec<CapabilityDeviceEntry>,
}

/// Parses a GET_I3C_CAPABILITY response buffer.
pub fn parse_capability_buffer(buffer: &[u8]) -> Result<CapabilityBuffer> {
    let word = read_u32(buffer, 0)?;
    let header = CapabilityHeader {
        total_length: (word & 0xFFFF) as u16,
        device_role: ((word >> 16) & 0x3) as u8,
        data_type: ((word >> 18) & 0x3) as u8,
        error_code: ((word >> 24) & 0xFF) as u8,
    };

    if header.error_code == DEVICE_DOES_NOT_CONTAIN_CAPABILITY_DATA {
        return Ok(CapabilityBuffer {
            header,
            bus: None,
            devices: Vec::new(),
        });
    }
    if header.error_code != DEVICE_CONTAINS_CAPABILITY_DATA {
        return Err(Error::MalformedFrame("unknown capability error code").into());
    }

    let w0 = read_u32(buffer, CAPABILITY_HEADER_SIZE)?;
    let w1 = read_u32(buffer, CAPABILITY_HEADER_SIZE + 4)?;
    let w2 = read_u32(buffer, CAPABILITY_HEADER_SIZE + 8)?;
    let w3 = read_u32(buffer, CAPABILITY_HEADER_SIZE + 12)?;
    let w4 = read_u32(buffer, CAPABILITY_HEADER_SIZE + 16)?;
    let w5 = read_u32(buffer, CAPABILITY_HEADER_SIZE + 20)?;
    let w6 = read_u32(buffer, CAPABILITY_HEADER_SIZE + 24)?;
    let w7 = read_u32(buffer, CAPABILITY_HEADER_SIZE + 28)?;
    let w8 = read_u32(buffer, CAPABILITY_HEADER_SIZE + 32)?;

    let bus = CapabilityBus {
        i3c_device_address: (w0 & 0xFF) as u8,
        devices_present: ((w0 >> 8) & 0xFF) as u8,
        handoff_controller_role: (w0 >> 20) & 0x1 != 0,
        hot_join_capability: (w0 >> 21) & 0x1 != 0,
        in_band_interrupt_capability: (w0 >> 22) & 0x1 != 0,
        pending_read_capability: (w0 >> 24) & 0x1 != 0,
        self_initiated: (w0 >> 25) & 0x1 != 0,
        delayed_pending_read: (w0 >> 26) & 0x1 != 0,
        pending_read_sdr: (w0 >> 27) & 0x1 != 0,
        pending_read_hdr: (w0 >> 28) & 0x1 != 0,
        single_command_pending_read: (w0 >> 31) & 0x1 != 0,
        mipi_minor_version: (w1 & 0xFFFF) as u16,
        mipi_major_version: (w1 >> 16) as u16,
        mipi_disco_minor_version: (w2 & 0xFFFF) as u16,
        mipi_disco_major_version: (w2 >> 16) as u16,
        i2c_data_transfer_rates: (w3 & 0xFF) as u8,
        clock_frequency_i2c_udr1: (w3 >> 16) as u16,
        clock_frequency_i2c_udr2: (w4 & 0xFFFF) as u16,
        clock_frequency_i2c_udr3: (w4 >> 16) as u16,
        i3c_data_transfer_modes: (w5 & 0xFF) as u8,
        i3c_data_transfer_rates: ((w5 >> 8) & 0xFF) as u8,
        transfer_mode_extended_cap_len: (w5 >> 16) as u16,
        clock_frequency_i3c_udr1: w6,
        clock_frequency_i3c_udr2: w7,
        max_ibi_payload_size: w8,
    };

    // device entries start after the bus block and any transfer mode
    // extended capabilities
    let devices_offset =
        CAPABILITY_HEADER_SIZE + CAPABILITY_BUS_SIZE + bus.transfer_mode_extended_cap_len as usize;
    let total = header.total_length as usize;
    if total > buffer.len() || total < devices_offset {
        return Err(Error::MalformedFrame("capability length disagrees with buffer").into());
    }
    let numentries = (total - devices_offset) / CAPABILITY_DEVICE_SIZE;

    let mut devices = Vec::with_capacity(numentries);
    for i in 0..numentries {
        let offset = devices_offset + i * CAPABILITY_DEVICE_SIZE;
        let e0 = read_u32(buffer, offset)?;
        let e1 = read_u32(buffer, offset + 4)?;
        let e2 = read_u32(buffer, offset + 8)?;
        let e3 = read_u32(buffer, offset + 12)?;
        devices.push(CapabilityDeviceEntry {
            address: (e0 & 0xFF) as u8,
            ibi_prioritization: ((e0 >> 8) & 0xFF) as u8,
            pid_lo: (e0 >> 16) as u16,
            pid_hi: e1,
            mipi_disco_minor_version: (e2 & 0xFFFF) as u16,
            mipi_disco_major_version: (e2 >> 16) as u16,
            max_ibi_pending_size: e3,
        });
    }

    Ok(CapabilityBuffer {
        header,
        bus: Some(bus),
        devices,
    })
}

/// Builds a GET_I3C_CAPABILITY response buffer. The driver never sends
/// one of these; bridges and tests do.
pub fn build_capability_buffer(
    header: &CapabilityHeader,
    bus: Option<&CapabilityBus>,
    devices: &[CapabilityDeviceEntry],
) -> Vec<u8> {
    let mut buffer = Vec::new();
    let total_length = match bus {
        Some(_) => {
            CAPABILITY_HEADER_SIZE + CAPABILITY_BUS_SIZE + devices.len() * CAPABILITY_DEVICE_SIZE
        }
        None => CAPABILITY_HEADER_SIZE,
    };
    write_u32(
        &mut buffer,
        (total_length as u32)
            | ((header.device_role as u32) << 16)
            | ((header.data_type as u32) << 18)
            | ((header.error_code as u32) << 24),
    );
    let bus = match bus {
        Some(bus) => bus,
        None => return buffer,
    };

    write_u32(
        &mut buffer,
        (bus.i3c_device_address as u32)
            | ((bus.devices_present as u32) << 8)
            | ((bus.handoff_controller_role as u32) << 20)
            | ((bus.hot_join_capability as u32) << 21)
            | ((bus.in_band_interrupt_capability as u32) << 22)
            | ((bus.pending_read_capability as u32) << 24)
            | ((bus.self_initiated as u32) << 25)
            | ((bus.delayed_pending_read as u32) << 26)
            | ((bus.pending_read_sdr as u32) << 27)
            | ((bus.pending_read_hdr as u32) << 28)
            | ((bus.single_command_pending_read as u32) << 31),
    );
    write_u32(
        &mut buffer,
        (bus.mipi_minor_version as u32) | ((bus.mipi_major_version as u32) << 16),
    );
    write_u32(
        &mut buffer,
        (bus.mipi_disco_minor_version as u32) | ((bus.mipi_disco_major_version as u32) << 16),
    );
    write_u32(
        &mut buffer,
        (bus.i2c_data_transfer_rates as u32) | ((bus.clock_frequency_i2c_udr1 as u32) << 16),
    );
    write_u32(
        &mut buffer,
        (bus.clock_frequency_i2c_udr2 as u32) | ((bus.clock_frequency_i2c_udr3 as u32) << 16),
    );
    write_u32(
        &mut buffer,
        (bus.i3c_data_transfer_modes as u32)
            | ((bus.i3c_data_transfer_rates as u32) << 8)
            | ((bus.transfer_mode_extended_cap_len as u32) << 16),
    );
    write_u32(&mut buffer, bus.clock_frequency_i3c_udr1);
    write_u32(&mut buffer, bus.clock_frequency_i3c_udr2);
    write_u32(&mut buffer, bus.max_ibi_payload_size);

    for device in devices {
        write_u32(
            &mut buffer,
            (device.address as u32)
                | ((device.ibi_prioritization as u32) << 8)
                | ((device.pid_lo as u32) << 16),
        );
        write_u32(&mut buffer, device.pid_hi);
        write_u32(
            &mut buffer,
            (device.mipi_disco_minor_version as u32)
                | ((device.mipi_disco_major_version as u32) << 16),
        );
        write_u32(&mut buffer, device.max_ibi_pending_size);
    }

    buffer
}

/**************************
 * Target device table    *
 **************************/

/// One entry of a GET_TARGET_DEVICE_TABLE buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TargetDeviceTableEntry {
    pub address: u8,
    pub target_interrupt_request: bool,
    pub controller_role_request: bool,
    pub ibi_timestamp: bool,
    pub asa: u8,
    pub daa: bool,
    pub change_flags: u8,
    pub target_type: u8,
    pub pending_read_capability: bool,
    pub valid_pid: bool,
    pub max_ibi_payload_size: u32,
    pub bcr: u8,
    pub dcr: u8,
    pub pid_lo: u16,
    pub pid_hi: u32,
}

/// Parses a GET_TARGET_DEVICE_TABLE buffer into its entries.
pub fn parse_target_device_table_buffer(buffer: &[u8]) -> Result<Vec<TargetDeviceTableEntry>> {
    let word = read_u32(buffer, 0)?;
    let table_size = (word & 0xFFFF) as usize;
    if table_size > buffer.len() || table_size < TARGET_DEVICE_HEADER_SIZE {
        return Err(Error::MalformedFrame("table size disagrees with buffer").into());
    }
    let numentries = (table_size - TARGET_DEVICE_HEADER_SIZE) / TARGET_DEVICE_ENTRY_SIZE;

    let mut entries = Vec::with_capacity(numentries);
    for i in 0..numentries {
        let offset = TARGET_DEVICE_HEADER_SIZE + i * TARGET_DEVICE_ENTRY_SIZE;
        let e0 = read_u32(buffer, offset)?;
        let e1 = read_u32(buffer, offset + 4)?;
        let e2 = read_u32(buffer, offset + 8)?;
        let e3 = read_u32(buffer, offset + 12)?;
        entries.push(TargetDeviceTableEntry {
            address: (e0 & 0xFF) as u8,
            target_interrupt_request: (e0 >> 8) & 0x1 != 0,
            controller_role_request: (e0 >> 9) & 0x1 != 0,
            ibi_timestamp: (e0 >> 10) & 0x1 != 0,
            asa: ((e0 >> 11) & 0x3) as u8,
            daa: (e0 >> 13) & 0x1 != 0,
            change_flags: ((e0 >> 16) & 0xF) as u8,
            target_type: ((e0 >> 20) & 0xF) as u8,
            pending_read_capability: (e0 >> 24) & 0x1 != 0,
            valid_pid: (e0 >> 25) & 0x1 != 0,
            max_ibi_payload_size: e1,
            bcr: (e2 & 0xFF) as u8,
            dcr: ((e2 >> 8) & 0xFF) as u8,
            pid_lo: (e2 >> 16) as u16,
            pid_hi: e3,
        });
    }

    Ok(entries)
}

/// Builds a target device table buffer for INITIALIZE_I3C_BUS and friends.
pub fn build_target_device_table_buffer(entries: &[TargetDeviceTableEntry]) -> Vec<u8> {
    let size = TARGET_DEVICE_HEADER_SIZE + entries.len() * TARGET_DEVICE_ENTRY_SIZE;
    let mut buffer = Vec::with_capacity(size);
    write_u32(&mut buffer, size as u32);
    for entry in entries {
        write_u32(
            &mut buffer,
            (entry.address as u32)
                | ((entry.target_interrupt_request as u32) << 8)
                | ((entry.controller_role_request as u32) << 9)
                | ((entry.ibi_timestamp as u32) << 10)
                | (((entry.asa & 0x3) as u32) << 11)
                | ((entry.daa as u32) << 13)
                | (((entry.change_flags & 0xF) as u32) << 16)
                | (((entry.target_type & 0xF) as u32) << 20)
                | ((entry.pending_read_capability as u32) << 24)
                | ((entry.valid_pid as u32) << 25),
        );
        write_u32(&mut buffer, entry.max_ibi_payload_size);
        write_u32(
            &mut buffer,
            (entry.bcr as u32) | ((entry.dcr as u32) << 8) | ((entry.pid_lo as u32) << 16),
        );
        write_u32(&mut buffer, entry.pid_hi);
    }
    buffer
}

/**************************
 * Device config          *
 **************************/

/// One entry of a SET_TARGET_DEVICE_CONFIG buffer.
#[derive(Clone, Copy, Debug)]
pub struct DeviceConfigEntry {
    pub address: u8,
    pub target_interrupt_request: bool,
    pub controller_role_request: bool,
    pub ibi_timestamp: bool,
    pub max_ibi_payload_size: u32,
}

/// Builds a SET_TARGET_DEVICE_CONFIG buffer.
pub fn build_device_config_buffer(entries: &[DeviceConfigEntry]) -> Vec<u8> {
    let mut buffer =
        Vec::with_capacity(DEVICE_CONFIG_HEADER_SIZE + entries.len() * DEVICE_CONFIG_ENTRY_SIZE);
    write_u32(
        &mut buffer,
        (CHANGE_CONFIG_COMMAND_TYPE as u32) | ((entries.len() as u32 & 0xFF) << 8),
    );
    for entry in entries {
        write_u32(
            &mut buffer,
            (entry.address as u32)
                | ((entry.target_interrupt_request as u32) << 8)
                | ((entry.controller_role_request as u32) << 9)
                | ((entry.ibi_timestamp as u32) << 10),
        );
        write_u32(&mut buffer, entry.max_ibi_payload_size);
    }
    buffer
}

/// Parses a SET_TARGET_DEVICE_CONFIG buffer back into entries.
pub fn parse_device_config_buffer(buffer: &[u8]) -> Result<Vec<DeviceConfigEntry>> {
    let word = read_u32(buffer, 0)?;
    let numentries = ((word >> 8) & 0xFF) as usize;
    let mut entries = Vec::with_capacity(numentries);
    for i in 0..numentries {
        let offset = DEVICE_CONFIG_HEADER_SIZE + i * DEVICE_CONFIG_ENTRY_SIZE;
        let e0 = read_u32(buffer, offset)?;
        let e1 = read_u32(buffer, offset + 4)?;
        entries.push(DeviceConfigEntry {
            address: (e0 & 0xFF) as u8,
            target_interrupt_request: (e0 >> 8) & 0x1 != 0,
            controller_role_request: (e0 >> 9) & 0x1 != 0,
            ibi_timestamp: (e0 >> 10) & 0x1 != 0,
            max_ibi_payload_size: e1,
        });
    }
    Ok(entries)
}

/**************************
 * Address change         *
 **************************/

/// One entry of a CHANGE_DYNAMIC_ADDRESS buffer.
#[derive(Clone, Copy, Debug)]
pub struct AddressChangeEntry {
    pub current_address: u8,
    pub new_address: u8,
    pub pid_lo: u16,
    pub pid_hi: u32,
}

/// Builds a CHANGE_DYNAMIC_ADDRESS buffer.
pub fn build_address_change_buffer(entries: &[AddressChangeEntry]) -> Vec<u8> {
    let mut buffer =
        Vec::with_capacity(ADDRESS_CHANGE_HEADER_SIZE + entries.len() * ADDRESS_CHANGE_ENTRY_SIZE);
    write_u32(
        &mut buffer,
        (ADDRESS_CHANGE_COMMAND_TYPE as u32) | ((entries.len() as u32 & 0xFF) << 8),
    );
    for entry in entries {
        write_u32(
            &mut buffer,
            (entry.current_address as u32)
                | ((entry.new_address as u32) << 8)
                | ((entry.pid_lo as u32) << 16),
        );
        write_u32(&mut buffer, entry.pid_hi);
    }
    buffer
}

/// Parses a CHANGE_DYNAMIC_ADDRESS buffer back into entries.
pub fn parse_address_change_buffer(buffer: &[u8]) -> Result<Vec<AddressChangeEntry>> {
    let word = read_u32(buffer, 0)?;
    let numentries = ((word >> 8) & 0xFF) as usize;
    let mut entries = Vec::with_capacity(numentries);
    for i in 0..numentries {
        let offset = ADDRESS_CHANGE_HEADER_SIZE + i * ADDRESS_CHANGE_ENTRY_SIZE;
        let e0 = read_u32(buffer, offset)?;
        let e1 = read_u32(buffer, offset + 4)?;
        entries.push(AddressChangeEntry {
            current_address: (e0 & 0xFF) as u8,
            new_address: ((e0 >> 8) & 0xFF) as u8,
            pid_lo: (e0 >> 16) as u16,
            pid_hi: e1,
        });
    }
    Ok(entries)
}

/// One entry of a GET_ADDRESS_CHANGE_RESULT buffer.
#[derive(Clone, Copy, Debug)]
pub struct AddressChangeResultEntry {
    pub current_address: u8,
    pub new_address: u8,
    /// false = success, true = failure
    pub failed: bool,
}

/// Parses a GET_ADDRESS_CHANGE_RESULT buffer into its entries.
pub fn parse_address_change_result_buffer(buffer: &[u8]) -> Result<Vec<AddressChangeResultEntry>> {
    let word = read_u32(buffer, 0)?;
    let numentries = ((word >> 8) & 0xFF) as usize;
    let mut entries = Vec::with_capacity(numentries);
    for i in 0..numentries {
        let offset = ADDRESS_CHANGE_RESULT_HEADER_SIZE + i * ADDRESS_CHANGE_RESULT_ENTRY_SIZE;
        let e0 = read_u32(buffer, offset)?;
        entries.push(AddressChangeResultEntry {
            current_address: (e0 & 0xFF) as u8,
            new_address: ((e0 >> 8) & 0xFF) as u8,
            failed: (e0 >> 16) & 0x1 != 0,
        });
    }
    Ok(entries)
}

/// Builds a GET_ADDRESS_CHANGE_RESULT buffer (bridge/test side).
pub fn build_address_change_result_buffer(entries: &[AddressChangeResultEntry]) -> Vec<u8> {
    let size = ADDRESS_CHANGE_RESULT_HEADER_SIZE + entries.len() * ADDRESS_CHANGE_RESULT_ENTRY_SIZE;
    let mut buffer = Vec::with_capacity(size);
    write_u32(
        &mut buffer,
        (size as u32 & 0xFF) | ((entries.len() as u32 & 0xFF) << 8),
    );
    for entry in entries {
        write_u32(
            &mut buffer,
            (entry.current_address as u32)
                | ((entry.new_address as u32) << 8)
                | ((entry.failed as u32) << 16),
        );
    }
    buffer
}

/**************************
 * IBI response frames    *
 **************************/

/// Header of an IBI-tagged bulk response frame.
#[derive(Clone, Copy, Debug)]
pub struct IbiResponseHeader {
    pub sequence_id: u16,
}

/// Footer of an IBI-tagged bulk response frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct IbiResponseFooter {
    pub target_address: u8,
    pub read_not_write: bool,
    pub ibi_status: bool,
    pub error: bool,
    pub ibi_timestamp: bool,
    pub ibi_type: bool,
    pub pending_read: bool,
    pub last_byte: bool,
    /// Number of bytes in the last DWORD that are part of the payload;
    /// zero means the whole last DWORD is valid
    pub bytes_valid: u8,
}

/// Parses the header of an IBI response frame.
pub fn parse_ibi_response_header(buffer: &[u8]) -> Result<IbiResponseHeader> {
    let word = read_u32(buffer, 0)?;
    if word & 0x3 != BulkTag::Ibi as u32 {
        return Err(Error::MalformedFrame("not an IBI response frame").into());
    }
    Ok(IbiResponseHeader {
        sequence_id: (word >> 16) as u16,
    })
}

/// Parses the footer of an IBI response frame (the last DWORD).
pub fn parse_ibi_response_footer(buffer: &[u8]) -> Result<IbiResponseFooter> {
    if buffer.len() < IBI_RESPONSE_HEADER_SIZE + IBI_RESPONSE_FOOTER_SIZE {
        return Err(Error::MalformedFrame("IBI frame shorter than header + footer").into());
    }
    let word = read_u32(buffer, buffer.len() - IBI_RESPONSE_FOOTER_SIZE)?;
    Ok(IbiResponseFooter {
        target_address: (word & 0x7F) as u8,
        read_not_write: (word >> 7) & 0x1 != 0,
        ibi_status: (word >> 8) & 0x1 != 0,
        error: (word >> 9) & 0x1 != 0,
        ibi_timestamp: (word >> 10) & 0x1 != 0,
        ibi_type: (word >> 11) & 0x1 != 0,
        pending_read: (word >> 12) & 0x1 != 0,
        last_byte: (word >> 13) & 0x1 != 0,
        bytes_valid: ((word >> 14) & 0x3) as u8,
    })
}

/// Builds one IBI response frame: header, body, footer. The body must
/// already be DWORD-sized; `bytes_valid` in the footer says how much of
/// its last DWORD is payload.
pub fn build_ibi_response_frame(
    sequence_id: u16,
    body: &[u8],
    footer: &IbiResponseFooter,
) -> Vec<u8> {
    let mut buffer =
        Vec::with_capacity(IBI_RESPONSE_HEADER_SIZE + body.len() + IBI_RESPONSE_FOOTER_SIZE);
    write_u32(
        &mut buffer,
        (BulkTag::Ibi as u32) | ((sequence_id as u32) << 16),
    );
    buffer.extend_from_slice(body);
    write_u32(
        &mut buffer,
        (footer.target_address as u32 & 0x7F)
            | ((footer.read_not_write as u32) << 7)
            | ((footer.ibi_status as u32) << 8)
            | ((footer.error as u32) << 9)
            | ((footer.ibi_timestamp as u32) << 10)
            | ((footer.ibi_type as u32) << 11)
            | ((footer.pending_read as u32) << 12)
            | ((footer.last_byte as u32) << 13)
            | (((footer.bytes_valid & 0x3) as u32) << 14),
    );
    buffer
}

/**************************
 * Notifications          *
 **************************/

/// A decoded 4-byte interrupt notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawNotification {
    pub notification_type: u8,
    pub code: u16,
}

/// Parses an interrupt notification frame.
pub fn parse_notification(buffer: &[u8]) -> Result<RawNotification> {
    if buffer.len() != NOTIFICATION_SIZE {
        return Err(Error::MalformedFrame("notification is not 4 bytes").into());
    }
    let word = read_u32(buffer, 0)?;
    Ok(RawNotification {
        notification_type: (word & 0xFF) as u8,
        code: ((word >> 8) & 0xFFFF) as u16,
    })
}

/// Builds an interrupt notification frame (bridge/test side).
pub fn build_notification(notification_type: u8, code: u16) -> [u8; NOTIFICATION_SIZE] {
    let word = (notification_type as u32) | ((code as u32) << 8);
    word.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ExecutionStatus;
    use crate::types::I3cMode;

    #[test]
    fn dword_block_size_rounds_up() {
        assert_eq!(dword_block_size(0), 0);
        assert_eq!(dword_block_size(1), 4);
        assert_eq!(dword_block_size(4), 4);
        assert_eq!(dword_block_size(19), 20);
    }

    #[test]
    fn bulk_transfer_header_round_trip() {
        for (tag, dep) in [
            (BulkTag::Regular, false),
            (BulkTag::Regular, true),
            (BulkTag::VendorSpecific, false),
        ] {
            let mut buffer = Vec::new();
            put_bulk_transfer_header(&mut buffer, tag, dep);
            assert_eq!(parse_bulk_transfer_header(&buffer).unwrap(), (tag, dep));
        }
    }

    #[test]
    fn bulk_transfer_header_rejects_unknown_tag() {
        assert!(parse_bulk_transfer_header(&3u32.to_le_bytes()).is_err());
    }

    #[test]
    fn command_block_round_trip_with_padding() {
        let mut descriptor = CommandDescriptor::new(&I3cMode::default());
        descriptor.target_address = 5;
        descriptor.data_length = 19;
        let data: &[u8] = b"Arbitrary test data";

        let mut buffer = Vec::new();
        let size = put_command_block(&mut buffer, 42, &descriptor, Some(data));
        assert_eq!(size, COMMAND_BLOCK_HEADER_SIZE + COMMAND_DESCRIPTOR_SIZE + 20);

        // the pad byte leads the data block, the data ends the buffer
        let data_block = &buffer[COMMAND_BLOCK_HEADER_SIZE + COMMAND_DESCRIPTOR_SIZE..];
        assert_eq!(data_block[0], 0);
        assert_eq!(&data_block[1..], data);

        let parsed = parse_command_block(&buffer, 0).unwrap();
        assert_eq!(parsed.request_id, 42);
        assert!(parsed.has_data);
        assert_eq!(parsed.descriptor.target_address, 5);
        assert_eq!(parsed.descriptor.data_length, 19);
        assert_eq!(parsed.data.as_deref(), Some(data));
        assert_eq!(parsed.block_size, size);
    }

    #[test]
    fn read_command_block_has_no_data_block() {
        let mut descriptor = CommandDescriptor::new(&I3cMode::default());
        descriptor.direction = Direction::Read;
        descriptor.data_length = 20;

        let mut buffer = Vec::new();
        let size = put_command_block(&mut buffer, 7, &descriptor, None);
        assert_eq!(size, COMMAND_BLOCK_HEADER_SIZE + COMMAND_DESCRIPTOR_SIZE);

        let parsed = parse_command_block(&buffer, 0).unwrap();
        assert!(!parsed.has_data);
        assert_eq!(parsed.descriptor.direction, Direction::Read);
        assert_eq!(parsed.descriptor.data_length, 20);
    }

    #[test]
    fn response_block_round_trip() {
        let data: &[u8] = b"Arbitrary test data";
        let mut buffer = Vec::new();
        put_response_block(&mut buffer, 9, true, ExecutionStatus::Succeeded, Some(data));

        let parsed = parse_response_block(&buffer, 0).unwrap();
        assert_eq!(parsed.request_id, 9);
        assert!(parsed.attempted);
        assert!(parsed.has_data);
        assert_eq!(parsed.error_status, ExecutionStatus::Succeeded);
        assert_eq!(parsed.data_length, 19);
        assert_eq!(parsed.data.as_deref(), Some(data));
        assert_eq!(parsed.block_size, buffer.len());
    }

    #[test]
    fn unattempted_response_block_has_no_descriptor() {
        let mut buffer = Vec::new();
        put_response_block(&mut buffer, 3, false, ExecutionStatus::Succeeded, None);
        assert_eq!(buffer.len(), RESPONSE_BLOCK_HEADER_SIZE);

        let parsed = parse_response_block(&buffer, 0).unwrap();
        assert!(!parsed.attempted);
        assert_eq!(parsed.data_length, 0);
        assert_eq!(parsed.block_size, RESPONSE_BLOCK_HEADER_SIZE);
    }

    #[test]
    fn response_block_rejects_reserved_status() {
        let mut buffer = Vec::new();
        // attempted, has_data=0
        buffer.extend_from_slice(&((1u32 << 25) | 11).to_le_bytes());
        // error_status = 0x6 (reserved)
        buffer.extend_from_slice(&(0x6u32 << 28).to_le_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes());
        assert!(parse_response_block(&buffer, 0).is_err());
    }

    #[test]
    fn vendor_specific_buffer_pads_leading_bytes() {
        let buffer = build_vendor_specific_buffer(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(buffer.len(), 8);
        let (tag, dep) = parse_bulk_transfer_header(&buffer).unwrap();
        assert_eq!(tag, BulkTag::VendorSpecific);
        assert!(!dep);
        assert_eq!(&buffer[4..], &[0x00, 0xAA, 0xBB, 0xCC]);
    }

    fn sample_bus() -> CapabilityBus {
        CapabilityBus {
            i3c_device_address: 0x0A,
            devices_present: 0x3,
            handoff_controller_role: true,
            hot_join_capability: true,
            in_band_interrupt_capability: true,
            mipi_minor_version: 1,
            mipi_major_version: 1,
            mipi_disco_minor_version: 0,
            mipi_disco_major_version: 1,
            i2c_data_transfer_rates: 0x7,
            clock_frequency_i2c_udr1: 1000,
            i3c_data_transfer_modes: 0xF,
            i3c_data_transfer_rates: 0x1F,
            clock_frequency_i3c_udr1: 12_500,
            max_ibi_payload_size: 256,
            ..Default::default()
        }
    }

    #[test]
    fn capability_buffer_round_trip() {
        let header = CapabilityHeader {
            total_length: 0, // recomputed by the builder
            device_role: 0x1,
            data_type: 0x1,
            error_code: DEVICE_CONTAINS_CAPABILITY_DATA,
        };
        let devices = vec![
            CapabilityDeviceEntry {
                address: 100,
                ibi_prioritization: 1,
                pid_lo: 0xBEEF,
                pid_hi: 0xDEAD_0000,
                mipi_disco_minor_version: 0,
                mipi_disco_major_version: 1,
                max_ibi_pending_size: 64,
            },
            CapabilityDeviceEntry {
                address: 101,
                ..Default::default()
            },
        ];
        let buffer = build_capability_buffer(&header, Some(&sample_bus()), &devices);
        let parsed = parse_capability_buffer(&buffer).unwrap();

        assert_eq!(parsed.header.device_role, 0x1);
        assert_eq!(parsed.header.total_length as usize, buffer.len());
        let bus = parsed.bus.unwrap();
        assert_eq!(bus.i3c_device_address, 0x0A);
        assert!(bus.handoff_controller_role);
        assert_eq!(bus.max_ibi_payload_size, 256);
        assert_eq!(parsed.devices.len(), 2);
        assert_eq!(parsed.devices[0].address, 100);
        assert_eq!(parsed.devices[0].pid_lo, 0xBEEF);
        assert_eq!(parsed.devices[0].pid_hi, 0xDEAD_0000);

        // byte-exact: rebuilding the parsed form reproduces the buffer
        let rebuilt = build_capability_buffer(
            &parsed.header,
            Some(&bus),
            &parsed.devices,
        );
        assert_eq!(rebuilt, buffer);
    }

    #[test]
    fn capability_buffer_without_data_is_header_only() {
        let header = CapabilityHeader {
            total_length: 0,
            device_role: 0,
            data_type: 0,
            error_code: DEVICE_DOES_NOT_CONTAIN_CAPABILITY_DATA,
        };
        let buffer = build_capability_buffer(&header, None, &[]);
        assert_eq!(buffer.len(), CAPABILITY_HEADER_SIZE);
        let parsed = parse_capability_buffer(&buffer).unwrap();
        assert!(parsed.bus.is_none());
        assert!(parsed.devices.is_empty());
    }

    #[test]
    fn target_device_table_round_trip() {
        let entries = vec![
            TargetDeviceTableEntry {
                address: 100,
                target_interrupt_request: true,
                asa: 0x2,
                daa: true,
                target_type: 0,
                valid_pid: true,
                max_ibi_payload_size: 128,
                bcr: 0x42,
                dcr: 0x17,
                pid_lo: 0x1234,
                pid_hi: 0x5678_9ABC,
                ..Default::default()
            },
            TargetDeviceTableEntry {
                address: 101,
                target_type: 1,
                ..Default::default()
            },
        ];
        let buffer = build_target_device_table_buffer(&entries);
        let parsed = parse_target_device_table_buffer(&buffer).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].address, 100);
        assert!(parsed[0].target_interrupt_request);
        assert_eq!(parsed[0].asa, 0x2);
        assert_eq!(parsed[0].bcr, 0x42);
        assert_eq!(parsed[0].pid_hi, 0x5678_9ABC);
        assert_eq!(build_target_device_table_buffer(&parsed), buffer);
    }

    #[test]
    fn target_device_table_rejects_bad_size() {
        let mut buffer = build_target_device_table_buffer(&[TargetDeviceTableEntry::default()]);
        // claim a table larger than the buffer
        buffer[0] = 0xFF;
        assert!(parse_target_device_table_buffer(&buffer).is_err());
    }

    #[test]
    fn device_config_buffer_round_trip() {
        let entries = vec![DeviceConfigEntry {
            address: 100,
            target_interrupt_request: true,
            controller_role_request: false,
            ibi_timestamp: true,
            max_ibi_payload_size: 256,
        }];
        let buffer = build_device_config_buffer(&entries);
        let parsed = parse_device_config_buffer(&buffer).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].address, 100);
        assert!(parsed[0].target_interrupt_request);
        assert!(!parsed[0].controller_role_request);
        assert!(parsed[0].ibi_timestamp);
        assert_eq!(build_device_config_buffer(&parsed), buffer);
    }

    #[test]
    fn address_change_buffer_round_trip() {
        let entries = vec![AddressChangeEntry {
            current_address: 100,
            new_address: 200,
            pid_lo: 0xBEEF,
            pid_hi: 0xCAFE,
        }];
        let buffer = build_address_change_buffer(&entries);
        let parsed = parse_address_change_buffer(&buffer).unwrap();
        assert_eq!(parsed[0].current_address, 100);
        assert_eq!(parsed[0].new_address, 200);
        assert_eq!(parsed[0].pid_lo, 0xBEEF);
        assert_eq!(build_address_change_buffer(&parsed), buffer);
    }

    #[test]
    fn address_change_result_round_trip() {
        let entries = vec![
            AddressChangeResultEntry {
                current_address: 100,
                new_address: 200,
                failed: false,
            },
            AddressChangeResultEntry {
                current_address: 50,
                new_address: 51,
                failed: true,
            },
        ];
        let buffer = build_address_change_result_buffer(&entries);
        let parsed = parse_address_change_result_buffer(&buffer).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(!parsed[0].failed);
        assert!(parsed[1].failed);
        assert_eq!(build_address_change_result_buffer(&parsed), buffer);
    }

    #[test]
    fn ibi_response_frame_round_trip() {
        let footer = IbiResponseFooter {
            target_address: 0x55,
            read_not_write: true,
            pending_read: true,
            last_byte: true,
            bytes_valid: 2,
            ..Default::default()
        };
        let body = [0x11, 0x22, 0x33, 0x44];
        let frame = build_ibi_response_frame(0, &body, &footer);

        let header = parse_ibi_response_header(&frame).unwrap();
        assert_eq!(header.sequence_id, 0);
        let parsed = parse_ibi_response_footer(&frame).unwrap();
        assert_eq!(parsed.target_address, 0x55);
        assert!(parsed.read_not_write);
        assert!(parsed.pending_read);
        assert!(parsed.last_byte);
        assert_eq!(parsed.bytes_valid, 2);
        assert_eq!(&frame[IBI_RESPONSE_HEADER_SIZE..frame.len() - IBI_RESPONSE_FOOTER_SIZE], &body);
    }

    #[test]
    fn ibi_header_rejects_other_tags() {
        let mut buffer = Vec::new();
        put_bulk_transfer_header(&mut buffer, BulkTag::Regular, false);
        assert!(parse_ibi_response_header(&buffer).is_err());
    }

    #[test]
    fn notification_round_trip() {
        let frame = build_notification(0x6, 1234);
        let parsed = parse_notification(&frame).unwrap();
        assert_eq!(parsed.notification_type, 0x6);
        assert_eq!(parsed.code, 1234);
    }

    #[test]
    fn notification_rejects_wrong_length() {
        assert!(parse_notification(&[0x1, 0x0, 0x0]).is_err());
    }
}
