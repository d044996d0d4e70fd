//! ## Control
//!
//! The class-specific control requests of the USB-I3C device class, one
//! function per request. These are thin: each one shapes the setup
//! packet, moves a codec-built buffer, and reports failures as errors.
//!

use crate::constants::class_requests;
use crate::constants::usb::CONTROL_ENDPOINT_INDEX;
use crate::error::Error;
use crate::usb::{ControlOutCallback, UsbTransport};
use crate::wire;

use anyhow::Result;

/// ### Get I3C Capability
///
/// Reads and parses the capability structure of the I3C device.
///
pub fn get_i3c_capability(usb: &dyn UsbTransport) -> Result<wire::CapabilityBuffer> {
    // the size of the capability structure is unknown until the response
    // arrives, so request the largest buffer the transfer type allows
    let mut buffer = vec![0u8; usb.max_control_buffer_size()];
    let read = usb.control_in(
        class_requests::GET_I3C_CAPABILITY,
        0,
        CONTROL_ENDPOINT_INDEX,
        &mut buffer,
    )?;
    buffer.truncate(read);
    wire::parse_capability_buffer(&buffer)
}

/// ### Get Target Device Table
///
/// Reads the raw target device table buffer from the bridge.
///
pub fn get_target_device_table(usb: &dyn UsbTransport) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; usb.max_control_buffer_size()];
    let read = usb.control_in(
        class_requests::GET_TARGET_DEVICE_TABLE,
        0,
        CONTROL_ENDPOINT_INDEX,
        &mut buffer,
    )?;
    buffer.truncate(read);
    Ok(buffer)
}

/// ### Set Target Device Config
///
/// Sends a codec-built configuration buffer (header + N entries).
///
pub fn set_target_device_config(usb: &dyn UsbTransport, buffer: &[u8]) -> Result<()> {
    usb.control_out(
        class_requests::SET_TARGET_DEVICE_CONFIG,
        0,
        CONTROL_ENDPOINT_INDEX,
        buffer,
    )
}

/// ### Initialize I3C Bus
///
/// Requests bus initialization with the chosen dynamic address
/// assignment mode in the setup value.
///
pub fn initialize_i3c_bus(usb: &dyn UsbTransport, address_assignment_mode: u16) -> Result<()> {
    usb.control_out(
        class_requests::INITIALIZE_I3C_BUS,
        address_assignment_mode,
        CONTROL_ENDPOINT_INDEX,
        &[],
    )
}

/// ### Change Dynamic Address
///
/// Sends a codec-built address change buffer (header + entries). The
/// result arrives later through an ADDRESS_CHANGE_STATUS notification.
///
pub fn change_dynamic_address(usb: &dyn UsbTransport, buffer: &[u8]) -> Result<()> {
    usb.control_out(
        class_requests::CHANGE_DYNAMIC_ADDRESS,
        0,
        CONTROL_ENDPOINT_INDEX,
        buffer,
    )
}

/// ### Get Buffer Available
///
/// Queries how many bytes of buffer the I3C function has available for
/// bulk requests and their responses.
///
pub fn get_buffer_available(usb: &dyn UsbTransport) -> Result<u32> {
    let mut buffer = [0u8; 4];
    let read = usb.control_in(
        class_requests::GET_BUFFER_AVAILABLE,
        0,
        CONTROL_ENDPOINT_INDEX,
        &mut buffer,
    )?;
    if read != buffer.len() {
        return Err(Error::MalformedFrame("buffer available response is not a DWORD").into());
    }
    Ok(u32::from_le_bytes(buffer))
}

/// ### Cancel Bulk Request
///
/// Asynchronously clears the stalled command; the bridge also cancels
/// every subsequent dependent command on its side. The completion
/// callback is where the local tracker gets swept.
///
pub fn cancel_bulk_request_async(
    usb: &dyn UsbTransport,
    on_complete: ControlOutCallback,
) -> Result<()> {
    usb.control_out_async(
        class_requests::CANCEL_OR_RESUME_BULK_REQUEST,
        class_requests::CANCEL_BULK_REQUEST,
        CONTROL_ENDPOINT_INDEX,
        &[],
        on_complete,
    )
}

/// ### Resume Bulk Request
///
/// Asynchronously retries the stalled command; execution continues
/// normally if the retry succeeds.
///
pub fn resume_bulk_request_async(usb: &dyn UsbTransport) -> Result<()> {
    usb.control_out_async(
        class_requests::CANCEL_OR_RESUME_BULK_REQUEST,
        class_requests::RESUME_BULK_REQUEST,
        CONTROL_ENDPOINT_INDEX,
        &[],
        Box::new(|_| {}),
    )
}

/// ### Set / Clear Feature
///
/// Enables or disables the feature selected by `selector`. For features
/// scoped to one target device the address rides in the high byte of the
/// setup index; bus-wide features use address 0.
///
pub fn set_feature(usb: &dyn UsbTransport, selector: u16, address: u8) -> Result<()> {
    usb.control_out(
        class_requests::SET_FEATURE,
        selector,
        ((address as u16) << 8) | CONTROL_ENDPOINT_INDEX,
        &[],
    )
}

pub fn clear_feature(usb: &dyn UsbTransport, selector: u16, address: u8) -> Result<()> {
    usb.control_out(
        class_requests::CLEAR_FEATURE,
        selector,
        ((address as u16) << 8) | CONTROL_ENDPOINT_INDEX,
        &[],
    )
}
