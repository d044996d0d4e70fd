//! ## Initialization
//!
//! A set of functions to help discover and open USB-I3C devices.
//!

use crate::{
    constants::usb::*,
    error::Error,
    types::{DeviceAddr, DeviceId, DeviceMode, Endpoint, I3cEndpoints, UsbDeviceInfo},
};

use anyhow::Result;
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Direction, TransferType, UsbContext};

fn is_i3c_device<T: UsbContext>(device: &Device<T>, device_desc: &DeviceDescriptor) -> bool {
    (0..device_desc.num_configurations()).any(move |config_no| {
        if let Ok(config_desc) = device.config_descriptor(config_no) {
            config_desc.interfaces().any(|interface| {
                interface
                    .descriptors()
                    .any(|interface_desc| interface_desc.class_code() == USBI3C_CLASS_CODE)
            })
        } else {
            false
        }
    })
}

fn matches_ids(device_desc: &DeviceDescriptor, vendor_id: Option<u16>, product_id: Option<u16>) -> bool {
    vendor_id.map_or(true, |id| device_desc.vendor_id() == id)
        && product_id.map_or(true, |id| device_desc.product_id() == id)
}

/// ### List Devices
///
/// List all USB-I3C devices matching the optional vendor and product IDs.
///
pub fn list_devices<T: UsbContext>(
    context: &mut T,
    vendor_id: Option<u16>,
    product_id: Option<u16>,
) -> Result<Vec<UsbDeviceInfo>> {
    Ok(context
        .devices()?
        .iter()
        .filter_map(|device| {
            let device_desc = device.device_descriptor().ok()?;
            if is_i3c_device(&device, &device_desc) && matches_ids(&device_desc, vendor_id, product_id)
            {
                Some(UsbDeviceInfo {
                    id: DeviceId {
                        vendor_id: device_desc.vendor_id(),
                        product_id: device_desc.product_id(),
                    },
                    address: DeviceAddr {
                        bus: device.bus_number(),
                        device: device.address(),
                    },
                })
            } else {
                None
            }
        })
        .collect())
}

/// ### Open Device
///
/// Open the first USB-I3C device matching the optional vendor and product IDs.
///
pub fn open_device<T: UsbContext>(
    context: &mut T,
    vendor_id: Option<u16>,
    product_id: Option<u16>,
) -> Result<(Device<T>, DeviceHandle<T>)> {
    let devices = context.devices()?;

    for device in devices.iter() {
        if let Ok(device_desc) = device.device_descriptor() {
            if is_i3c_device(&device, &device_desc)
                && matches_ids(&device_desc, vendor_id, product_id)
            {
                if let Ok(handle) = device.open() {
                    return Ok((device, handle));
                }
            }
        }
    }

    Err(Error::DeviceNotFound.into())
}

/// ### Get I3C Mode
///
/// Get the device mode (configuration, interface and interface setting)
/// that carries the I3C class interface.
///
pub fn get_i3c_mode(device: &Device<Context>) -> Result<DeviceMode> {
    let device_desc = device.device_descriptor()?;

    for n in 0..device_desc.num_configurations() {
        let config_desc = device.config_descriptor(n)?;
        for interface in config_desc.interfaces() {
            for interface_desc in interface.descriptors() {
                if interface_desc.class_code() == USBI3C_CLASS_CODE {
                    return Ok(DeviceMode {
                        config_number: config_desc.number(),
                        interface_number: interface_desc.interface_number(),
                        setting_number: interface_desc.setting_number(),
                        has_kernel_driver: false,
                    });
                }
            }
        }
    }

    Err(Error::DeviceIncompatible.into())
}

/// ### Detach Kernel Driver
///
/// If the interface uses a kernel driver, detach it for the duration of the program.
///
pub fn detach_kernel_driver(
    mode: &mut DeviceMode,
    handle: &mut DeviceHandle<Context>,
) -> Result<()> {
    mode.has_kernel_driver = match handle.kernel_driver_active(mode.interface_number) {
        Ok(true) => {
            handle.detach_kernel_driver(mode.interface_number)?;
            true
        }
        _ => false,
    };

    Ok(())
}

/// ### Get Endpoints
///
/// Get the endpoints of the I3C interface. The device class mandates a
/// bulk-IN/OUT pair and an interrupt-IN endpoint.
///
pub fn get_endpoints(mode: &DeviceMode, device: &Device<Context>) -> Result<I3cEndpoints> {
    let mut endpoints_list: Vec<Endpoint> = Vec::new();

    let config_desc = device.config_descriptor(mode.config_number - 1)?;
    let interface = config_desc
        .interfaces()
        .find(|inter| inter.number() == mode.interface_number)
        .ok_or(Error::DeviceIncompatible)?;
    let interface_desc = interface
        .descriptors()
        .find(|d| d.setting_number() == mode.setting_number)
        .ok_or(Error::DeviceIncompatible)?;

    for endpoint in interface_desc.endpoint_descriptors() {
        endpoints_list.push(Endpoint {
            address: endpoint.address(),
            max_packet_size: endpoint.max_packet_size(),
            transfer_type: endpoint.transfer_type(),
            direction: endpoint.direction(),
        })
    }

    let bulk_out_ep = endpoints_list
        .iter()
        .find(|ep| ep.transfer_type == TransferType::Bulk && ep.direction == Direction::Out)
        .cloned()
        .ok_or(Error::BulkEndpointNotFound)?;
    let bulk_in_ep = endpoints_list
        .iter()
        .find(|ep| ep.transfer_type == TransferType::Bulk && ep.direction == Direction::In)
        .cloned()
        .ok_or(Error::BulkEndpointNotFound)?;
    let interrupt_ep = endpoints_list
        .iter()
        .find(|ep| ep.transfer_type == TransferType::Interrupt && ep.direction == Direction::In)
        .cloned()
        .ok_or(Error::InterruptEndpointNotFound)?;

    Ok(I3cEndpoints {
        bulk_out_ep,
        bulk_in_ep,
        interrupt_ep,
    })
}
