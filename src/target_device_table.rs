//! ## Target Device Table
//!
//! The authoritative local mirror of the devices on the I3C bus, ordered
//! by insertion, plus the tracker for outstanding address change
//! requests. The table follows bus membership as asynchronous
//! notifications arrive: dynamic address changes are applied after the
//! bridge confirms them, and hot-joined devices are inserted when the
//! refreshed table is fetched.
//!

use std::sync::{Arc, Mutex};

use crate::constants::class_requests;
use crate::constants::usb::CONTROL_ENDPOINT_INDEX;
use crate::error::Error;
use crate::list::OrderedList;
use crate::notification::address_change_codes;
use crate::target_device::TargetDevice;
use crate::usb::UsbTransport;
use crate::wire;

use anyhow::Result;
use log::{debug, warn};

/// ### Address Change Status
///
/// The result of an I3C target device address change request.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressChangeStatus {
    /// The dynamic address was changed successfully
    Succeeded,
    /// The dynamic address failed to be changed
    Failed,
}

/// Callback executed when an address change request is processed:
/// `(old_address, new_address, status)`.
pub type OnAddressChange = Box<dyn FnMut(u8, u8, AddressChangeStatus) + Send>;

/// Callback executed after a device hot-joins the bus, with its address.
pub type OnHotJoin = Box<dyn FnMut(u8) + Send>;

/// One pending address change, keyed by `(old << 8) | new`.
struct AddressChangeRequest {
    request_id: u16,
    on_address_change: OnAddressChange,
}

struct TableState {
    devices: OrderedList<TargetDevice>,
    address_change_tracker: OrderedList<AddressChangeRequest>,
    /// Insert events are disabled during initial population and default
    /// configuration so those writes do not fire hot-join callbacks
    events_enabled: bool,
}

/// ### Target Device Table
///
/// One exclusive lock guards both the device list and the address change
/// tracker. User callbacks are invoked with the lock released.
///
pub struct TargetDeviceTable {
    state: Mutex<TableState>,
    on_insert: Mutex<Option<OnHotJoin>>,
}

impl Default for TargetDeviceTable {
    fn default() -> TargetDeviceTable {
        TargetDeviceTable::new()
    }
}

impl TargetDeviceTable {
    pub fn new() -> TargetDeviceTable {
        TargetDeviceTable {
            state: Mutex::new(TableState {
                devices: OrderedList::new(),
                address_change_tracker: OrderedList::new(),
                events_enabled: false,
            }),
            on_insert: Mutex::new(None),
        }
    }

    /// Inserts a device, rejecting duplicate non-zero addresses. Fires
    /// the hot-join callback when table events are enabled.
    pub fn insert(&self, device: TargetDevice) -> Result<()> {
        let address = device.target_address;
        let fire_event = {
            let mut state = self.state.lock().unwrap();
            if address != 0
                && state
                    .devices
                    .search(|d| d.target_address == address)
                    .is_some()
            {
                return Err(Error::Duplicate.into());
            }
            state.devices.append(device);
            state.events_enabled
        };

        if fire_event {
            if let Some(on_insert) = self.on_insert.lock().unwrap().as_mut() {
                on_insert(address);
            }
        }

        Ok(())
    }

    /// Changes the address of a device, atomically under the table lock.
    /// Rejects unknown devices, occupied new addresses, and no-ops.
    pub fn change_address(&self, old_address: u8, new_address: u8) -> Result<()> {
        if old_address == new_address {
            return Err(Error::InvalidState("old and new address are the same").into());
        }
        let mut state = self.state.lock().unwrap();
        if state
            .devices
            .search(|d| d.target_address == new_address)
            .is_some()
        {
            return Err(Error::Duplicate.into());
        }
        let device = state
            .devices
            .search_mut(|d| d.target_address == old_address)
            .ok_or(Error::DeviceNotFound)?;
        device.target_address = new_address;
        Ok(())
    }

    /// Removes and returns the device with the given address.
    pub fn remove(&self, address: u8) -> Option<TargetDevice> {
        let mut state = self.state.lock().unwrap();
        state
            .devices
            .remove_first(|d| d.target_address == address)
    }

    /// A snapshot of the device with the given address.
    pub fn get(&self, address: u8) -> Option<TargetDevice> {
        let state = self.state.lock().unwrap();
        state
            .devices
            .search(|d| d.target_address == address)
            .cloned()
    }

    /// A snapshot of the device with the given 48-bit provisioned ID.
    pub fn get_by_pid(&self, pid: u64) -> Option<TargetDevice> {
        let state = self.state.lock().unwrap();
        state.devices.search(|d| d.pid() == pid).cloned()
    }

    /// Runs a closure against the stored device, under the table lock.
    pub(crate) fn with_device_mut<R>(
        &self,
        address: u8,
        f: impl FnOnce(&mut TargetDevice) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock().unwrap();
        state
            .devices
            .search_mut(|d| d.target_address == address)
            .map(f)
    }

    /// The addresses of every device, in insertion order.
    pub fn address_list(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state.devices.iter().map(|d| d.target_address).collect()
    }

    /// A snapshot of every device, in insertion order.
    pub fn devices(&self) -> Vec<TargetDevice> {
        let state = self.state.lock().unwrap();
        state.devices.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upserts devices from GET_I3C_CAPABILITY device entries.
    pub fn fill_from_capability_entries(
        &self,
        entries: &[wire::CapabilityDeviceEntry],
    ) -> Result<()> {
        for entry in entries {
            let updated = self
                .with_device_mut(entry.address, |device| {
                    device.update_from_capability_entry(entry)
                })
                .is_some();
            if !updated {
                self.insert(TargetDevice::from_capability_entry(entry))?;
            }
        }
        Ok(())
    }

    /// Upserts devices from a GET_TARGET_DEVICE_TABLE buffer.
    pub fn fill_from_table_buffer(&self, buffer: &[u8]) -> Result<()> {
        for entry in wire::parse_target_device_table_buffer(buffer)? {
            let updated = self
                .with_device_mut(entry.address, |device| {
                    device.update_from_table_entry(&entry)
                })
                .is_some();
            if !updated {
                self.insert(TargetDevice::from_table_entry(&entry))?;
            }
        }
        Ok(())
    }

    /// Builds the table buffer used by class-specific requests that send
    /// the target device table to the bridge.
    pub fn build_table_buffer(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let entries: Vec<wire::TargetDeviceTableEntry> =
            state.devices.iter().map(|d| d.table_entry()).collect();
        wire::build_target_device_table_buffer(&entries)
    }

    /// Builds a SET_TARGET_DEVICE_CONFIG buffer applying the same 3-bit
    /// config and max IBI payload size to every device in the table.
    pub fn build_set_config_buffer(&self, config: u8, max_ibi_payload_size: u32) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let entries: Vec<wire::DeviceConfigEntry> = state
            .devices
            .iter()
            .map(|device| wire::DeviceConfigEntry {
                address: device.target_address,
                target_interrupt_request: config & 0x1 != 0,
                controller_role_request: (config >> 1) & 0x1 != 0,
                ibi_timestamp: device.device_data.ibi_timestamp,
                max_ibi_payload_size,
            })
            .collect();
        wire::build_device_config_buffer(&entries)
    }

    /// Counts the devices supporting static vs. dynamic address
    /// assignment. A device with neither a static address nor a
    /// provisioned ID makes the table invalid for bus initialization.
    pub fn identify_devices(&self) -> Result<(usize, usize)> {
        let state = self.state.lock().unwrap();
        let mut support_static = 0;
        let mut support_dynamic = 0;
        for device in state.devices.iter() {
            if device.device_capability.static_address != 0 {
                // an I2C device or an I2C-capable I3C device, reachable
                // with SETDASA and/or SETAASA
                support_static += 1;
            } else {
                if device.pid_lo == 0 && device.pid_hi == 0 {
                    return Err(Error::InvalidState(
                        "a device in the table has no static address nor a provisioned id",
                    )
                    .into());
                }
                support_dynamic += 1;
            }
        }
        Ok((support_static, support_dynamic))
    }

    /// Registers the user callback for a submitted address change,
    /// keyed by `(old << 8) | new`.
    pub fn register_address_change(
        &self,
        old_address: u8,
        new_address: u8,
        on_address_change: OnAddressChange,
    ) {
        let mut state = self.state.lock().unwrap();
        state.address_change_tracker.append(AddressChangeRequest {
            request_id: ((old_address as u16) << 8) | new_address as u16,
            on_address_change,
        });
    }

    /// Installs the callback fired when a device hot-joins the bus.
    pub fn on_insert(&self, on_hotjoin: OnHotJoin) {
        *self.on_insert.lock().unwrap() = Some(on_hotjoin);
    }

    /// Enables insert events. Called once bus initialization completes so
    /// default-configuration writes do not fire hot-join callbacks.
    pub fn enable_events(&self) {
        self.state.lock().unwrap().events_enabled = true;
    }

    pub(crate) fn events_enabled(&self) -> bool {
        self.state.lock().unwrap().events_enabled
    }

    pub(crate) fn set_events_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().events_enabled = enabled;
    }

    /// Applies a parsed GET_ADDRESS_CHANGE_RESULT buffer: updates the
    /// table for each successful entry, then fires and retires the
    /// matching address change callback.
    pub fn apply_address_change_results(&self, entries: &[wire::AddressChangeResultEntry]) {
        for entry in entries {
            let status = if entry.failed {
                warn!(
                    "the I3C function reported that the address change failed from {} to {}",
                    entry.current_address, entry.new_address
                );
                AddressChangeStatus::Failed
            } else {
                if let Err(error) = self.change_address(entry.current_address, entry.new_address) {
                    debug!(
                        "failed changing device address from {} to {}: {error}",
                        entry.current_address, entry.new_address
                    );
                }
                AddressChangeStatus::Succeeded
            };

            let request_id = ((entry.current_address as u16) << 8) | entry.new_address as u16;
            let request = {
                let mut state = self.state.lock().unwrap();
                state
                    .address_change_tracker
                    .remove_first(|r| r.request_id == request_id)
            };
            match request {
                Some(mut request) => {
                    (request.on_address_change)(entry.current_address, entry.new_address, status);
                }
                None => {
                    debug!(
                        "no address change request matches old address {}, new address {}",
                        entry.current_address, entry.new_address
                    );
                }
            }
        }
    }

    /// Handles the "Address Change Status" notification.
    ///
    /// The bridge sends it when dynamic addresses were changed, and when
    /// a hot-joined device was assigned an address. Either way the
    /// details arrive through a follow-up control request issued
    /// asynchronously from here.
    pub fn handle_notification(table: &Arc<TargetDeviceTable>, usb: &Arc<dyn UsbTransport>, code: u16) {
        match code {
            address_change_codes::HOTJOIN_ADDRESS_ASSIGNMENT_FAILED => {
                warn!("there was a failure assigning an address for a hot-join");
            }
            address_change_codes::ALL_ADDRESS_CHANGE_SUCCEEDED
            | address_change_codes::SOME_ADDRESS_CHANGE_FAILED => {
                let table = Arc::clone(table);
                if usb
                    .control_in_async(
                        class_requests::GET_ADDRESS_CHANGE_RESULT,
                        0,
                        CONTROL_ENDPOINT_INDEX,
                        Box::new(move |result| match result {
                            Ok(buffer) => match wire::parse_address_change_result_buffer(&buffer) {
                                Ok(entries) => table.apply_address_change_results(&entries),
                                Err(error) => {
                                    warn!("malformed address change result: {error}")
                                }
                            },
                            Err(error) => {
                                warn!("the GET_ADDRESS_CHANGE_RESULT request failed: {error}")
                            }
                        }),
                    )
                    .is_err()
                {
                    warn!("there was an error submitting the GET_ADDRESS_CHANGE_RESULT request");
                }
            }
            address_change_codes::HOTJOIN_ADDRESS_ASSIGNMENT_SUCCEEDED => {
                let table = Arc::clone(table);
                if usb
                    .control_in_async(
                        class_requests::GET_TARGET_DEVICE_TABLE,
                        0,
                        CONTROL_ENDPOINT_INDEX,
                        Box::new(move |result| match result {
                            Ok(buffer) => {
                                if let Err(error) = table.fill_from_table_buffer(&buffer) {
                                    warn!("failed updating the table after a hot-join: {error}");
                                }
                            }
                            Err(error) => {
                                warn!("the GET_TARGET_DEVICE_TABLE request failed: {error}")
                            }
                        }),
                    )
                    .is_err()
                {
                    warn!("there was an error submitting the GET_TARGET_DEVICE_TABLE request");
                }
            }
            _ => debug!("unknown address change status code {code}"),
        }
    }

    /// Drops every device and pending address change request.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.devices.drain_all();
        state.address_change_tracker.drain_all();
    }
}
