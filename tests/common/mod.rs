//! Shared test harness: a scripted transport standing in for the USB-I3C
//! bridge. Control-IN requests answer with canned buffers, bulk requests
//! are answered with synthesized response transfers, and tests can push
//! notifications and bulk frames into the device as if the bridge had
//! sent them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::Result;
use rs_usbi3c::commands::{Direction, ExecutionStatus};
use rs_usbi3c::constants::class_requests;
use rs_usbi3c::notification::bus_init_codes;
use rs_usbi3c::notification::notification_types;
use rs_usbi3c::usb::{
    BulkInHandler, ControlInCallback, ControlOutCallback, InterruptHandler, UsbTransport,
};
use rs_usbi3c::wire;

/// One recorded control-OUT transfer.
#[derive(Clone, Debug)]
pub struct ControlOutRecord {
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

struct State {
    capability: Vec<u8>,
    table_buffer: Vec<u8>,
    address_change_result: Vec<u8>,
    vendor_response: Option<Vec<u8>>,
    buffer_available: u32,
    /// Answer regular bulk requests with synthesized responses
    auto_respond: bool,
    /// Code of the bus initialization notification sent after
    /// INITIALIZE_I3C_BUS
    bus_init_code: u16,
    /// Last payload written per target address, served back on reads
    written: HashMap<u8, Vec<u8>>,
    control_out_log: Vec<ControlOutRecord>,
    bulk_out_log: Vec<Vec<u8>>,
}

pub struct MockTransport {
    state: Mutex<State>,
    bulk_in_handler: Mutex<Option<BulkInHandler>>,
    interrupt_handler: Mutex<Option<InterruptHandler>>,
    event_count: Mutex<u64>,
    event_cond: Condvar,
    timeout: Mutex<Duration>,
}

impl MockTransport {
    pub fn new() -> Arc<MockTransport> {
        Arc::new(MockTransport {
            state: Mutex::new(State {
                capability: controller_capability(&[]),
                table_buffer: wire::build_target_device_table_buffer(&[]),
                address_change_result: wire::build_address_change_result_buffer(&[]),
                vendor_response: None,
                buffer_available: 0x10000,
                auto_respond: true,
                bus_init_code: bus_init_codes::SUCCESSFUL_I3C_BUS_INITIALIZATION,
                written: HashMap::new(),
                control_out_log: Vec::new(),
                bulk_out_log: Vec::new(),
            }),
            bulk_in_handler: Mutex::new(None),
            interrupt_handler: Mutex::new(None),
            event_count: Mutex::new(0),
            event_cond: Condvar::new(),
            timeout: Mutex::new(Duration::from_millis(100)),
        })
    }

    pub fn set_capability(&self, buffer: Vec<u8>) {
        self.state.lock().unwrap().capability = buffer;
    }

    pub fn set_table_buffer(&self, buffer: Vec<u8>) {
        self.state.lock().unwrap().table_buffer = buffer;
    }

    pub fn set_address_change_result(&self, buffer: Vec<u8>) {
        self.state.lock().unwrap().address_change_result = buffer;
    }

    pub fn set_vendor_response(&self, frame: Vec<u8>) {
        self.state.lock().unwrap().vendor_response = Some(frame);
    }

    pub fn set_buffer_available(&self, bytes: u32) {
        self.state.lock().unwrap().buffer_available = bytes;
    }

    pub fn set_auto_respond(&self, enabled: bool) {
        self.state.lock().unwrap().auto_respond = enabled;
    }

    pub fn set_bus_init_code(&self, code: u16) {
        self.state.lock().unwrap().bus_init_code = code;
    }

    pub fn control_out_log(&self) -> Vec<ControlOutRecord> {
        self.state.lock().unwrap().control_out_log.clone()
    }

    pub fn bulk_out_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().bulk_out_log.clone()
    }

    /// Pushes one interrupt notification into the device.
    pub fn deliver_notification(&self, notification_type: u8, code: u16) {
        let frame = wire::build_notification(notification_type, code);
        if let Some(handler) = self.interrupt_handler.lock().unwrap().as_mut() {
            handler(&frame);
        }
        self.signal_event();
    }

    /// Pushes one bulk-IN transfer into the device.
    pub fn deliver_bulk_response(&self, frame: &[u8]) {
        if let Some(handler) = self.bulk_in_handler.lock().unwrap().as_mut() {
            handler(frame);
        }
        self.signal_event();
    }

    fn signal_event(&self) {
        let mut count = self.event_count.lock().unwrap();
        *count += 1;
        self.event_cond.notify_all();
    }

    /// Builds the response transfer for one regular bulk request: writes
    /// land in per-address memory and succeed, reads serve that memory
    /// back.
    fn synthesize_regular_response(state: &mut State, buffer: &[u8]) -> Option<Vec<u8>> {
        let mut response = Vec::new();
        wire::put_bulk_transfer_header(&mut response, wire::BulkTag::Regular, false);

        let mut offset = wire::BULK_TRANSFER_HEADER_SIZE;
        let mut blocks = 0;
        while offset < buffer.len() {
            let block = wire::parse_command_block(buffer, offset).ok()?;
            offset += block.block_size;
            blocks += 1;

            match block.descriptor.direction {
                Direction::Write => {
                    if let Some(data) = block.data {
                        state.written.insert(block.descriptor.target_address, data);
                    }
                    wire::put_response_block(
                        &mut response,
                        block.request_id,
                        true,
                        ExecutionStatus::Succeeded,
                        None,
                    );
                }
                Direction::Read => {
                    let data = state
                        .written
                        .get(&block.descriptor.target_address)
                        .cloned()
                        .unwrap_or_default();
                    let data = if data.is_empty() { None } else { Some(data) };
                    wire::put_response_block(
                        &mut response,
                        block.request_id,
                        true,
                        ExecutionStatus::Succeeded,
                        data.as_deref(),
                    );
                }
            }
        }

        (blocks > 0).then_some(response)
    }
}

impl UsbTransport for MockTransport {
    fn control_in(&self, request: u8, _value: u16, _index: u16, buffer: &mut [u8]) -> Result<usize> {
        let state = self.state.lock().unwrap();
        let response = match request {
            class_requests::GET_I3C_CAPABILITY => &state.capability,
            class_requests::GET_TARGET_DEVICE_TABLE => &state.table_buffer,
            class_requests::GET_ADDRESS_CHANGE_RESULT => &state.address_change_result,
            class_requests::GET_BUFFER_AVAILABLE => {
                let bytes = state.buffer_available.to_le_bytes();
                buffer[..4].copy_from_slice(&bytes);
                return Ok(4);
            }
            _ => panic!("unexpected control-in request {request:#x}"),
        };
        buffer[..response.len()].copy_from_slice(response);
        Ok(response.len())
    }

    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        let bus_init_code = {
            let mut state = self.state.lock().unwrap();
            state.control_out_log.push(ControlOutRecord {
                request,
                value,
                index,
                data: data.to_vec(),
            });
            (request == class_requests::INITIALIZE_I3C_BUS).then_some(state.bus_init_code)
        };

        // the bridge reports the outcome of a bus initialization through
        // a notification
        if let Some(code) = bus_init_code {
            self.deliver_notification(notification_types::I3C_BUS_INITIALIZATION_STATUS, code);
        }
        self.signal_event();
        Ok(())
    }

    fn control_in_async(
        &self,
        request: u8,
        value: u16,
        index: u16,
        on_complete: ControlInCallback,
    ) -> Result<()> {
        let mut buffer = vec![0u8; self.max_control_buffer_size()];
        let read = self.control_in(request, value, index, &mut buffer)?;
        buffer.truncate(read);
        on_complete(Ok(buffer));
        self.signal_event();
        Ok(())
    }

    fn control_out_async(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        on_complete: ControlOutCallback,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.control_out_log.push(ControlOutRecord {
                request,
                value,
                index,
                data: data.to_vec(),
            });
        }
        on_complete(Ok(()));
        self.signal_event();
        Ok(())
    }

    fn bulk_out(&self, data: &[u8]) -> Result<()> {
        let (regular_response, vendor_response) = {
            let mut state = self.state.lock().unwrap();
            state.bulk_out_log.push(data.to_vec());

            match wire::parse_bulk_transfer_header(data) {
                Ok((wire::BulkTag::Regular, _)) if state.auto_respond => {
                    (Self::synthesize_regular_response(&mut state, data), None)
                }
                Ok((wire::BulkTag::VendorSpecific, _)) => (None, state.vendor_response.clone()),
                _ => (None, None),
            }
        };

        if let Some(response) = regular_response {
            self.deliver_bulk_response(&response);
        }
        if let Some(response) = vendor_response {
            self.deliver_bulk_response(&response);
        }
        self.signal_event();
        Ok(())
    }

    fn start_bulk_in_polling(&self, handler: BulkInHandler) -> Result<()> {
        *self.bulk_in_handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn bulk_in_polling_active(&self) -> bool {
        self.bulk_in_handler.lock().unwrap().is_some()
    }

    fn start_interrupt_polling(&self, handler: InterruptHandler) -> Result<()> {
        *self.interrupt_handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn wait_for_next_event(&self, timeout: Duration) -> bool {
        let count = self.event_count.lock().unwrap();
        let seen = *count;
        let (_guard, result) = self
            .event_cond
            .wait_timeout_while(count, timeout, |current| *current == seen)
            .unwrap();
        !result.timed_out()
    }

    fn set_timeout(&self, timeout: Duration) -> Duration {
        std::mem::replace(&mut self.timeout.lock().unwrap(), timeout)
    }

    fn timeout(&self) -> Duration {
        *self.timeout.lock().unwrap()
    }

    fn last_error(&self) -> Option<rusb::Error> {
        None
    }
}

/// A capability buffer for a primary controller that knows its bus when
/// `devices` is non-empty.
pub fn controller_capability(devices: &[wire::CapabilityDeviceEntry]) -> Vec<u8> {
    let header = wire::CapabilityHeader {
        total_length: 0,
        device_role: 0x1,
        data_type: if devices.is_empty() { 0x2 } else { 0x1 },
        error_code: wire::DEVICE_CONTAINS_CAPABILITY_DATA,
    };
    let bus = wire::CapabilityBus {
        i3c_device_address: 0x08,
        handoff_controller_role: true,
        hot_join_capability: true,
        in_band_interrupt_capability: true,
        max_ibi_payload_size: 256,
        ..Default::default()
    };
    wire::build_capability_buffer(&header, Some(&bus), devices)
}

/// A capability buffer for a device with a target role; secondary set
/// gives it the secondary controller capability.
pub fn target_capability(secondary: bool) -> Vec<u8> {
    let header = wire::CapabilityHeader {
        total_length: 0,
        device_role: if secondary { 0x3 } else { 0x2 },
        data_type: 0x2,
        error_code: wire::DEVICE_CONTAINS_CAPABILITY_DATA,
    };
    let bus = wire::CapabilityBus {
        i3c_device_address: 0x09,
        ..Default::default()
    };
    wire::build_capability_buffer(&header, Some(&bus), &[])
}

/// A capability buffer whose header reports no capability data at all.
pub fn absent_capability() -> Vec<u8> {
    let header = wire::CapabilityHeader {
        total_length: 0,
        device_role: 0,
        data_type: 0,
        error_code: wire::DEVICE_DOES_NOT_CONTAIN_CAPABILITY_DATA,
    };
    wire::build_capability_buffer(&header, None, &[])
}

/// A target device table buffer with one I3C device per address.
pub fn table_with(addresses: &[u8]) -> Vec<u8> {
    let entries: Vec<wire::TargetDeviceTableEntry> = addresses
        .iter()
        .map(|&address| wire::TargetDeviceTableEntry {
            address,
            valid_pid: true,
            pid_lo: address as u16,
            pid_hi: 0xCAFE,
            bcr: 0x42,
            dcr: 0x17,
            max_ibi_payload_size: 64,
            ..Default::default()
        })
        .collect();
    wire::build_target_device_table_buffer(&entries)
}
