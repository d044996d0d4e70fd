//! # Rust USB-I3C
//!
//! Pure Rust implementation of the USB-I3C device class, to drive I3C and
//! I2C peripherals through a USB bridge.
//!
//! The library discovers 0x3C-class USB devices, initializes the I3C bus
//! behind them, mirrors the target device table, and moves I3C commands
//! and CCCs over the bulk endpoint pair while servicing notifications on
//! the interrupt endpoint: bus initialization results, address changes,
//! hot-joins, bus errors, in-band interrupts, and stall-on-NACK recovery.
//!
//! ## Example
//!
//! The example below connects to the first USB-I3C bridge, initializes
//! the bus, writes to a target and reads back from it.
//!
//! ```no_run
//! use rs_usbi3c::commands::{Direction, ErrorHandling};
//! use rs_usbi3c::I3cDevice;
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     // connect to the device and initialize the I3C bus
//!     let device = I3cDevice::connect(None, None)?;
//!     device.initialize()?;
//!
//!     // write data to the target at address 5
//!     let data = b"Arbitrary test data";
//!     device.enqueue_command(
//!         5,
//!         Direction::Write,
//!         ErrorHandling::TerminateOnAnyError,
//!         data.len() as u32,
//!         Some(&data[..]),
//!         None,
//!     )?;
//!     let responses = device.send_commands(false, Duration::from_secs(10))?;
//!     assert!(responses[0].attempted);
//!
//!     Ok(())
//! }
//! ```
//!

pub mod commands;
pub mod constants;
pub mod error;
pub mod ibi;
pub mod init;
pub mod list;
pub mod notification;
pub mod request_tracker;
pub mod target_device;
pub mod target_device_table;
pub mod types;
pub mod usb;
pub mod wire;
pub mod communication {
    pub mod bulk;
    pub mod control;
}

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use commands::{
    Command, CommandDescriptor, CommandType, Direction, ErrorHandling, ExecutionStatus, OnResponse,
    Response,
};
use communication::{bulk, control};
use constants::{addresses, address_assignment, ccc, feature_selectors};
use ibi::{IbiHandler, OnIbi};
use notification::{
    notification_types, ControllerEventCode, Notification, NotificationDispatcher,
};
use request_tracker::{OnVendorResponse, RequestTracker};
use target_device::{TargetDevice, TargetDeviceInfo, TargetType};
use target_device_table::{OnAddressChange, OnHotJoin, TargetDeviceTable};
use types::{CapabilityDataType, DeviceInfo, DeviceRole, DeviceState, I3cMode, UsbDeviceInfo};
use usb::{RusbTransport, UsbTransport};

pub use error::Error;

use anyhow::Result;
use log::debug;

/// Callback executed after an "I3C Bus Error" notification, with the
/// error code.
pub type OnBusError = Box<dyn FnMut(u16) + Send>;

/// Callback executed when a target device receives an event from the
/// active I3C controller.
pub type OnControllerEvent = Box<dyn FnMut(ControllerEventCode) + Send>;

/// ### I3cDevice
///
/// A USB device with an I3C interface: the single entry point clients
/// see. Owns the device info, the target device table, the request
/// tracker, the IBI machinery and the command queue; everything is torn
/// down with it.
///
pub struct I3cDevice {
    usb: Arc<dyn UsbTransport>,
    device_info: Mutex<Option<DeviceInfo>>,
    table: Arc<TargetDeviceTable>,
    tracker: Arc<RequestTracker>,
    ibi: Arc<IbiHandler>,
    command_queue: Mutex<Vec<Command>>,
    i3c_mode: Mutex<I3cMode>,
    bus_init_status: Arc<Mutex<Option<u16>>>,
    bus_error_handler: Arc<Mutex<Option<OnBusError>>>,
    controller_event_handler: Arc<Mutex<Option<OnControllerEvent>>>,
}

impl I3cDevice {
    /// ### USB-I3C devices
    ///
    /// Get a list of USB-I3C devices, optionally narrowed by vendor and
    /// product ID.
    ///
    pub fn devices(
        vendor_id: Option<u16>,
        product_id: Option<u16>,
    ) -> Result<Vec<UsbDeviceInfo>> {
        let mut context = rusb::Context::new()?;

        init::list_devices(&mut context, vendor_id, product_id)
    }

    /// ### Connect
    ///
    /// Open the first matching USB-I3C device and claim its interface.
    /// The I3C bus is not touched until `initialize` is called.
    ///
    pub fn connect(vendor_id: Option<u16>, product_id: Option<u16>) -> Result<I3cDevice> {
        // setup context
        let mut context = rusb::Context::new()?;
        // attempt to open the device
        let (device, mut handle) = init::open_device(&mut context, vendor_id, product_id)?;

        // GET THE DEVICE MODE
        // ==========
        let mut mode = init::get_i3c_mode(&device)?;
        init::detach_kernel_driver(&mut mode, &mut handle)?;

        // GET ENDPOINTS
        // ==========
        let endpoints = init::get_endpoints(&mode, &device)?;

        // CONFIGURE DEVICE
        // ==========
        handle.set_active_configuration(mode.config_number)?;
        handle.claim_interface(mode.interface_number)?;
        handle.set_alternate_setting(mode.interface_number, mode.setting_number)?;

        let transport = RusbTransport::new(handle, mode, endpoints);
        Ok(I3cDevice::from_transport(Arc::new(transport)))
    }

    /// ### From Transport
    ///
    /// Build a device over any transport implementation. `connect` uses
    /// this with the rusb transport; tests substitute their own bridge.
    ///
    pub fn from_transport(usb: Arc<dyn UsbTransport>) -> I3cDevice {
        I3cDevice {
            usb,
            device_info: Mutex::new(None),
            table: Arc::new(TargetDeviceTable::new()),
            tracker: Arc::new(RequestTracker::new()),
            ibi: Arc::new(IbiHandler::new()),
            command_queue: Mutex::new(Vec::new()),
            i3c_mode: Mutex::new(I3cMode::default()),
            bus_init_status: Arc::new(Mutex::new(None)),
            bus_error_handler: Arc::new(Mutex::new(None)),
            controller_event_handler: Arc::new(Mutex::new(None)),
        }
    }

    /// ### Initialize
    ///
    /// Initialize the I3C device depending on its capabilities.
    ///
    /// The I3C device inside the USB device supports one of three roles:
    /// I3C controller, I3C target device, or target device capable of
    /// secondary controller.
    ///
    /// These are the steps performed as part of the initialization:
    /// - gets the capabilities of the I3C device and its target devices
    /// - starts listening for bulk response transfers and interrupts
    /// - controller role: initializes the I3C bus (device discovery and
    ///   dynamic address assignment), fetches the resulting target device
    ///   table and applies the default target configuration
    /// - target role: requests a hot-join of the already initialized bus
    ///
    pub fn initialize(&self) -> Result<()> {
        if self.usb.bulk_in_polling_active() {
            return Err(Error::InvalidState("the device is already initialized").into());
        }

        // GET CAPABILITIES
        // ==========
        let capability = control::get_i3c_capability(self.usb.as_ref())?;
        let device_info = Self::device_info_from_capability(&capability)?;
        self.table.fill_from_capability_entries(&capability.devices)?;
        let role = device_info.device_role;
        *self.device_info.lock().unwrap() = Some(device_info);

        // ARM POLLING
        // ==========
        // responses to commands and vendor requests arrive via bulk
        // responses at times of the bridge's choosing, so the bulk-IN
        // endpoint is kept polled from here on
        let tracker = Arc::clone(&self.tracker);
        let ibi = Arc::clone(&self.ibi);
        self.usb.start_bulk_in_polling(Box::new(move |buffer| {
            bulk::handle_bulk_response(&tracker, &ibi, buffer);
        }))?;

        self.usb
            .start_interrupt_polling(Box::new(self.build_notification_dispatcher()))?;

        // INITIALIZE THE ROLE
        // ==========
        match role {
            DeviceRole::PrimaryController => self.initialize_controller(),
            DeviceRole::Target | DeviceRole::TargetCapableOfSecondaryController => {
                self.initialize_target_device()
            }
        }
    }

    fn device_info_from_capability(capability: &wire::CapabilityBuffer) -> Result<DeviceInfo> {
        let bus = match &capability.bus {
            None => {
                // the device carries no capability data: the host assumes
                // the controller role with no knowledge of the bus
                return Ok(DeviceInfo {
                    address: 0,
                    device_role: DeviceRole::PrimaryController,
                    data_type: CapabilityDataType::NoStaticData,
                    capabilities: Default::default(),
                    device_state: DeviceState::default(),
                });
            }
            Some(bus) => bus,
        };

        let device_role = DeviceRole::from_wire(capability.header.device_role)
            .ok_or(Error::MalformedFrame("unknown device role"))?;
        let data_type = CapabilityDataType::from_wire(capability.header.data_type)
            .ok_or(Error::MalformedFrame("unknown capability data type"))?;

        Ok(DeviceInfo {
            address: bus.i3c_device_address,
            device_role,
            data_type,
            capabilities: types::BusCapabilities {
                devices_present: bus.devices_present,
                handoff_controller_role: bus.handoff_controller_role,
                hot_join_capability: bus.hot_join_capability,
                in_band_interrupt_capability: bus.in_band_interrupt_capability,
                pending_read_capability: bus.pending_read_capability,
                self_initiated: bus.self_initiated,
                delayed_pending_read: bus.delayed_pending_read,
                pending_read_sdr: bus.pending_read_sdr,
                pending_read_hdr: bus.pending_read_hdr,
                single_command_pending_read: bus.single_command_pending_read,
                i3c_minor_ver: bus.mipi_minor_version,
                i3c_major_ver: bus.mipi_major_version,
                disco_minor_ver: bus.mipi_disco_minor_version,
                disco_major_ver: bus.mipi_disco_major_version,
                i2c_data_transfer_rates: bus.i2c_data_transfer_rates,
                clock_frequency_i2c_udr1: bus.clock_frequency_i2c_udr1,
                clock_frequency_i2c_udr2: bus.clock_frequency_i2c_udr2,
                clock_frequency_i2c_udr3: bus.clock_frequency_i2c_udr3,
                i3c_data_transfer_modes: bus.i3c_data_transfer_modes,
                i3c_data_transfer_rates: bus.i3c_data_transfer_rates,
                transfer_mode_extended_capability_length: bus.transfer_mode_extended_cap_len,
                clock_frequency_i3c_udr1: bus.clock_frequency_i3c_udr1,
                clock_frequency_i3c_udr2: bus.clock_frequency_i3c_udr2,
                max_ibi_payload_size: bus.max_ibi_payload_size,
            },
            device_state: DeviceState::default(),
        })
    }

    /// Builds the dispatch closure for interrupt notifications, with
    /// every per-type handler registered.
    fn build_notification_dispatcher(&self) -> impl FnMut(&[u8]) + Send + 'static {
        let mut dispatcher = NotificationDispatcher::new();

        let bus_init_status = Arc::clone(&self.bus_init_status);
        dispatcher.register(
            notification_types::I3C_BUS_INITIALIZATION_STATUS,
            Box::new(move |notification: Notification| {
                *bus_init_status.lock().unwrap() = Some(notification.code);
            }),
        );

        let table = Arc::clone(&self.table);
        let usb = Arc::clone(&self.usb);
        dispatcher.register(
            notification_types::ADDRESS_CHANGE_STATUS,
            Box::new(move |notification: Notification| {
                TargetDeviceTable::handle_notification(&table, &usb, notification.code);
            }),
        );

        let bus_error_handler = Arc::clone(&self.bus_error_handler);
        dispatcher.register(
            notification_types::I3C_BUS_ERROR,
            Box::new(move |notification: Notification| {
                if let Some(on_bus_error) = bus_error_handler.lock().unwrap().as_mut() {
                    on_bus_error(notification.code);
                }
            }),
        );

        let ibi = Arc::clone(&self.ibi);
        dispatcher.register(
            notification_types::I3C_IBI,
            Box::new(move |notification: Notification| {
                ibi.handle_notification(notification.code);
            }),
        );

        // only populated when the device has a target role; for a
        // controller the handler stays empty and the event is dropped
        let controller_event_handler = Arc::clone(&self.controller_event_handler);
        dispatcher.register(
            notification_types::ACTIVE_I3C_CONTROLLER_EVENT,
            Box::new(move |notification: Notification| {
                let mut handler = controller_event_handler.lock().unwrap();
                match (
                    handler.as_mut(),
                    ControllerEventCode::from_wire(notification.code),
                ) {
                    (Some(on_event), Some(code)) => on_event(code),
                    _ => debug!("unhandled controller event code {}", notification.code),
                }
            }),
        );

        let usb = Arc::clone(&self.usb);
        let tracker = Arc::clone(&self.tracker);
        dispatcher.register(
            notification_types::STALL_ON_NACK,
            Box::new(move |notification: Notification| {
                bulk::handle_stall_on_nack(&usb, &tracker, notification.code);
            }),
        );

        move |buffer: &[u8]| dispatcher.dispatch(buffer)
    }

    /// Initializes the device as the I3C controller: picks the dynamic
    /// address assignment mode, initializes the bus, waits for the
    /// result notification, then mirrors and configures the table.
    fn initialize_controller(&self) -> Result<()> {
        self.request_bus_initialization()?;

        // block until the bus initialization status notification arrives
        let deadline = Instant::now() + Duration::from_secs(60);
        let code = loop {
            if let Some(code) = *self.bus_init_status.lock().unwrap() {
                break code;
            }
            if Instant::now() > deadline {
                return Err(Error::Timeout.into());
            }
            self.usb.wait_for_next_event(self.usb.timeout());
        };
        if code != notification::bus_init_codes::SUCCESSFUL_I3C_BUS_INITIALIZATION {
            return Err(Error::BusInitFailed { code }.into());
        }

        // get the target device table generated by the I3C controller
        let buffer = control::get_target_device_table(self.usb.as_ref())?;
        self.table.fill_from_table_buffer(&buffer)?;

        self.set_default_target_device_config()?;

        self.table.enable_events();
        if let Some(info) = self.device_info.lock().unwrap().as_mut() {
            info.device_state.active_i3c_controller = true;
        }

        Ok(())
    }

    /// Issues INITIALIZE_I3C_BUS with a dynamic address assignment mode
    /// decided from what is known about the bus.
    fn request_bus_initialization(&self) -> Result<()> {
        let data_type = {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if info.device_role != DeviceRole::PrimaryController {
                return Err(Error::InvalidState(
                    "this request is only supported by the primary I3C controller",
                )
                .into());
            }
            info.data_type
        };

        let mode = match data_type {
            // the controller is aware of the target devices, let it decide
            CapabilityDataType::StaticData | CapabilityDataType::DynamicData => {
                address_assignment::CONTROLLER_DECIDED
            }
            CapabilityDataType::NoStaticData => {
                if self.table.is_empty() {
                    // no knowledge at all: broadcast ENTDAA and go fishing
                    address_assignment::ENTER_DYNAMIC_ADDRESS_ASSIGNMENT
                } else {
                    let (supporting_static, supporting_dynamic) = self.table.identify_devices()?;
                    if supporting_static > 0 && supporting_dynamic == 0 {
                        address_assignment::SET_STATIC_ADDRESS_AS_DYNAMIC
                    } else if supporting_dynamic > 0 && supporting_static == 0 {
                        address_assignment::ENTER_DYNAMIC_ADDRESS_ASSIGNMENT
                    } else {
                        address_assignment::CONTROLLER_DECIDED
                    }
                }
            }
        };

        control::initialize_i3c_bus(self.usb.as_ref(), mode)
    }

    /// Applies the initial configuration to every target device, from
    /// the controller capabilities: accept interrupts when the
    /// controller handles IBIs, accept role requests when it supports
    /// handoff, and propagate the controller's max IBI payload size.
    fn set_default_target_device_config(&self) -> Result<()> {
        let (capabilities, max_ibi_payload_size) = {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            (
                info.capabilities.clone(),
                info.capabilities.max_ibi_payload_size,
            )
        };

        // a zero TIR/CRR bit on the wire means the controller accepts
        // the request, so capable features clear their bit
        let mut config = 0xFF;
        if capabilities.handoff_controller_role {
            config &= !0x2;
        }
        if capabilities.in_band_interrupt_capability {
            config &= !0x1;
        }

        let buffer = self.table.build_set_config_buffer(config, max_ibi_payload_size);
        control::set_target_device_config(self.usb.as_ref(), &buffer)?;

        // mirror the configuration the bridge now applies
        let buffer = control::get_target_device_table(self.usb.as_ref())?;
        self.table.fill_from_table_buffer(&buffer)
    }

    /// Initializes the device in a target role by requesting a hot-join
    /// of the already initialized bus.
    fn initialize_target_device(&self) -> Result<()> {
        let status = self.send_request_to_controller(addresses::HOT_JOIN_ADDRESS, Direction::Write)?;
        if status != ExecutionStatus::Succeeded {
            return Err(Error::CommandFailed { status }.into());
        }
        Ok(())
    }

    /// Sends a request using the I3C arbitrable address header.
    ///
    /// Targets may transmit three requests this way: an in-band interrupt
    /// (own dynamic address, RnW 1), a controller role request (own
    /// dynamic address, RnW 0), or a hot-join request (the reserved
    /// hot-join address).
    fn send_request_to_controller(
        &self,
        target_address: u8,
        direction: Direction,
    ) -> Result<ExecutionStatus> {
        // these requests are sent alone
        if !self.command_queue.lock().unwrap().is_empty() {
            return Err(Error::InvalidState("the command queue has unsent requests").into());
        }
        // without response polling the blocking send below would hang
        if !self.usb.bulk_in_polling_active() {
            return Err(
                Error::InvalidState("the bulk response transfer polling is not armed").into(),
            );
        }

        self.enqueue_command(
            target_address,
            direction,
            ErrorHandling::TerminateOnAnyError,
            0,
            None,
            None,
        )?;
        let responses = self.send_commands(false, Duration::from_secs(60))?;

        let response = &responses[0];
        if !response.attempted {
            return Err(Error::InvalidState("the request was not attempted").into());
        }
        Ok(response.error_status)
    }

    // COMMAND EXECUTION
    // ==========

    fn enqueue(
        &self,
        command_type: CommandType,
        target_address: u8,
        direction: Direction,
        error_handling: ErrorHandling,
        common_command_code: u8,
        defining_byte: u8,
        data_length: u32,
        data: Option<&[u8]>,
        on_response: Option<OnResponse>,
    ) -> Result<()> {
        commands::validate_enqueue_args(
            direction,
            data,
            data_length,
            common_command_code,
            defining_byte,
        )?;

        let mode = *self.i3c_mode.lock().unwrap();
        let mut descriptor = CommandDescriptor::new(&mode);
        descriptor.command_type = command_type;
        descriptor.target_address = target_address;
        descriptor.direction = direction;
        descriptor.error_handling = error_handling;
        descriptor.data_length = data_length;
        descriptor.common_command_code = common_command_code;
        descriptor.defining_byte = defining_byte;

        let mut command = Command::new(descriptor);
        command.data = data.map(|d| d.to_vec());
        command.on_response = on_response;

        self.command_queue.lock().unwrap().push(command);

        Ok(())
    }

    /// ### Enqueue Command
    ///
    /// Adds a Read/Write command to the queue of commands to be
    /// transmitted with `send_commands` or `submit_commands`.
    ///
    pub fn enqueue_command(
        &self,
        target_address: u8,
        direction: Direction,
        error_handling: ErrorHandling,
        data_length: u32,
        data: Option<&[u8]>,
        on_response: Option<OnResponse>,
    ) -> Result<()> {
        self.enqueue(
            CommandType::Regular,
            target_address,
            direction,
            error_handling,
            0,
            0,
            data_length,
            data,
            on_response,
        )
    }

    /// ### Enqueue CCC
    ///
    /// Adds a Common Command Code to the command queue.
    ///
    pub fn enqueue_ccc(
        &self,
        target_address: u8,
        direction: Direction,
        error_handling: ErrorHandling,
        common_command_code: u8,
        data_length: u32,
        data: Option<&[u8]>,
        on_response: Option<OnResponse>,
    ) -> Result<()> {
        self.enqueue(
            CommandType::CccWithoutDefiningByte,
            target_address,
            direction,
            error_handling,
            common_command_code,
            0,
            data_length,
            data,
            on_response,
        )
    }

    /// ### Enqueue CCC With Defining Byte
    ///
    /// Adds a Common Command Code with its defining byte to the command
    /// queue.
    ///
    pub fn enqueue_ccc_with_defining_byte(
        &self,
        target_address: u8,
        direction: Direction,
        error_handling: ErrorHandling,
        common_command_code: u8,
        defining_byte: u8,
        data_length: u32,
        data: Option<&[u8]>,
        on_response: Option<OnResponse>,
    ) -> Result<()> {
        if common_command_code == 0 {
            return Err(Error::MissingArgument.into());
        }
        self.enqueue(
            CommandType::CccWithDefiningByte,
            target_address,
            direction,
            error_handling,
            common_command_code,
            defining_byte,
            data_length,
            data,
            on_response,
        )
    }

    /// ### Enqueue Target Reset Pattern
    ///
    /// Adds a Target Reset Pattern to the command queue. A bulk request
    /// carrying a reset pattern should only carry other reset patterns
    /// and RSTACT CCCs, so anything else already queued rejects it.
    ///
    pub fn enqueue_target_reset_pattern(&self, on_response: Option<OnResponse>) -> Result<()> {
        {
            let queue = self.command_queue.lock().unwrap();
            for command in queue.iter() {
                let desc = &command.descriptor;
                if desc.command_type == CommandType::TargetResetPattern {
                    continue;
                }
                if desc.command_type == CommandType::CccWithDefiningByte
                    && (desc.common_command_code == ccc::BROADCAST_RSTACT
                        || desc.common_command_code == ccc::DIRECT_RSTACT)
                    && desc.error_handling == ErrorHandling::TerminateOnAnyError
                {
                    continue;
                }
                return Err(Error::InvalidState(
                    "the queue has commands that cannot run along with a reset pattern",
                )
                .into());
            }
        }

        // the reset pattern is sent in the default SDR mode regardless of
        // the configured I3C mode
        let mut descriptor = CommandDescriptor::new(&I3cMode::default());
        descriptor.command_type = CommandType::TargetResetPattern;

        let mut command = Command::new(descriptor);
        command.on_response = on_response;
        self.command_queue.lock().unwrap().push(command);

        Ok(())
    }

    /// ### Send Commands
    ///
    /// Sends the queued commands and waits in blocking mode for their
    /// responses, or until the timeout elapses.
    ///
    /// The commands execute in strict order and their responses arrive
    /// together, so once the first response is in the tracker the rest
    /// are collected from it immediately. On timeout the requests stay in
    /// the tracker; they are released at device teardown.
    ///
    pub fn send_commands(
        &self,
        dependent_on_previous: bool,
        timeout: Duration,
    ) -> Result<Vec<Response>> {
        let mut commands = std::mem::take(&mut *self.command_queue.lock().unwrap());
        if commands.is_empty() {
            return Err(Error::InvalidState("the command queue is empty").into());
        }
        // responses are waited for in blocking mode, any callback on the
        // commands is dropped
        for command in commands.iter_mut() {
            command.on_response = None;
        }

        let request_ids = bulk::send_commands(
            self.usb.as_ref(),
            &self.tracker,
            commands,
            dependent_on_previous,
        )?;

        // when multiple commands are sent together their responses are
        // received together too, so wait for the first ID only
        let deadline = Instant::now() + timeout;
        let first = loop {
            match self.tracker.consume_response(request_ids[0]) {
                Ok(response) => break response,
                Err(_) => {
                    if Instant::now() > deadline {
                        return Err(Error::Timeout.into());
                    }
                    self.usb.wait_for_next_event(self.usb.timeout());
                }
            }
        };

        let mut responses = Vec::with_capacity(request_ids.len());
        responses.push(first);
        for request_id in &request_ids[1..] {
            responses.push(self.tracker.consume_response(*request_id)?);
        }

        Ok(responses)
    }

    /// ### Submit Commands
    ///
    /// Sends the queued commands asynchronously. Every command must carry
    /// a response callback; the callbacks run as the responses arrive,
    /// while the program keeps doing other work.
    ///
    pub fn submit_commands(&self, dependent_on_previous: bool) -> Result<()> {
        let commands = std::mem::take(&mut *self.command_queue.lock().unwrap());
        if commands.is_empty() {
            return Err(Error::InvalidState("the command queue is empty").into());
        }
        if commands.iter().any(|command| command.on_response.is_none()) {
            return Err(Error::MissingArgument.into());
        }

        bulk::send_commands(
            self.usb.as_ref(),
            &self.tracker,
            commands,
            dependent_on_previous,
        )?;

        Ok(())
    }

    /// ### Submit Vendor Specific Request
    ///
    /// Submits one vendor-defined data block to the I3C function. The
    /// block is DWORD-padded automatically. A vendor response callback
    /// must be registered first.
    ///
    pub fn submit_vendor_specific_request(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::MissingArgument.into());
        }
        if !self.tracker.has_vendor_callback() {
            return Err(Error::InvalidState(
                "a callback for vendor responses has to be registered first",
            )
            .into());
        }

        let buffer = wire::build_vendor_specific_buffer(data);
        self.usb.bulk_out(&buffer)
    }

    // EVENTS
    // ==========

    /// Assigns the callback to run when an I3C bus error notification
    /// arrives.
    pub fn on_bus_error(&self, on_bus_error: OnBusError) {
        *self.bus_error_handler.lock().unwrap() = Some(on_bus_error);
    }

    /// Assigns the callback to run after a device successfully hot-joins
    /// the bus. The local table copy is updated by the library either
    /// way.
    pub fn on_hotjoin(&self, on_hotjoin: OnHotJoin) {
        self.table.on_insert(on_hotjoin);
    }

    /// Assigns the callback to run when an in-band interrupt completes.
    pub fn on_ibi(&self, on_ibi: OnIbi) {
        self.ibi.set_callback(on_ibi);
    }

    /// Assigns the callback to run after an event from the active I3C
    /// controller. Only meaningful while this device is not the active
    /// controller.
    pub fn on_controller_event(&self, on_controller_event: OnControllerEvent) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if info.device_state.active_i3c_controller {
                return Err(Error::InvalidState(
                    "the I3C device is the active I3C controller, not a target",
                )
                .into());
            }
        }
        *self.controller_event_handler.lock().unwrap() = Some(on_controller_event);
        Ok(())
    }

    /// Assigns the callback to run when a vendor specific response
    /// arrives.
    pub fn on_vendor_specific_response(&self, on_vendor_response: OnVendorResponse) {
        self.tracker.set_vendor_callback(on_vendor_response);
    }

    // FEATURES
    // ==========

    fn set_feature_checked(&self, selector: u16, address: u8, enable: bool) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if !info.device_state.active_i3c_controller {
                return Err(
                    Error::InvalidState("the I3C device is not the active I3C controller").into(),
                );
            }
        }
        if enable {
            control::set_feature(self.usb.as_ref(), selector, address)
        } else {
            control::clear_feature(self.usb.as_ref(), selector, address)
        }
    }

    /// ### Enable I3C Controller Role Handoff
    ///
    /// Applicable when the I3C device is the active I3C controller.
    ///
    pub fn enable_i3c_controller_role_handoff(&self) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if !info.capabilities.handoff_controller_role {
                return Err(Error::Unsupported(
                    "this device cannot hand off the I3C controller role",
                )
                .into());
            }
            if info.device_state.handoff_controller_role_enabled {
                debug!("the controller role handoff feature is already enabled");
                return Ok(());
            }
        }
        self.set_feature_checked(feature_selectors::I3C_CONTROLLER_ROLE_HANDOFF, 0, true)?;
        if let Some(info) = self.device_info.lock().unwrap().as_mut() {
            info.device_state.handoff_controller_role_enabled = true;
        }
        Ok(())
    }

    /// ### Disable I3C Controller Role Handoff
    pub fn disable_i3c_controller_role_handoff(&self) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if !info.capabilities.handoff_controller_role {
                return Err(Error::Unsupported(
                    "this device cannot hand off the I3C controller role",
                )
                .into());
            }
            if !info.device_state.handoff_controller_role_enabled {
                debug!("the controller role handoff feature is already disabled");
                return Ok(());
            }
        }
        self.set_feature_checked(feature_selectors::I3C_CONTROLLER_ROLE_HANDOFF, 0, false)?;
        if let Some(info) = self.device_info.lock().unwrap().as_mut() {
            info.device_state.handoff_controller_role_enabled = false;
        }
        Ok(())
    }

    /// ### Enable Regular IBI
    ///
    /// Enables all regular in-band interrupts on the I3C bus.
    ///
    pub fn enable_regular_ibi(&self) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if !info.capabilities.in_band_interrupt_capability {
                return Err(Error::Unsupported("this device cannot handle IBIs").into());
            }
            if info.device_state.in_band_interrupt_enabled {
                debug!("the in-band interrupt feature is already enabled");
                return Ok(());
            }
        }
        self.set_feature_checked(feature_selectors::REGULAR_IBI, 0, true)?;
        if let Some(info) = self.device_info.lock().unwrap().as_mut() {
            info.device_state.in_band_interrupt_enabled = true;
        }
        Ok(())
    }

    /// ### Disable Regular IBI
    pub fn disable_regular_ibi(&self) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if !info.capabilities.in_band_interrupt_capability {
                return Err(Error::Unsupported("this device cannot handle IBIs").into());
            }
            if !info.device_state.in_band_interrupt_enabled {
                debug!("the in-band interrupt feature is already disabled");
                return Ok(());
            }
        }
        self.set_feature_checked(feature_selectors::REGULAR_IBI, 0, false)?;
        if let Some(info) = self.device_info.lock().unwrap().as_mut() {
            info.device_state.in_band_interrupt_enabled = false;
        }
        Ok(())
    }

    /// ### Enable Hot-Join
    ///
    /// Enables the Hot-Join feature on the I3C bus.
    ///
    pub fn enable_hot_join(&self) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if !info.capabilities.hot_join_capability {
                return Err(Error::Unsupported("this device cannot handle hot-joins").into());
            }
            if info.device_state.hot_join_enabled {
                debug!("the hot-join feature is already enabled");
                return Ok(());
            }
        }
        self.set_feature_checked(feature_selectors::HOT_JOIN, 0, true)?;
        if let Some(info) = self.device_info.lock().unwrap().as_mut() {
            info.device_state.hot_join_enabled = true;
        }
        Ok(())
    }

    /// ### Disable Hot-Join
    pub fn disable_hot_join(&self) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if !info.capabilities.hot_join_capability {
                return Err(Error::Unsupported("this device cannot handle hot-joins").into());
            }
            if !info.device_state.hot_join_enabled {
                debug!("the hot-join feature is already disabled");
                return Ok(());
            }
        }
        self.set_feature_checked(feature_selectors::HOT_JOIN, 0, false)?;
        if let Some(info) = self.device_info.lock().unwrap().as_mut() {
            info.device_state.hot_join_enabled = false;
        }
        Ok(())
    }

    /// Enables the USB remote wake from regular in-band interrupts.
    pub fn enable_regular_ibi_wake(&self) -> Result<()> {
        self.set_feature_checked(feature_selectors::REGULAR_IBI_WAKE, 0, true)
    }

    /// Disables the USB remote wake from regular in-band interrupts.
    pub fn disable_regular_ibi_wake(&self) -> Result<()> {
        self.set_feature_checked(feature_selectors::REGULAR_IBI_WAKE, 0, false)
    }

    /// Enables the USB remote wake from hot-joins.
    pub fn enable_hot_join_wake(&self) -> Result<()> {
        self.set_feature_checked(feature_selectors::HOT_JOIN_WAKE, 0, true)
    }

    /// Disables the USB remote wake from hot-joins.
    pub fn disable_hot_join_wake(&self) -> Result<()> {
        self.set_feature_checked(feature_selectors::HOT_JOIN_WAKE, 0, false)
    }

    /// Enables the USB remote wake from a controller role request.
    pub fn enable_i3c_controller_role_request_wake(&self) -> Result<()> {
        self.set_feature_checked(feature_selectors::I3C_CONTROLLER_ROLE_REQUEST_WAKE, 0, true)
    }

    /// Disables the USB remote wake from a controller role request.
    pub fn disable_i3c_controller_role_request_wake(&self) -> Result<()> {
        self.set_feature_checked(
            feature_selectors::I3C_CONTROLLER_ROLE_REQUEST_WAKE,
            0,
            false,
        )
    }

    /// ### Disable I3C Bus
    pub fn disable_i3c_bus(&self) -> Result<()> {
        self.set_feature_checked(feature_selectors::I3C_BUS, 0, false)
    }

    /// ### Exit HDR Mode For Recovery
    ///
    /// Forces all I3C target devices to exit HDR mode, an important step
    /// in recovering targets that detected certain bus errors. Waits for
    /// outstanding bulk requests to drain first.
    ///
    pub fn exit_hdr_mode_for_recovery(&self) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(60);
        while !self.tracker.is_empty() {
            if Instant::now() > deadline {
                return Err(Error::Timeout.into());
            }
            self.usb.wait_for_next_event(Duration::from_secs(1));
        }

        self.set_feature_checked(
            feature_selectors::HDR_MODE_EXIT_RECOVERY,
            addresses::BROADCAST_ADDRESS,
            false,
        )
    }

    // TARGET DEVICES
    // ==========

    /// ### Change I3C Device Address
    ///
    /// Changes the dynamic address of one target device. The request is
    /// confirmed asynchronously: the callback fires once the bridge
    /// reports the result, and the local table follows it.
    ///
    pub fn change_i3c_device_address(
        &self,
        current_address: u8,
        new_address: u8,
        on_address_change: OnAddressChange,
    ) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if !info.device_state.active_i3c_controller {
                return Err(
                    Error::InvalidState("the I3C device is not the active I3C controller").into(),
                );
            }
        }

        let device = self
            .table
            .get(current_address)
            .ok_or(Error::DeviceNotFound)?;
        if self.table.get(new_address).is_some() {
            return Err(Error::Duplicate.into());
        }

        let buffer = target_device::build_address_change_buffer(&device, current_address, new_address);
        control::change_dynamic_address(self.usb.as_ref(), &buffer)?;

        // the callback runs when the address change result is processed
        self.table
            .register_address_change(current_address, new_address, on_address_change);

        Ok(())
    }

    /// ### Add Device To Table
    ///
    /// Manually adds an I2C or I3C device to the target device table, for
    /// controllers that are not aware of the devices on their bus. I2C
    /// devices require a static address; I3C devices require a
    /// provisioned ID unless they have a static address.
    ///
    pub fn add_device_to_table(&self, info: TargetDeviceInfo) -> Result<()> {
        match info.device_type {
            TargetType::I2c => {
                if info.static_address == 0 {
                    return Err(Error::MissingArgument.into());
                }
            }
            TargetType::I3c => {
                if info.static_address == 0 && info.provisioned_id == 0 {
                    return Err(Error::MissingArgument.into());
                }
                if info.static_address == 0
                    && info.assignment_from_static_address != target_device::AsaSupport::NoStaticAddress
                {
                    return Err(Error::InvalidState(
                        "static_address and assignment_from_static_address conflict",
                    )
                    .into());
                }
            }
        }

        if info.static_address != 0 {
            if self.table.get(info.static_address).is_some() {
                return Err(Error::Duplicate.into());
            }
        } else if self.table.get_by_pid(info.provisioned_id).is_some() {
            return Err(Error::Duplicate.into());
        }

        // the device is being added manually, this must not look like a
        // hot-join to the insert event
        let events_were_enabled = self.table.events_enabled();
        self.table.set_events_enabled(false);
        let result = self.table.insert(TargetDevice::from(&info));
        self.table.set_events_enabled(events_were_enabled);

        result
    }

    /// ### Target Device Table
    ///
    /// A snapshot of the devices on the I3C bus.
    ///
    pub fn target_device_table(&self) -> Vec<TargetDeviceInfo> {
        self.table
            .devices()
            .iter()
            .map(TargetDeviceInfo::from)
            .collect()
    }

    /// The addresses of every device in the table, in insertion order.
    pub fn address_list(&self) -> Vec<u8> {
        self.table.address_list()
    }

    /// ### Set Target Device Config
    ///
    /// Sets the TIR/CRR/IBIT bits of one target device (only the 3 LSB
    /// of `config` are used). Active controller only.
    ///
    pub fn set_target_device_config(&self, address: u8, config: u8) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if !info.device_state.active_i3c_controller {
                return Err(
                    Error::InvalidState("the I3C device is not the active I3C controller").into(),
                );
            }
        }
        let device = self.table.get(address).ok_or(Error::DeviceNotFound)?;

        let buffer = target_device::build_set_configuration_buffer(
            address,
            config,
            device.device_data.max_ibi_payload_size,
        );
        control::set_target_device_config(self.usb.as_ref(), &buffer)?;

        self.table.with_device_mut(address, |device| {
            device.apply_config(config);
        });
        Ok(())
    }

    /// The TIR/CRR/IBIT configuration bits of one target device.
    pub fn target_device_config(&self, address: u8) -> Result<u8> {
        let device = self.table.get(address).ok_or(Error::DeviceNotFound)?;
        Ok(device.config())
    }

    /// ### Set Target Device Max IBI Payload
    ///
    /// Sets the maximum IBI payload size of one target device while
    /// keeping its current configuration. Active controller only.
    ///
    pub fn set_target_device_max_ibi_payload(&self, address: u8, max_payload: u32) -> Result<()> {
        {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if !info.device_state.active_i3c_controller {
                return Err(
                    Error::InvalidState("the I3C device is not the active I3C controller").into(),
                );
            }
        }
        let device = self.table.get(address).ok_or(Error::DeviceNotFound)?;

        let buffer =
            target_device::build_set_configuration_buffer(address, device.config(), max_payload);
        control::set_target_device_config(self.usb.as_ref(), &buffer)?;

        self.table.with_device_mut(address, |device| {
            device.device_data.max_ibi_payload_size = max_payload;
        });
        Ok(())
    }

    /// The maximum IBI payload size of one target device.
    pub fn target_device_max_ibi_payload(&self, address: u8) -> Result<u32> {
        let device = self.table.get(address).ok_or(Error::DeviceNotFound)?;
        Ok(device.device_data.max_ibi_payload_size)
    }

    /// The bus characteristic register (BCR) of a target device.
    pub fn target_bcr(&self, address: u8) -> Result<u8> {
        let device = self.table.get(address).ok_or(Error::DeviceNotFound)?;
        Ok(device.device_data.bus_characteristic_register)
    }

    /// The device characteristic register (DCR) of a target device.
    pub fn target_dcr(&self, address: u8) -> Result<u8> {
        let device = self.table.get(address).ok_or(Error::DeviceNotFound)?;
        Ok(device.device_data.device_characteristic_register)
    }

    /// Whether the target device is an I2C or an I3C device.
    pub fn target_type(&self, address: u8) -> Result<TargetType> {
        let device = self.table.get(address).ok_or(Error::DeviceNotFound)?;
        Ok(if device.device_data.target_type == TargetType::I2c as u8 {
            TargetType::I2c
        } else {
            TargetType::I3c
        })
    }

    // DEVICE ROLE
    // ==========

    /// ### Request I3C Controller Role
    ///
    /// Asks the active controller for the controller role. Applicable to
    /// a target device capable of secondary controller that is not
    /// currently the active controller.
    ///
    pub fn request_i3c_controller_role(&self) -> Result<ExecutionStatus> {
        let own_address = {
            let guard = self.device_info.lock().unwrap();
            let info = guard
                .as_ref()
                .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
            if info.device_role != DeviceRole::TargetCapableOfSecondaryController {
                return Err(Error::InvalidState(
                    "the I3C device is not capable of the secondary controller role",
                )
                .into());
            }
            if info.device_state.active_i3c_controller {
                return Err(Error::InvalidState(
                    "the I3C device is already the active I3C controller",
                )
                .into());
            }
            info.address
        };

        // the secondary controller issues its own dynamic address with
        // the RnW bit 0 to request to become active controller
        self.send_request_to_controller(own_address, Direction::Write)
    }

    /// ### Request Hot-Join
    ///
    /// Asks the active controller to hot-join this target device onto an
    /// already initialized bus.
    ///
    pub fn request_hot_join(&self) -> Result<ExecutionStatus> {
        self.send_request_to_controller(addresses::HOT_JOIN_ADDRESS, Direction::Write)
    }

    // DEVICE INFO
    // ==========

    /// The role of the I3C device.
    pub fn device_role(&self) -> Result<DeviceRole> {
        let guard = self.device_info.lock().unwrap();
        let info = guard
            .as_ref()
            .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
        Ok(info.device_role)
    }

    /// The dynamic address of the I3C device itself.
    pub fn device_address(&self) -> Result<u8> {
        let guard = self.device_info.lock().unwrap();
        let info = guard
            .as_ref()
            .ok_or(Error::InvalidState("the device capabilities are unknown"))?;
        Ok(info.address)
    }

    /// Whether the I3C device is the active I3C controller.
    pub fn is_active_controller(&self) -> bool {
        self.device_info
            .lock()
            .unwrap()
            .as_ref()
            .map(|info| info.device_state.active_i3c_controller)
            .unwrap_or(false)
    }

    /// Sets the I3C communication mode applied to enqueued commands.
    pub fn set_i3c_mode(&self, transfer_mode: u8, transfer_rate: u8, tm_specific_info: u8) {
        *self.i3c_mode.lock().unwrap() = I3cMode {
            transfer_mode,
            transfer_rate,
            tm_specific_info,
        };
    }

    /// The I3C communication mode applied to enqueued commands.
    pub fn i3c_mode(&self) -> I3cMode {
        *self.i3c_mode.lock().unwrap()
    }

    /// Sets how many times a stalled request is resumed before being
    /// cancelled.
    pub fn set_request_reattempt_max(&self, reattempt_max: u32) {
        self.tracker.set_reattempt_max(reattempt_max);
    }

    /// How many times a stalled request is resumed before being cancelled.
    pub fn request_reattempt_max(&self) -> u32 {
        self.tracker.reattempt_max()
    }

    /// ### Set Timeout
    ///
    /// Sets the USB transaction timeout, returning the previous value.
    ///
    pub fn set_timeout(&self, timeout: Duration) -> Duration {
        self.usb.set_timeout(timeout)
    }

    /// The USB transaction timeout.
    pub fn timeout(&self) -> Duration {
        self.usb.timeout()
    }

    /// The latched USB transport error, if the device has failed.
    pub fn usb_error(&self) -> Option<rusb::Error> {
        self.usb.last_error()
    }
}
