//! ## USB
//!
//! The transport surface the protocol core is written against, and its
//! production implementation over rusb.
//!
//! The core only ever talks to the `UsbTransport` trait: blocking and
//! asynchronous control transfers, bulk-OUT submissions, the perpetual
//! bulk-IN polling loop, interrupt-IN polling, and an event wait used by
//! the blocking APIs. Anything that implements the trait can stand in
//! for the bridge, which is how the integration tests run without
//! hardware.
//!

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::constants::misc::{BULK_RESPONSE_BUFFER_PACKETS, DEFAULT_TIMEOUT_DURATION};
use crate::error::Error;
use crate::types::{DeviceMode, I3cEndpoints};

use anyhow::Result;
use log::{debug, error};
use rusb::{Context, DeviceHandle};

/// Completion of an asynchronous control-IN transfer, with the bytes read.
pub type ControlInCallback = Box<dyn FnOnce(Result<Vec<u8>>) + Send>;
/// Completion of an asynchronous control-OUT transfer.
pub type ControlOutCallback = Box<dyn FnOnce(Result<()>) + Send>;
/// Receives every buffer completed by the perpetual bulk-IN polling loop.
pub type BulkInHandler = Box<dyn FnMut(&[u8]) + Send>;
/// Receives every frame completed on the interrupt-IN endpoint.
pub type InterruptHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Largest buffer a class-specific control-IN request may return.
pub const MAX_CONTROL_BUFFER_SIZE: usize = 4096;

/// ### Usb Transport
///
/// The transport operations the protocol core consumes. Implementations
/// must be safe to call from any thread.
///
pub trait UsbTransport: Send + Sync {
    /// Blocking class-specific control-IN transfer. Returns bytes read.
    fn control_in(&self, request: u8, value: u16, index: u16, buffer: &mut [u8]) -> Result<usize>;

    /// Blocking class-specific control-OUT transfer.
    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()>;

    /// Asynchronous control-IN transfer; the callback gets the response.
    fn control_in_async(
        &self,
        request: u8,
        value: u16,
        index: u16,
        on_complete: ControlInCallback,
    ) -> Result<()>;

    /// Asynchronous control-OUT transfer; the callback fires on completion.
    fn control_out_async(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        on_complete: ControlOutCallback,
    ) -> Result<()>;

    /// Submits one buffer on the bulk-OUT endpoint.
    fn bulk_out(&self, data: &[u8]) -> Result<()>;

    /// Arms the perpetual bulk-IN submission. Every completed transfer is
    /// routed to the handler and the submission re-arms itself. Transfer
    /// timeouts are not errors; other transport errors are latched and
    /// terminate the loop.
    fn start_bulk_in_polling(&self, handler: BulkInHandler) -> Result<()>;

    /// Whether the bulk-IN polling loop has been armed.
    fn bulk_in_polling_active(&self) -> bool;

    /// Arms interrupt-IN polling with 4-byte frames.
    fn start_interrupt_polling(&self, handler: InterruptHandler) -> Result<()>;

    /// Parks the caller until any transfer completion has been dispatched
    /// or the timeout elapses. Returns false on timeout.
    fn wait_for_next_event(&self, timeout: Duration) -> bool;

    /// Largest buffer a control-IN request may return.
    fn max_control_buffer_size(&self) -> usize {
        MAX_CONTROL_BUFFER_SIZE
    }

    /// Sets the transaction timeout, returning the previous value.
    fn set_timeout(&self, timeout: Duration) -> Duration;

    /// The current transaction timeout.
    fn timeout(&self) -> Duration;

    /// The latched transport error, if the device has failed.
    fn last_error(&self) -> Option<rusb::Error>;
}

/// ### Handle
///
/// Alias for a libusb device handle behind an Arc. libusb device handles
/// are safe to use from multiple threads, so the polling loops and client
/// threads share one handle.
///
#[derive(Debug, Clone)]
pub struct Handle(Arc<DeviceHandle<Context>>);

impl Handle {
    pub fn new(handle: DeviceHandle<Context>) -> Handle {
        Handle(Arc::new(handle))
    }

    pub fn borrow(&self) -> &DeviceHandle<Context> {
        &self.0
    }
}

/// ### Timeout
///
/// Alias for a duration wrapped in an Arc and Mutex.
#[derive(Debug, Clone)]
pub struct Timeout(Arc<Mutex<Duration>>);

impl Timeout {
    pub fn new(duration: Duration) -> Timeout {
        Timeout(Arc::new(Mutex::new(duration)))
    }

    pub fn get(&self) -> Duration {
        *self.0.lock().unwrap()
    }

    pub fn replace(&self, duration: Duration) -> Duration {
        std::mem::replace(&mut self.0.lock().unwrap(), duration)
    }
}

/// How long one polling read blocks before checking the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// State shared between the transport, its polling threads and waiters.
struct TransportShared {
    stop: AtomicBool,
    bulk_polling: AtomicBool,
    last_error: Mutex<Option<rusb::Error>>,
    /// Counts dispatched completions; waiters sleep on the pair below
    event_count: Mutex<u64>,
    event_cond: Condvar,
}

impl TransportShared {
    fn signal_event(&self) {
        let mut count = self.event_count.lock().unwrap();
        *count += 1;
        self.event_cond.notify_all();
    }

    fn latch_error(&self, error: rusb::Error) {
        let mut latched = self.last_error.lock().unwrap();
        if latched.is_none() {
            *latched = Some(error);
        }
    }
}

/// ### Rusb Transport
///
/// The production `UsbTransport` over a claimed USB-I3C interface.
///
/// The bulk-IN and interrupt-IN endpoints are serviced by background
/// threads that re-arm themselves after every completion, which realizes
/// the perpetual submissions of the device class on top of rusb's
/// synchronous API. Asynchronous control transfers run on short-lived
/// completion threads.
///
pub struct RusbTransport {
    handle: Handle,
    mode: DeviceMode,
    endpoints: I3cEndpoints,
    timeout: Timeout,
    shared: Arc<TransportShared>,
    polling_threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl RusbTransport {
    pub fn new(
        handle: DeviceHandle<Context>,
        mode: DeviceMode,
        endpoints: I3cEndpoints,
    ) -> RusbTransport {
        RusbTransport {
            handle: Handle::new(handle),
            mode,
            endpoints,
            timeout: Timeout::new(DEFAULT_TIMEOUT_DURATION),
            shared: Arc::new(TransportShared {
                stop: AtomicBool::new(false),
                bulk_polling: AtomicBool::new(false),
                last_error: Mutex::new(None),
                event_count: Mutex::new(0),
                event_cond: Condvar::new(),
            }),
            polling_threads: Mutex::new(Vec::new()),
        }
    }

    fn in_request_type() -> u8 {
        rusb::request_type(
            rusb::Direction::In,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        )
    }

    fn out_request_type() -> u8 {
        rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        )
    }

    /// Class requests address the I3C interface; the caller-supplied
    /// index carries request specifics in its high byte.
    fn index_for(&self, index: u16) -> u16 {
        index | self.mode.interface_number as u16
    }

    /// Runs one polling loop iteration's worth of error handling: a
    /// timeout re-arms silently, anything else is latched and fatal.
    fn handle_poll_error(shared: &TransportShared, error: rusb::Error) -> bool {
        match error {
            rusb::Error::Timeout => true,
            error => {
                error!("polling terminated by transport error: {error}");
                shared.latch_error(error);
                shared.signal_event();
                false
            }
        }
    }
}

impl UsbTransport for RusbTransport {
    fn control_in(&self, request: u8, value: u16, index: u16, buffer: &mut [u8]) -> Result<usize> {
        let read = self.handle.borrow().read_control(
            Self::in_request_type(),
            request,
            value,
            self.index_for(index),
            buffer,
            self.timeout.get(),
        )?;
        Ok(read)
    }

    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        self.handle.borrow().write_control(
            Self::out_request_type(),
            request,
            value,
            self.index_for(index),
            data,
            self.timeout.get(),
        )?;
        Ok(())
    }

    fn control_in_async(
        &self,
        request: u8,
        value: u16,
        index: u16,
        on_complete: ControlInCallback,
    ) -> Result<()> {
        let handle = self.handle.clone();
        let timeout = self.timeout.get();
        let index = self.index_for(index);
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("usbi3c-control-in".into())
            .spawn(move || {
                let mut buffer = vec![0u8; MAX_CONTROL_BUFFER_SIZE];
                let result = handle
                    .borrow()
                    .read_control(
                        Self::in_request_type(),
                        request,
                        value,
                        index,
                        &mut buffer,
                        timeout,
                    )
                    .map(|read| {
                        buffer.truncate(read);
                        buffer
                    })
                    .map_err(|error| {
                        shared.latch_error(error);
                        Error::Transport(error).into()
                    });
                on_complete(result);
                shared.signal_event();
            })
            .map_err(|_| Error::InvalidState("could not spawn control transfer thread"))?;
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
        let handle = self.handle.clone();
        let timeout = self.timeout.get();
        let index = self.index_for(index);
        let data = data.to_vec();
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("usbi3c-control-out".into())
            .spawn(move || {
                let result = handle
                    .borrow()
                    .write_control(
                        Self::out_request_type(),
                        request,
                        value,
                        index,
                        &data,
                        timeout,
                    )
                    .map(|_| ())
                    .map_err(|error| {
                        shared.latch_error(error);
                        Error::Transport(error).into()
                    });
                on_complete(result);
                shared.signal_event();
            })
            .map_err(|_| Error::InvalidState("could not spawn control transfer thread"))?;
        Ok(())
    }

    fn bulk_out(&self, data: &[u8]) -> Result<()> {
        self.handle.borrow().write_bulk(
            self.endpoints.bulk_out_ep.address,
            data,
            self.timeout.get(),
        )?;
        Ok(())
    }

    fn start_bulk_in_polling(&self, mut handler: BulkInHandler) -> Result<()> {
        if self.shared.bulk_polling.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState("bulk-IN polling is already armed").into());
        }

        let handle = self.handle.clone();
        let shared = Arc::clone(&self.shared);
        let endpoint = self.endpoints.bulk_in_ep.address;
        // sized as a multiple of the endpoint packet size so a response
        // spanning many packets still lands in one completion
        let buffer_size =
            self.endpoints.bulk_in_ep.max_packet_size as usize * BULK_RESPONSE_BUFFER_PACKETS;

        let thread = thread::Builder::new()
            .name("usbi3c-bulk-in".into())
            .spawn(move || {
                let mut buffer = vec![0u8; buffer_size];
                loop {
                    if shared.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    match handle.borrow().read_bulk(endpoint, &mut buffer, POLL_INTERVAL) {
                        Ok(read) => {
                            handler(&buffer[..read]);
                            shared.signal_event();
                        }
                        Err(error) => {
                            if !Self::handle_poll_error(&shared, error) {
                                break;
                            }
                        }
                    }
                }
                debug!("bulk-IN polling loop exited");
            })
            .map_err(|_| Error::InvalidState("could not spawn bulk-IN polling thread"))?;

        self.polling_threads.lock().unwrap().push(thread);
        Ok(())
    }

    fn bulk_in_polling_active(&self) -> bool {
        self.shared.bulk_polling.load(Ordering::SeqCst)
    }

    fn start_interrupt_polling(&self, mut handler: InterruptHandler) -> Result<()> {
        let handle = self.handle.clone();
        let shared = Arc::clone(&self.shared);
        let endpoint = self.endpoints.interrupt_ep.address;

        let thread = thread::Builder::new()
            .name("usbi3c-interrupt".into())
            .spawn(move || {
                let mut buffer = [0u8; crate::wire::NOTIFICATION_SIZE];
                loop {
                    if shared.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    match handle
                        .borrow()
                        .read_interrupt(endpoint, &mut buffer, POLL_INTERVAL)
                    {
                        Ok(read) => {
                            handler(&buffer[..read]);
                            shared.signal_event();
                        }
                        Err(error) => {
                            if !Self::handle_poll_error(&shared, error) {
                                break;
                            }
                        }
                    }
                }
                debug!("interrupt polling loop exited");
            })
            .map_err(|_| Error::InvalidState("could not spawn interrupt polling thread"))?;

        self.polling_threads.lock().unwrap().push(thread);
        Ok(())
    }

    fn wait_for_next_event(&self, timeout: Duration) -> bool {
        let count = self.shared.event_count.lock().unwrap();
        let seen = *count;
        let (count, result) = self
            .shared
            .event_cond
            .wait_timeout_while(count, timeout, |current| *current == seen)
            .unwrap();
        drop(count);
        !result.timed_out()
    }

    fn set_timeout(&self, timeout: Duration) -> Duration {
        self.timeout.replace(timeout)
    }

    fn timeout(&self) -> Duration {
        self.timeout.get()
    }

    fn last_error(&self) -> Option<rusb::Error> {
        *self.shared.last_error.lock().unwrap()
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        // stop the polling loops and wait for them before releasing the
        // interface under their feet
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.signal_event();
        for thread in self.polling_threads.lock().unwrap().drain(..) {
            let _ = thread.join();
        }

        if self
            .handle
            .borrow()
            .release_interface(self.mode.interface_number)
            .is_err()
        {
            debug!("failed to release the usb interface");
        }
        // reattach the kernel driver if it was disconnected
        if self.mode.has_kernel_driver
            && self
                .handle
                .borrow()
                .attach_kernel_driver(self.mode.interface_number)
                .is_err()
        {
            debug!("failed to attach the kernel driver to the usb device");
        }
    }
}
