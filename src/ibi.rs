//! ## IBI
//!
//! In-band interrupt handling: reassembly of multi-fragment IBI response
//! frames arriving on the bulk-IN endpoint, pairing of each IBI
//! notification with its corresponding assembled response, and delivery
//! to the user callback.
//!
//! Notifications and completed responses arrive on different endpoints
//! but are matched in arrival order; the design does not assume they are
//! delivered in the same transfer.
//!

use std::sync::Mutex;

use crate::list::OrderedList;
use crate::wire;

use anyhow::Result;
use log::{debug, warn};

/// ### IBI Descriptor
///
/// Describes one completed in-band interrupt.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IbiDescriptor {
    /// Address of the device that issued the IBI (7 bits)
    pub address: u8,
    /// Whether the IBI is a read (true) or a write (false)
    pub read_not_write: bool,
    /// false if the IBI was acknowledged, true if not
    pub ibi_status: bool,
    /// The IBI was caused by an error executing a command
    pub error: bool,
    /// The IBI is timestamped
    pub ibi_timestamp: bool,
    /// false for a regular IBI, true if scheduled or from a secondary controller
    pub ibi_type: bool,
    /// Mandatory data byte
    pub mdb: u8,
}

impl IbiDescriptor {
    /// Specific interrupt id within the group (MDB bits 4:0)
    pub fn specific_interrupt_id(&self) -> u8 {
        self.mdb & 0x1F
    }

    /// Interrupt group this IBI belongs to (MDB bits 7:5)
    pub fn interrupt_group_id(&self) -> u8 {
        self.mdb >> 5
    }
}

/// Callback executed when an IBI has completed: the notification code
/// reporting why it was triggered, the descriptor, and the payload.
pub type OnIbi = Box<dyn FnMut(u16, &IbiDescriptor, &[u8]) + Send>;

/// One IBI response being assembled from bulk-IN frames.
struct IbiResponse {
    descriptor: IbiDescriptor,
    data: Vec<u8>,
    completed: bool,
}

/// Chunks collected for the response currently being assembled.
#[derive(Default)]
struct PayloadAssembly {
    chunks: Vec<Vec<u8>>,
    payload_size: usize,
}

impl PayloadAssembly {
    fn push(&mut self, chunk: Vec<u8>) {
        self.payload_size += chunk.len();
        self.chunks.push(chunk);
    }

    fn join(&mut self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.payload_size);
        for chunk in self.chunks.drain(..) {
            payload.extend_from_slice(&chunk);
        }
        self.payload_size = 0;
        payload
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.payload_size = 0;
    }
}

struct IbiState {
    /// Notification codes waiting to be paired with a completed response
    entries: OrderedList<u16>,
    /// Responses in arrival order, front is the oldest
    queue: OrderedList<IbiResponse>,
    assembly: PayloadAssembly,
}

/// ### IBI Handler
///
/// Owns the per-device IBI reassembly state and the user callback.
///
pub struct IbiHandler {
    state: Mutex<IbiState>,
    callback: Mutex<Option<OnIbi>>,
}

impl Default for IbiHandler {
    fn default() -> IbiHandler {
        IbiHandler::new()
    }
}

impl IbiHandler {
    pub fn new() -> IbiHandler {
        IbiHandler {
            state: Mutex::new(IbiState {
                entries: OrderedList::new(),
                queue: OrderedList::new(),
                assembly: PayloadAssembly::default(),
            }),
            callback: Mutex::new(None),
        }
    }

    /// Installs the callback to run when an IBI completes.
    pub fn set_callback(&self, on_ibi: OnIbi) {
        *self.callback.lock().unwrap() = Some(on_ibi);
    }

    /// Handles one IBI-tagged bulk response frame, collecting its payload
    /// and completing the response once the last-byte marker arrives.
    pub fn handle_response_frame(&self, buffer: &[u8]) -> Result<()> {
        let header = wire::parse_ibi_response_header(buffer)?;
        let footer = wire::parse_ibi_response_footer(buffer)?;
        let body =
            &buffer[wire::IBI_RESPONSE_HEADER_SIZE..buffer.len() - wire::IBI_RESPONSE_FOOTER_SIZE];

        let mut state = self.state.lock().unwrap();

        if header.sequence_id == 0 {
            // a new response starts; a previous assembly still open at
            // this point was truncated by the bridge
            if state.assembly.payload_size > 0 {
                warn!("IBI payload buffer not empty, some data has been lost");
                state.assembly.clear();
            }

            state.queue.append(IbiResponse {
                descriptor: IbiDescriptor {
                    address: footer.target_address,
                    read_not_write: footer.read_not_write,
                    ibi_status: footer.ibi_status,
                    error: footer.error,
                    ibi_timestamp: footer.ibi_timestamp,
                    ibi_type: footer.ibi_type,
                    mdb: body.first().copied().unwrap_or(0),
                },
                data: Vec::new(),
                completed: false,
            });
        }

        if footer.pending_read {
            let mut payload_size = body.len();
            if footer.bytes_valid > 0 && payload_size >= crate::constants::misc::DWORD_SIZE {
                // only bytes_valid bytes of the last DWORD are payload
                payload_size =
                    payload_size - crate::constants::misc::DWORD_SIZE + footer.bytes_valid as usize;
            }
            let chunk = body[..payload_size].to_vec();
            state.assembly.push(chunk);
        }

        if footer.last_byte {
            let payload = state.assembly.join();
            // the most recently queued response is the one being assembled
            match state.queue.tail_mut() {
                Some(response) => {
                    response.data = payload;
                    response.completed = true;
                }
                None => {
                    debug!("IBI last byte received but no response in queue");
                }
            }
        }

        Ok(())
    }

    /// Queues an "I3C IBI" notification so it can be paired with its
    /// assembled response, then fires any pairing that is now possible.
    pub fn handle_notification(&self, code: u16) {
        self.state.lock().unwrap().entries.append(code);
        self.call_pending();
    }

    /// Fires the user callback when a completed response is at the front
    /// of the queue and a notification entry is waiting for it. The two
    /// queues advance together; the callback runs outside the state lock.
    pub fn call_pending(&self) {
        let (report, response) = {
            let mut state = self.state.lock().unwrap();
            if state.entries.is_empty() || state.queue.is_empty() {
                return;
            }
            if !state.queue.get(0).map(|r| r.completed).unwrap_or(false) {
                return;
            }
            let report = state.entries.remove_at(0);
            let response = state.queue.remove_at(0);
            (report, response)
        };

        let mut callback = self.callback.lock().unwrap();
        if let Some(on_ibi) = callback.as_mut() {
            on_ibi(report, &response.descriptor, &response.data);
        }
    }

    /// Drops all pending entries, queued responses and assembly chunks.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.drain_all();
        state.queue.drain_all();
        state.assembly.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::IbiResponseFooter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn frame(sequence_id: u16, body: &[u8], footer: IbiResponseFooter) -> Vec<u8> {
        wire::build_ibi_response_frame(sequence_id, body, &footer)
    }

    #[test]
    fn single_frame_response_completes_with_mdb() {
        let handler = IbiHandler::new();
        let received: Arc<Mutex<Vec<(u16, IbiDescriptor, Vec<u8>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        handler.set_callback(Box::new(move |report, descriptor, data| {
            sink.lock().unwrap().push((report, *descriptor, data.to_vec()));
        }));

        // MDB 0x47 = group 2, specific id 7
        let body = [0x47, 0x01, 0x02, 0x03];
        handler
            .handle_response_frame(&frame(
                0,
                &body,
                IbiResponseFooter {
                    target_address: 0x15,
                    pending_read: true,
                    last_byte: true,
                    ..Default::default()
                },
            ))
            .unwrap();
        handler.handle_notification(0x2);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (report, descriptor, data) = &received[0];
        assert_eq!(*report, 0x2);
        assert_eq!(descriptor.address, 0x15);
        assert_eq!(descriptor.mdb, 0x47);
        assert_eq!(descriptor.interrupt_group_id(), 2);
        assert_eq!(descriptor.specific_interrupt_id(), 7);
        assert_eq!(data, &body.to_vec());
    }

    #[test]
    fn multi_frame_payload_is_concatenated_with_truncation() {
        let handler = IbiHandler::new();
        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        handler.set_callback(Box::new(move |_, _, data| {
            sink.lock().unwrap().push(data.to_vec());
        }));

        handler
            .handle_response_frame(&frame(
                0,
                &[1, 2, 3, 4],
                IbiResponseFooter {
                    pending_read: true,
                    ..Default::default()
                },
            ))
            .unwrap();
        // continuation frame: only 2 bytes of the last DWORD are payload
        handler
            .handle_response_frame(&frame(
                1,
                &[5, 6, 0, 0],
                IbiResponseFooter {
                    pending_read: true,
                    last_byte: true,
                    bytes_valid: 2,
                    ..Default::default()
                },
            ))
            .unwrap();
        handler.handle_notification(0x2);

        let received = received.lock().unwrap();
        assert_eq!(received[0], vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn callback_waits_until_response_completes() {
        let handler = IbiHandler::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        handler.set_callback(Box::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // notification arrives before the response data
        handler.handle_notification(0x2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        handler
            .handle_response_frame(&frame(
                0,
                &[0xAB, 0, 0, 0],
                IbiResponseFooter {
                    pending_read: true,
                    ..Default::default()
                },
            ))
            .unwrap();
        handler.call_pending();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        handler
            .handle_response_frame(&frame(
                2,
                &[],
                IbiResponseFooter {
                    last_byte: true,
                    ..Default::default()
                },
            ))
            .unwrap();
        handler.call_pending();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_assembly_is_discarded_when_new_response_starts() {
        let handler = IbiHandler::new();
        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        handler.set_callback(Box::new(move |_, _, data| {
            sink.lock().unwrap().push(data.to_vec());
        }));

        // a response starts collecting but never sees its last byte
        handler
            .handle_response_frame(&frame(
                0,
                &[9, 9, 9, 9],
                IbiResponseFooter {
                    pending_read: true,
                    ..Default::default()
                },
            ))
            .unwrap();
        // a new sequence starts; the stale chunks must not leak into it
        handler
            .handle_response_frame(&frame(
                0,
                &[1, 2, 3, 4],
                IbiResponseFooter {
                    pending_read: true,
                    last_byte: true,
                    ..Default::default()
                },
            ))
            .unwrap();
        handler.handle_notification(0x2);
        handler.handle_notification(0x2);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], vec![1, 2, 3, 4]);
    }

    #[test]
    fn pairing_follows_arrival_order() {
        let handler = IbiHandler::new();
        let received: Arc<Mutex<Vec<(u16, u8)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        handler.set_callback(Box::new(move |report, descriptor, _| {
            sink.lock().unwrap().push((report, descriptor.address));
        }));

        for (address, report) in [(0x10u8, 0x1u16), (0x20, 0x2)] {
            handler
                .handle_response_frame(&frame(
                    0,
                    &[0, 0, 0, 0],
                    IbiResponseFooter {
                        target_address: address,
                        pending_read: true,
                        last_byte: true,
                        ..Default::default()
                    },
                ))
                .unwrap();
            handler.handle_notification(report);
        }

        let received = received.lock().unwrap();
        assert_eq!(*received, vec![(0x1, 0x10), (0x2, 0x20)]);
    }
}
