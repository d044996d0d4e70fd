//! ## Bulk
//!
//! The bulk transfer pipeline.
//!
//! Outbound: a queue of validated commands becomes one bulk-OUT transfer
//! (one shared header, then per-command block header + descriptor +
//! padded data), sized against the bridge's available buffer, with the
//! tracker registration rolled back if the submission fails.
//!
//! Inbound: every buffer completed by the perpetual bulk-IN submission is
//! routed by its 2-bit tag to the regular, IBI or vendor-specific
//! handler. The stall-on-NACK notification handler also lives here since
//! resume/cancel acts on the same tracker.
//!

use std::sync::Arc;

use crate::commands::{Command, Response};
use crate::communication::control;
use crate::error::Error;
use crate::ibi::IbiHandler;
use crate::request_tracker::RequestTracker;
use crate::usb::UsbTransport;
use crate::wire;

use anyhow::Result;
use log::{debug, warn};

/// ### Send Commands
///
/// Sends a bulk request consisting of one or many commands and their
/// associated data.
///
/// The commands in one request are executed in strict order from first
/// to last, and the I3C function answers with a single response transfer
/// containing response blocks for all of them; since all USB
/// transactions are host initiated, that response is collected separately
/// by the polling loop.
///
/// If `dependent_on_previous` is set and a command in the previous bulk
/// request stalls on NACK past its retry budget, the commands in this
/// request are cancelled along with it.
///
/// Returns the request ID assigned to each command, in order.
pub fn send_commands(
    usb: &dyn UsbTransport,
    tracker: &RequestTracker,
    commands: Vec<Command>,
    dependent_on_previous: bool,
) -> Result<Vec<u16>> {
    if commands.is_empty() {
        return Err(Error::MissingArgument.into());
    }

    // one bulk request transfer header serves all commands; the bridge
    // must also have room for the matching response transfer, including
    // the data blocks that Read commands will produce
    let mut buffer_size = wire::BULK_TRANSFER_HEADER_SIZE;
    let mut response_size = wire::BULK_TRANSFER_HEADER_SIZE;

    for command in &commands {
        command.validate()?;

        let desc = &command.descriptor;
        let (data_block, response_data_block) = match desc.direction {
            crate::commands::Direction::Read => {
                // Read commands carry no data block; data_length says how
                // much the response will carry instead
                (0, wire::dword_block_size(desc.data_length as usize))
            }
            _ => (wire::dword_block_size(desc.data_length as usize), 0),
        };

        buffer_size += wire::COMMAND_BLOCK_HEADER_SIZE + wire::COMMAND_DESCRIPTOR_SIZE + data_block;
        response_size +=
            wire::RESPONSE_BLOCK_HEADER_SIZE + wire::RESPONSE_DESCRIPTOR_SIZE + response_data_block;
    }

    let buffer_available = control::get_buffer_available(usb)?;
    if (buffer_size + response_size) as u32 > buffer_available {
        return Err(Error::Overflow.into());
    }

    let request_ids = tracker.assign_ids(commands.len());

    let mut buffer = Vec::with_capacity(buffer_size);
    wire::put_bulk_transfer_header(&mut buffer, wire::BulkTag::Regular, dependent_on_previous);

    let mut callbacks = Vec::with_capacity(commands.len());
    for (command, request_id) in commands.into_iter().zip(&request_ids) {
        wire::put_command_block(
            &mut buffer,
            *request_id,
            &command.descriptor,
            command.data.as_deref(),
        );
        callbacks.push(command.on_response);
    }

    // register before submitting, keeping the prior tail so a failed
    // submission can be rolled back; a caller polling the tracker never
    // sees a partial registration either way
    let prior_len = tracker.register_batch(&request_ids, dependent_on_previous, callbacks);

    if let Err(error) = usb.bulk_out(&buffer) {
        tracker.rollback_batch(prior_len);
        return Err(error);
    }

    Ok(request_ids)
}

/// ### Handle Bulk Response
///
/// Entry point for every buffer the perpetual bulk-IN submission
/// completes: routes by the 2-bit header tag.
///
pub fn handle_bulk_response(tracker: &RequestTracker, ibi: &IbiHandler, buffer: &[u8]) {
    let (tag, _) = match wire::parse_bulk_transfer_header(buffer) {
        Ok(header) => header,
        Err(error) => {
            warn!("unknown bulk response: {error}");
            return;
        }
    };

    match tag {
        wire::BulkTag::Regular => {
            if let Err(error) = handle_regular_response(tracker, buffer) {
                debug!("failed to get the regular response: {error}");
            }
        }
        wire::BulkTag::Ibi => {
            if let Err(error) = ibi.handle_response_frame(buffer) {
                debug!("failed to handle interrupt bulk response: {error}");
            }
            ibi.call_pending();
        }
        wire::BulkTag::VendorSpecific => handle_vendor_specific_response(tracker, buffer),
    }
}

/// Parses a regular bulk response transfer and feeds each response block
/// to its tracked request.
///
/// The transfer contains the responses for every command of one request
/// transfer; the tracker knows the batch size from the first request ID.
/// For each block, a registered callback decides whether the record is
/// retired immediately; without one the response is stored for the
/// blocking API. Callbacks run outside the tracker lock.
fn handle_regular_response(tracker: &RequestTracker, buffer: &[u8]) -> Result<()> {
    let mut offset = wire::BULK_TRANSFER_HEADER_SIZE;

    let first = wire::parse_response_block(buffer, offset)?;
    let total_commands = tracker
        .total_commands(first.request_id)
        .ok_or(Error::NotFound(first.request_id))?;

    for _ in 0..total_commands {
        let parsed = wire::parse_response_block(buffer, offset)?;
        offset += parsed.block_size;

        let response = Response {
            attempted: parsed.attempted,
            error_status: parsed.error_status,
            has_data: parsed.has_data,
            data_length: parsed.data_length,
            data: parsed.data,
        };

        // each block is looked up by its own ID; responses are in tracker
        // order, so this also recovers if sequential order is violated
        let callback = {
            let mut state = tracker.lock();
            let record = match state.find_mut(parsed.request_id) {
                Some(record) => record,
                None => {
                    debug!("request id {} is unknown", parsed.request_id);
                    return Err(Error::NotFound(parsed.request_id).into());
                }
            };
            if record.response.is_some() {
                debug!("a response for request id {} already exists", parsed.request_id);
                return Err(Error::InvalidState("duplicate response").into());
            }
            record.on_response.take()
        };

        match callback {
            Some(mut on_response) => {
                let consumed = on_response(&response);
                let mut state = tracker.lock();
                if consumed {
                    // the callback took ownership of the response, the
                    // request no longer needs tracking
                    if let Some(index) = state
                        .requests
                        .position(|r| r.request_id == parsed.request_id)
                    {
                        state.requests.remove_at(index);
                    }
                } else if let Some(record) = state.find_mut(parsed.request_id) {
                    record.response = Some(response);
                }
            }
            None => {
                let mut state = tracker.lock();
                if let Some(record) = state.find_mut(parsed.request_id) {
                    record.response = Some(response);
                }
            }
        }
    }

    Ok(())
}

/// Strips the bulk header off a vendor-specific response and hands the
/// rest verbatim to the registered callback. No retry, no acknowledgment.
fn handle_vendor_specific_response(tracker: &RequestTracker, buffer: &[u8]) {
    // only the bulk transfer header has a known size here; the rest is
    // defined by the vendor and passed through untouched
    tracker.run_vendor_callback(&buffer[wire::BULK_TRANSFER_HEADER_SIZE..]);
}

/// ### Handle Stall On NACK
///
/// Reacts to the stall notification whose code is the stalled request ID:
/// resume while the request still has reattempts left, cancel once the
/// budget is spent. Cancellation completes asynchronously, and its
/// completion removes the stalled request and every forward-dependent
/// request from the tracker.
pub fn handle_stall_on_nack(
    usb: &Arc<dyn UsbTransport>,
    tracker: &Arc<RequestTracker>,
    request_id: u16,
) {
    let reattempt_count = match tracker.reattempt_count(request_id) {
        Some(count) => count,
        None => {
            debug!(
                "the request id {request_id} referred to in the stall notification was not found"
            );
            return;
        }
    };

    let result = if reattempt_count < tracker.reattempt_max() {
        let result = control::resume_bulk_request_async(usb.as_ref());
        tracker.increment_reattempt(request_id);
        result
    } else {
        let tracker = Arc::clone(tracker);
        control::cancel_bulk_request_async(
            usb.as_ref(),
            Box::new(move |result| {
                if result.is_ok() {
                    tracker.remove_request_and_dependents(request_id);
                } else {
                    warn!("the cancel request for stalled request {request_id} failed");
                }
            }),
        )
    };

    if let Err(error) = result {
        debug!("there was a problem resuming/cancelling the stalled request {request_id}: {error}");
    }
}
