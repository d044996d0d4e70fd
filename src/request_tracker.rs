//! ## Request Tracker
//!
//! Tracks every unanswered bulk request sent to the I3C function.
//!
//! A bulk request transfer can contain a single independent command or a
//! list of dependent commands. Either way the I3C function answers with a
//! single response transfer carrying one response block per command. The
//! tracker serves three purposes:
//! - it remembers how many commands went out in the same transfer, so the
//!   response handler knows how many response blocks to parse;
//! - it matches arriving responses with their request IDs and either runs
//!   the registered callback or holds the response for the blocking API;
//! - it remembers which requests are dependent on their predecessor, so a
//!   stall that ends in cancellation can sweep away the whole chain.
//!

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::commands::{OnResponse, Response};
use crate::constants::misc::DEFAULT_REATTEMPT_MAX;
use crate::error::Error;
use crate::list::{OrderedList, SweepAction};

use anyhow::Result;
use log::debug;

/// Callback executed when a vendor specific response is received. It gets
/// the response bytes with the bulk header already stripped.
pub type OnVendorResponse = Box<dyn FnMut(&[u8]) + Send>;

/// ### Regular Request
///
/// One tracked command of a bulk request transfer.
///
pub struct RegularRequest {
    /// The ID of the command being tracked
    pub request_id: u16,
    /// The total number of commands sent in the same request transfer
    pub total_commands: usize,
    /// Whether this request depends on the correct execution of the
    /// previous command
    pub dependent_on_previous: bool,
    /// Number of times the request has been reattempted after stalling
    pub reattempt_count: u32,
    /// The response received from the I3C function, when available
    pub response: Option<Response>,
    /// Callback to execute when the response is received
    pub on_response: Option<OnResponse>,
}

pub(crate) struct TrackerState {
    pub requests: OrderedList<RegularRequest>,
    next_request_id: u16,
}

impl TrackerState {
    pub fn find_mut(&mut self, request_id: u16) -> Option<&mut RegularRequest> {
        self.requests
            .search_mut(|request| request.request_id == request_id)
    }
}

/// ### Request Tracker
///
/// Tracks all outstanding regular requests of one device, plus the vendor
/// specific response callback. One exclusive lock guards the record list;
/// user callbacks are never invoked while it is held.
///
pub struct RequestTracker {
    state: Mutex<TrackerState>,
    /// Maximum number of times to reattempt a stalled request
    reattempt_max: AtomicU32,
    vendor_callback: Mutex<Option<OnVendorResponse>>,
}

impl Default for RequestTracker {
    fn default() -> RequestTracker {
        RequestTracker::new()
    }
}

impl RequestTracker {
    pub fn new() -> RequestTracker {
        RequestTracker {
            state: Mutex::new(TrackerState {
                requests: OrderedList::new(),
                next_request_id: 0,
            }),
            reattempt_max: AtomicU32::new(DEFAULT_REATTEMPT_MAX),
            vendor_callback: Mutex::new(None),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap()
    }

    /// Returns the next batch of monotonically increasing request IDs.
    ///
    /// IDs wrap at 2^16. The tracker makes no provision for a wrapped ID
    /// colliding with a still-live older record; at realistic request
    /// lifetimes the old record is long gone before the counter comes
    /// back around.
    pub fn assign_ids(&self, count: usize) -> Vec<u16> {
        let mut state = self.lock();
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(state.next_request_id);
            state.next_request_id = state.next_request_id.wrapping_add(1);
        }
        ids
    }

    /// Appends one record per command, all sharing the same batch size.
    ///
    /// The first record carries the caller-supplied dependency flag; every
    /// subsequent command in the same transfer is dependent on its
    /// predecessor by construction. Returns the record count before the
    /// append so a failed transfer can be rolled back.
    pub fn register_batch(
        &self,
        ids: &[u16],
        dependent_on_previous: bool,
        callbacks: Vec<Option<OnResponse>>,
    ) -> usize {
        let mut state = self.lock();
        let prior_len = state.requests.len();
        for (index, (id, on_response)) in ids.iter().zip(callbacks).enumerate() {
            state.requests.append(RegularRequest {
                request_id: *id,
                total_commands: ids.len(),
                dependent_on_previous: if index == 0 {
                    dependent_on_previous
                } else {
                    true
                },
                reattempt_count: 0,
                response: None,
                on_response,
            });
        }
        prior_len
    }

    /// Deletes the records appended after `prior_len`, restoring the tail
    /// that `register_batch` returned. Used when the bulk-OUT submission
    /// fails after registration.
    pub fn rollback_batch(&self, prior_len: usize) {
        self.lock().requests.truncate(prior_len);
    }

    /// Whether a record with the given ID is currently tracked.
    pub fn contains(&self, request_id: u16) -> bool {
        self.lock().find_mut(request_id).is_some()
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The batch size recorded for a request ID.
    pub fn total_commands(&self, request_id: u16) -> Option<usize> {
        self.lock()
            .find_mut(request_id)
            .map(|request| request.total_commands)
    }

    /// Removes the record for `request_id` and returns its response.
    ///
    /// Fails with `NotFound` if the ID is unknown and `NotReady` if no
    /// response has arrived yet (the record stays tracked in that case).
    pub fn consume_response(&self, request_id: u16) -> Result<Response> {
        let mut state = self.lock();
        let index = state
            .requests
            .position(|request| request.request_id == request_id)
            .ok_or(Error::NotFound(request_id))?;
        if state.requests.get(index).unwrap().response.is_none() {
            return Err(Error::NotReady(request_id).into());
        }
        let request = state.requests.remove_at(index);
        Ok(request.response.unwrap())
    }

    /// Removes the record that stalled plus every record transitively
    /// dependent on it.
    ///
    /// The tracker is ordered by insertion and dependency only chains
    /// forward, so a single pass removes the start record and every later
    /// record marked dependent, and stops dead at the first later record
    /// that is not.
    pub fn remove_request_and_dependents(&self, start_id: u16) {
        let mut state = self.lock();
        let removed = state.requests.sweep(|request| {
            if request.request_id == start_id {
                SweepAction::Remove
            } else if request.request_id > start_id && request.dependent_on_previous {
                SweepAction::Remove
            } else if request.request_id > start_id {
                // first non-dependent request after the chain, we are done
                SweepAction::Stop
            } else {
                SweepAction::Keep
            }
        });
        debug!(
            "removed request {} and {} dependent request(s) from the tracker",
            start_id,
            removed.len().saturating_sub(1)
        );
    }

    /// Bumps the reattempt counter of a stalled request and returns the
    /// new value, or None when the record is unknown.
    pub fn increment_reattempt(&self, request_id: u16) -> Option<u32> {
        let mut state = self.lock();
        let request = state.find_mut(request_id)?;
        request.reattempt_count += 1;
        Some(request.reattempt_count)
    }

    /// The reattempt counter of a tracked request.
    pub fn reattempt_count(&self, request_id: u16) -> Option<u32> {
        let mut state = self.lock();
        state.find_mut(request_id).map(|r| r.reattempt_count)
    }

    pub fn reattempt_max(&self) -> u32 {
        self.reattempt_max.load(Ordering::Relaxed)
    }

    pub fn set_reattempt_max(&self, reattempt_max: u32) {
        self.reattempt_max.store(reattempt_max, Ordering::Relaxed);
    }

    /// Installs the callback for vendor specific responses.
    pub fn set_vendor_callback(&self, callback: OnVendorResponse) {
        *self.vendor_callback.lock().unwrap() = Some(callback);
    }

    pub fn has_vendor_callback(&self) -> bool {
        self.vendor_callback.lock().unwrap().is_some()
    }

    /// Runs the vendor response callback with the given payload.
    pub(crate) fn run_vendor_callback(&self, payload: &[u8]) {
        // the callback is kept out of the record-list lock, but it must
        // not run concurrently with its own replacement
        let mut guard = self.vendor_callback.lock().unwrap();
        if let Some(callback) = guard.as_mut() {
            callback(payload);
        } else {
            debug!("a vendor specific response arrived but no callback is registered");
        }
    }

    /// Drops every tracked record. Used at device teardown; orphaned
    /// records from timed-out send operations are released here.
    pub fn clear(&self) {
        self.lock().requests.drain_all();
    }
}
