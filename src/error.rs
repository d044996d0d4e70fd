//! ## USB-I3C Errors
//!
//! The errors used throughout the crate.
//!

use crate::commands::ExecutionStatus;

#[allow(unused)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("device not found")]
    DeviceNotFound,
    #[error("device is not compatible with USB-I3C")]
    DeviceIncompatible,
    #[error("bulk endpoint pair not found")]
    BulkEndpointNotFound,
    #[error("interrupt in endpoint not found")]
    InterruptEndpointNotFound,
    #[error("a required argument is missing")]
    MissingArgument,
    #[error("operation is invalid in the current device state: {0}")]
    InvalidState(&'static str),
    #[error("not enough buffer available in the I3C function")]
    Overflow,
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
    #[error("timed out waiting for the I3C function")]
    Timeout,
    #[error("usb transport error")]
    Transport(#[from] rusb::Error),
    #[error("request id {0} is unknown")]
    NotFound(u16),
    #[error("the response for request id {0} has not arrived")]
    NotReady(u16),
    #[error("address or provisioned id already in use")]
    Duplicate,
    #[error("the device does not have the required capability: {0}")]
    Unsupported(&'static str),
    #[error("the I3C bus failed to initialize (code {code})")]
    BusInitFailed { code: u16 },
    #[error("command failed with status {status:?}")]
    CommandFailed { status: ExecutionStatus },
}
