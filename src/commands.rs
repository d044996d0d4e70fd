//! ## Commands
//!
//! The command and response model for regular bulk requests: descriptor
//! enumerations, the queued command representation, and the validation
//! rules commands must satisfy before they are put on the wire.
//!

use crate::error::Error;
use crate::types::I3cMode;

use anyhow::Result;

/// ### Command Direction
///
/// The Read/Write direction of a regular command or CCC.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// The command writes data into one or many I3C devices
    Write = 0x0,
    /// The command reads data from one or many I3C devices
    Read = 0x1,
}

/// ### Command Type
///
/// The type of a command descriptor in a bulk request.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandType {
    Regular = 0x0,
    CccWithoutDefiningByte = 0x1,
    CccWithDefiningByte = 0x2,
    TargetResetPattern = 0x3,
}

impl CommandType {
    pub(crate) fn from_wire(value: u8) -> Option<CommandType> {
        match value {
            0x0 => Some(CommandType::Regular),
            0x1 => Some(CommandType::CccWithoutDefiningByte),
            0x2 => Some(CommandType::CccWithDefiningByte),
            0x3 => Some(CommandType::TargetResetPattern),
            _ => None,
        }
    }
}

/// ### Error Handling
///
/// The condition for the I3C controller to abort subsequent commands.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorHandling {
    /// Terminate on any error (where NACK is an error)
    TerminateOnAnyError = 0x0,
    /// Terminate on any error except NACK (where NACK is not an error)
    TerminateOnAnyErrorExceptNack = 0x1,
    /// Do not terminate on error including NACK
    DoNotTerminateOnError = 0x2,
    /// Terminate on short read
    TerminateOnShortRead = 0x3,
    /// Terminate on any error, but stall execution on NACK
    TerminateOnErrorButStallOnNack = 0x4,
}

/// ### Transfer Mode
///
/// Transfer modes for the I3C or I2C commands.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMode {
    I3cSdr = 0x0,
    I3cHdrDdr = 0x1,
    I3cHdrTs = 0x2,
    I3cHdrBt = 0x3,
    I2c = 0x8,
}

/// Transfer rates for the I3C modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I3cTransferRate {
    Rate2Mhz = 0x0,
    Rate4Mhz = 0x1,
    Rate6Mhz = 0x2,
    Rate8Mhz = 0x3,
    Rate12_5Mhz = 0x4,
    RateUserDefined1 = 0x5,
    RateUserDefined2 = 0x6,
}

/// Transfer rates for the I2C mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I2cTransferRate {
    Rate100Khz = 0x0,
    Rate400Khz = 0x1,
    Rate1Mhz = 0x2,
    RateUserDefined1 = 0x3,
    RateUserDefined2 = 0x4,
    RateUserDefined3 = 0x5,
}

/// ### Execution Status
///
/// The status the I3C function reports for a processed command.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStatus {
    Succeeded = 0x0,
    CrcError = 0x1,
    ParityError = 0x2,
    FrameError = 0x3,
    AddressHeaderError = 0x4,
    Nack = 0x5,
    ShortReadError = 0x7,
    ControllerError = 0x8,
    TransferError = 0x9,
    BadCommand = 0xA,
    AbortedWithCrcError = 0xB,
    GeneralError1 = 0xC,
    GeneralError2 = 0xD,
    GeneralError3 = 0xE,
    GeneralError4 = 0xF,
}

impl ExecutionStatus {
    pub(crate) fn from_wire(value: u8) -> Option<ExecutionStatus> {
        match value {
            0x0 => Some(ExecutionStatus::Succeeded),
            0x1 => Some(ExecutionStatus::CrcError),
            0x2 => Some(ExecutionStatus::ParityError),
            0x3 => Some(ExecutionStatus::FrameError),
            0x4 => Some(ExecutionStatus::AddressHeaderError),
            0x5 => Some(ExecutionStatus::Nack),
            0x7 => Some(ExecutionStatus::ShortReadError),
            0x8 => Some(ExecutionStatus::ControllerError),
            0x9 => Some(ExecutionStatus::TransferError),
            0xA => Some(ExecutionStatus::BadCommand),
            0xB => Some(ExecutionStatus::AbortedWithCrcError),
            0xC => Some(ExecutionStatus::GeneralError1),
            0xD => Some(ExecutionStatus::GeneralError2),
            0xE => Some(ExecutionStatus::GeneralError3),
            0xF => Some(ExecutionStatus::GeneralError4),
            _ => None,
        }
    }
}

/// ### Command Descriptor
///
/// Defines the characteristics of one I3C command in a bulk request.
///
#[derive(Clone, Debug)]
pub struct CommandDescriptor {
    pub command_type: CommandType,
    pub direction: Direction,
    pub error_handling: ErrorHandling,
    /// The target device address (7 bits)
    pub target_address: u8,
    pub transfer_mode: u8,
    pub transfer_rate: u8,
    pub tm_specific_info: u8,
    /// The defining byte for the CCC (if applicable)
    pub defining_byte: u8,
    /// The value for the CCC (if applicable)
    pub common_command_code: u8,
    /// The number of bytes of data to be transferred (22 bits on the wire)
    pub data_length: u32,
}

impl CommandDescriptor {
    /// A descriptor with the default values that apply to all commands.
    pub fn new(mode: &I3cMode) -> CommandDescriptor {
        CommandDescriptor {
            command_type: CommandType::Regular,
            direction: Direction::Write,
            error_handling: ErrorHandling::TerminateOnAnyError,
            target_address: 0,
            transfer_mode: mode.transfer_mode,
            transfer_rate: mode.transfer_rate,
            tm_specific_info: mode.tm_specific_info,
            defining_byte: 0,
            common_command_code: 0,
            data_length: 0,
        }
    }
}

/// ### Response Callback
///
/// Executed when the response to a submitted command arrives. Returning
/// `true` means the callback consumed the response and the request can be
/// dropped from the tracker; returning `false` keeps the response in the
/// tracker for the blocking API to collect.
pub type OnResponse = Box<dyn FnMut(&Response) -> bool + Send>;

/// ### Command
///
/// A command descriptor plus its optional payload and response callback.
///
pub struct Command {
    pub descriptor: CommandDescriptor,
    /// Optional data buffer attached to the command (WRITE direction only)
    pub data: Option<Vec<u8>>,
    /// Callback executed when the response is received (submit path only)
    pub on_response: Option<OnResponse>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("descriptor", &self.descriptor)
            .field("data", &self.data.as_ref().map(|d| d.len()))
            .field("has_callback", &self.on_response.is_some())
            .finish()
    }
}

impl Command {
    pub fn new(descriptor: CommandDescriptor) -> Command {
        Command {
            descriptor,
            data: None,
            on_response: None,
        }
    }

    /// Checks the command for compliance before it is put on the wire.
    pub fn validate(&self) -> Result<()> {
        let desc = &self.descriptor;

        if desc.direction == Direction::Read && desc.data_length == 0 {
            // a Read command needs data_length to say how many bytes to read
            return Err(Error::MissingArgument.into());
        }
        if desc.direction == Direction::Read && self.data.is_some() {
            return Err(Error::InvalidState("a read command cannot carry data").into());
        }
        if desc.direction != Direction::Read && desc.data_length > 0 {
            match &self.data {
                Some(data) if data.len() as u32 == desc.data_length => {}
                _ => return Err(Error::MissingArgument.into()),
            }
        }

        Ok(())
    }
}

/// Validates the user-supplied arguments of an enqueue operation.
///
/// These checks run when the command is queued, so malformed commands are
/// rejected before they can poison a whole batch.
pub(crate) fn validate_enqueue_args(
    direction: Direction,
    data: Option<&[u8]>,
    data_length: u32,
    ccc: u8,
    defining_byte: u8,
) -> Result<()> {
    if let Some(data) = data {
        if data_length == 0 || data.len() as u32 != data_length {
            return Err(Error::MissingArgument.into());
        }
    }
    if direction != Direction::Read && data.is_none() && data_length > 0 {
        return Err(Error::MissingArgument.into());
    }
    if direction == Direction::Read {
        if data.is_some() {
            return Err(Error::InvalidState("a read command cannot carry data").into());
        }
        if data_length == 0 {
            return Err(Error::MissingArgument.into());
        }
        if data_length % 4 != 0 {
            return Err(Error::InvalidState("read length must be 32-bit aligned").into());
        }
    }
    if ccc == 0 && defining_byte != 0 {
        return Err(Error::MissingArgument.into());
    }

    Ok(())
}

/// ### Response
///
/// The response the I3C function sends for one command, regardless of how
/// many commands were batched in the originating request transfer.
///
#[derive(Clone, Debug)]
pub struct Response {
    /// Whether the command in the corresponding request was attempted
    pub attempted: bool,
    /// The status of the processed command
    pub error_status: ExecutionStatus,
    /// Whether the response block has data appended
    pub has_data: bool,
    /// The number of bytes of appended data (if any)
    pub data_length: u32,
    /// The data associated with the response
    pub data: Option<Vec<u8>>,
}
