//! Control-channel command ids and transfer types.
//!
//! Uses proper enums with `TryFrom`; unknown values are errors, not panics.

use crate::error::NtrError;
use std::fmt;

// ── TransferType ─────────────────────────────────────────────────

/// The `type` word of a control packet.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    /// Header only; any payload length refers to a device response.
    Plain = 0,
    /// Header followed by raw bytes written by the client.
    WithData = 1,
}

impl TryFrom<u32> for TransferType {
    type Error = NtrError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TransferType::Plain),
            1 => Ok(TransferType::WithData),
            _ => Err(NtrError::UnknownVariant {
                type_name: "TransferType",
                value: value as u64,
            }),
        }
    }
}

// ── Command ──────────────────────────────────────────────────────

/// Commands understood by the device's control port.
///
/// The numeric values are the device's own ids and must never change.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Heartbeat / keep-alive.
    Empty = 0,
    /// Upload a save file; raw bytes follow the header.
    WriteSave = 1,
    Hello = 2,
    Reload = 3,
    /// Request the process list; answered with bulk text.
    PidList = 4,
    AttachProc = 5,
    ThreadList = 6,
    MemLayout = 7,
    ReadMem = 8,
    WriteMem = 9,
    Resume = 10,
    QueryHandle = 11,
    /// Switch the device into streaming mode.
    RemotePlay = 901,
}

impl Command {
    /// Every command in the table, in id order.
    pub const ALL: [Command; 13] = [
        Command::Empty,
        Command::WriteSave,
        Command::Hello,
        Command::Reload,
        Command::PidList,
        Command::AttachProc,
        Command::ThreadList,
        Command::MemLayout,
        Command::ReadMem,
        Command::WriteMem,
        Command::Resume,
        Command::QueryHandle,
        Command::RemotePlay,
    ];

    /// Wire id of the command.
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// The transfer type the client uses when sending this command.
    pub fn transfer_type(self) -> TransferType {
        match self {
            Command::WriteSave => TransferType::WithData,
            _ => TransferType::Plain,
        }
    }

    /// Returns `true` if raw bytes are written after the header.
    pub fn carries_data(self) -> bool {
        self.transfer_type() == TransferType::WithData
    }
}

impl TryFrom<u32> for Command {
    type Error = NtrError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::Empty),
            1 => Ok(Command::WriteSave),
            2 => Ok(Command::Hello),
            3 => Ok(Command::Reload),
            4 => Ok(Command::PidList),
            5 => Ok(Command::AttachProc),
            6 => Ok(Command::ThreadList),
            7 => Ok(Command::MemLayout),
            8 => Ok(Command::ReadMem),
            9 => Ok(Command::WriteMem),
            10 => Ok(Command::Resume),
            11 => Ok(Command::QueryHandle),
            901 => Ok(Command::RemotePlay),
            _ => Err(NtrError::UnknownVariant {
                type_name: "Command",
                value: value as u64,
            }),
        }
    }
}

impl std::str::FromStr for Command {
    type Err = NtrError;

    /// Accepts either the symbolic name (case-insensitive) or the
    /// numeric id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u32>() {
            return Command::try_from(id);
        }
        Command::ALL
            .into_iter()
            .find(|c| c.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| NtrError::Other(format!("unknown command name: {s}")))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_match_device_table() {
        assert_eq!(Command::Empty.id(), 0);
        assert_eq!(Command::WriteSave.id(), 1);
        assert_eq!(Command::PidList.id(), 4);
        assert_eq!(Command::QueryHandle.id(), 11);
        assert_eq!(Command::RemotePlay.id(), 901);
    }

    #[test]
    fn command_table_is_closed() {
        for cmd in Command::ALL {
            assert_eq!(Command::try_from(cmd.id()).unwrap(), cmd);
        }
        assert!(matches!(
            Command::try_from(12),
            Err(NtrError::UnknownVariant { value: 12, .. })
        ));
        assert!(Command::try_from(900).is_err());
    }

    #[test]
    fn only_write_save_carries_data() {
        for cmd in Command::ALL {
            assert_eq!(cmd.carries_data(), cmd == Command::WriteSave);
        }
    }

    #[test]
    fn parse_by_name_or_id() {
        assert_eq!("pidlist".parse::<Command>().unwrap(), Command::PidList);
        assert_eq!("901".parse::<Command>().unwrap(), Command::RemotePlay);
        assert!("teleport".parse::<Command>().is_err());
    }

    #[test]
    fn transfer_type_invalid() {
        assert!(TransferType::try_from(7).is_err());
    }
}
