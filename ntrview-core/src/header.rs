//! The fixed-size control packet exchanged on the command port.
//!
//! ## Wire format (84 bytes, little-endian)
//!
//! ```text
//! magic:           u32      (4)   always 0x12345678
//! sequence:        u32      (4)
//! type:            u32      (4)   0 = plain, 1 = data follows
//! command:         u32      (4)
//! args:            u32 × 16 (64)
//! declared_length: u32      (4)   bytes of payload following the header
//! ```

use crate::error::NtrError;
use crate::message::{Command, TransferType};

/// Magic word that opens every control packet.
pub const MAGIC: u32 = 0x1234_5678;

/// Number of argument slots in a control packet.
pub const ARG_SLOTS: usize = 16;

/// Encoded size of a control packet header.
pub const HEADER_SIZE: usize = 4 * (4 + ARG_SLOTS + 1);

pub type ControlPacketBytes = [u8; HEADER_SIZE];

/// One control packet header.
///
/// `command` is kept as the raw id so packets carrying ids outside
/// [`Command`] can still be parsed and logged; use
/// [`command`](Self::command) for the typed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub sequence: u32,
    pub transfer_type: u32,
    pub command_id: u32,
    pub args: [u32; ARG_SLOTS],
    pub declared_length: u32,
}

impl ControlPacket {
    /// Build a packet for `command`.
    ///
    /// At most [`ARG_SLOTS`] arguments are used; extra values are an
    /// error rather than being silently dropped.
    pub fn new(
        sequence: u32,
        command: Command,
        args: &[u32],
        declared_length: u32,
    ) -> Result<Self, NtrError> {
        if args.len() > ARG_SLOTS {
            return Err(NtrError::ProtocolViolation(
                "control packets carry at most 16 arguments",
            ));
        }
        let mut slots = [0u32; ARG_SLOTS];
        slots[..args.len()].copy_from_slice(args);
        Ok(Self {
            sequence,
            transfer_type: command.transfer_type() as u32,
            command_id: command.id(),
            args: slots,
            declared_length,
        })
    }

    /// A heartbeat packet (`Empty`, no args).
    pub fn heartbeat(sequence: u32) -> Self {
        Self {
            sequence,
            transfer_type: TransferType::Plain as u32,
            command_id: Command::Empty.id(),
            args: [0; ARG_SLOTS],
            declared_length: 0,
        }
    }

    /// Typed command id. Unknown ids yield [`NtrError::UnknownVariant`].
    pub fn command(&self) -> Result<Command, NtrError> {
        Command::try_from(self.command_id)
    }

    pub fn to_bytes(&self) -> ControlPacketBytes {
        let mut packet: ControlPacketBytes = [0; HEADER_SIZE];
        packet[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        packet[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        packet[8..12].copy_from_slice(&self.transfer_type.to_le_bytes());
        packet[12..16].copy_from_slice(&self.command_id.to_le_bytes());
        for (i, arg) in self.args.iter().enumerate() {
            let at = 16 + i * 4;
            packet[at..at + 4].copy_from_slice(&arg.to_le_bytes());
        }
        packet[80..84].copy_from_slice(&self.declared_length.to_le_bytes());
        packet
    }

    /// Parse the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NtrError> {
        if bytes.len() < HEADER_SIZE {
            return Err(NtrError::truncated("control packet", HEADER_SIZE, bytes.len()));
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        let magic = word(0);
        if magic != MAGIC {
            return Err(NtrError::InvalidMagic { found: magic });
        }

        let mut args = [0u32; ARG_SLOTS];
        for (i, slot) in args.iter_mut().enumerate() {
            *slot = word(16 + i * 4);
        }

        Ok(Self {
            sequence: word(4),
            transfer_type: word(8),
            command_id: word(12),
            args,
            declared_length: word(80),
        })
    }
}
