//! Probe control packets: the handshake traffic exchanged next to the data
//! path (ping, reset, connected, acks, protocol version).
//!
//! Only the wire format lives here; the connection state machine that
//! drives these packets is a separate concern. Every control packet is
//! protected by a 16-bit ones'-complement checksum over the whole packet
//! (with the checksum field zeroed during computation), so a receiver can
//! discard corrupted control traffic without tearing the connection down.
//!
//! Layout (big-endian, byte-packed):
//!
//! ```text
//! senders_version:24 | command:8 |
//! senders_ip[64] | senders_gid[32] | senders_stream_name[138] |
//! senders_control_dest_port:16 | control_packet_num:16 | checksum:16 |
//! then, for Ack:        ack_command:8 | ack_control_packet_num:16
//! for everything else:  requires_ack:8
//! ```
//!
//! String fields are fixed-length and NUL-padded.

use bytes::{Buf, BufMut};
use static_assertions::const_assert;

use crate::version::ProtocolVersion;

/// Maximum length of the sender IP string field.
pub const MAX_IP_STRING_LENGTH: usize = 64;
/// Length of the sender interface GID field.
pub const MAX_IPV6_GID_LENGTH: usize = 32;
/// Maximum length of the sender stream name field.
pub const MAX_STREAM_NAME_STRING_LENGTH: usize = 138;

const FIXED_LEN: usize = 3 + 1 + MAX_IP_STRING_LENGTH + MAX_IPV6_GID_LENGTH
    + MAX_STREAM_NAME_STRING_LENGTH
    + 2
    + 2
    + 2;
const CHECKSUM_AT: usize = FIXED_LEN - 2;
/// Encoded length of an [`ProbeCommand::Ack`] packet.
pub const PROBE_ACK_LEN: usize = FIXED_LEN + 3;
/// Encoded length of every non-ack probe packet.
pub const PROBE_COMMAND_LEN: usize = FIXED_LEN + 1;

const_assert!(FIXED_LEN == 244);

/// Command carried by a probe control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeCommand {
    /// Ask the remote endpoint to reset connection state.
    Reset,
    /// Keep-alive while connected.
    Ping,
    /// Handshake completed; the data path may start.
    Connected,
    /// Acknowledges a previously received command.
    Ack,
    /// Advertises the sender's protocol version for negotiation.
    ProtocolVersion,
}

impl ProbeCommand {
    const fn to_wire(self) -> u8 {
        match self {
            Self::Reset => 0,
            Self::Ping => 1,
            Self::Connected => 2,
            Self::Ack => 3,
            Self::ProtocolVersion => 4,
        }
    }

    const fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Reset),
            1 => Some(Self::Ping),
            2 => Some(Self::Connected),
            3 => Some(Self::Ack),
            4 => Some(Self::ProtocolVersion),
            _ => None,
        }
    }
}

/// Command-specific trailer of a probe packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDetail {
    /// Trailer of every non-ack command.
    Command {
        /// Whether the receiver must answer with an [`ProbeCommand::Ack`].
        requires_ack: bool,
    },
    /// Trailer of an [`ProbeCommand::Ack`].
    Ack {
        /// The command being acknowledged.
        ack_command: ProbeCommand,
        /// The `control_packet_num` of the packet being acknowledged.
        ack_control_packet_num: u16,
    },
}

/// Decoded probe control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHeader {
    /// Protocol version of the sending endpoint.
    pub senders_version: ProtocolVersion,
    /// Command of this packet. [`ProbeCommand::Ack`] if and only if
    /// `detail` is [`ProbeDetail::Ack`].
    pub command: ProbeCommand,
    /// Sender IP address string.
    pub senders_ip: String,
    /// Sender fabric interface GID.
    pub senders_gid: [u8; MAX_IPV6_GID_LENGTH],
    /// Sender stream name.
    pub senders_stream_name: String,
    /// Port the sender listens on for control traffic.
    pub senders_control_dest_port: u16,
    /// Monotonic control packet counter of the sender.
    pub control_packet_num: u16,
    /// Command-specific trailer.
    pub detail: ProbeDetail,
}

/// Failed to encode a [`ProbeHeader`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeEncodeError {
    /// A string field exceeds its fixed wire length.
    #[error("{field} length {len} exceeds {max}")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Length of the value given.
        len: usize,
        /// Fixed wire length of the field.
        max: usize,
    },
    /// `command` and `detail` disagree about being an ack.
    #[error("command {command:?} does not match detail")]
    DetailMismatch {
        /// The header's command.
        command: ProbeCommand,
    },
}

/// Failed to decode a [`ProbeHeader`] from a received control packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeDecodeError {
    /// Packet length disagrees with the length its command requires.
    #[error("invalid probe packet size {len}, command requires {required}")]
    InvalidSize {
        /// Bytes the command's layout requires.
        required: usize,
        /// Bytes actually received.
        len: usize,
    },
    /// Checksum mismatch; the packet is corrupt.
    #[error("probe checksum mismatch - expected {expected:#06x}, computed {actual:#06x}")]
    Checksum {
        /// Checksum carried by the packet.
        expected: u16,
        /// Checksum computed over the received bytes.
        actual: u16,
    },
    /// Unknown command byte. Callers log a warning and drop the packet.
    #[error("unknown probe command {0}")]
    UnknownCommand(u8),
}

/// 16-bit ones'-complement sum over `data`, as used by the probe packet
/// checksum. A trailing odd byte is padded with zero.
fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    #[allow(clippy::cast_possible_truncation)] // folded into 16 bits above
    !(sum as u16)
}

fn put_padded(dst: &mut impl BufMut, value: &[u8], len: usize) {
    dst.put_slice(value);
    dst.put_bytes(0, len - value.len());
}

fn take_padded_string(src: &mut impl Buf, len: usize) -> String {
    let mut raw = vec![0u8; len];
    src.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    raw.truncate(end);
    String::from_utf8_lossy(&raw).into_owned()
}

impl ProbeHeader {
    /// Encoded length of this packet.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self.detail {
            ProbeDetail::Command { .. } => PROBE_COMMAND_LEN,
            ProbeDetail::Ack { .. } => PROBE_ACK_LEN,
        }
    }

    /// Encodes this packet onto the end of `dst`, computing and patching
    /// in the checksum. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Errors without writing anything if a string field overflows its
    /// fixed wire length or `command` disagrees with `detail`.
    pub fn encode(&self, dst: &mut Vec<u8>) -> Result<usize, ProbeEncodeError> {
        let is_ack = matches!(self.detail, ProbeDetail::Ack { .. });
        if is_ack != (self.command == ProbeCommand::Ack) {
            return Err(ProbeEncodeError::DetailMismatch {
                command: self.command,
            });
        }
        if self.senders_ip.len() > MAX_IP_STRING_LENGTH {
            return Err(ProbeEncodeError::FieldTooLong {
                field: "senders_ip",
                len: self.senders_ip.len(),
                max: MAX_IP_STRING_LENGTH,
            });
        }
        if self.senders_stream_name.len() > MAX_STREAM_NAME_STRING_LENGTH {
            return Err(ProbeEncodeError::FieldTooLong {
                field: "senders_stream_name",
                len: self.senders_stream_name.len(),
                max: MAX_STREAM_NAME_STRING_LENGTH,
            });
        }

        let at = dst.len();
        dst.put_u8(self.senders_version.version);
        dst.put_u8(self.senders_version.major);
        dst.put_u8(self.senders_version.probe);
        dst.put_u8(self.command.to_wire());
        put_padded(dst, self.senders_ip.as_bytes(), MAX_IP_STRING_LENGTH);
        dst.put_slice(&self.senders_gid);
        put_padded(
            dst,
            self.senders_stream_name.as_bytes(),
            MAX_STREAM_NAME_STRING_LENGTH,
        );
        dst.put_u16(self.senders_control_dest_port);
        dst.put_u16(self.control_packet_num);
        dst.put_u16(0); // checksum, patched below
        match self.detail {
            ProbeDetail::Command { requires_ack } => dst.put_u8(u8::from(requires_ack)),
            ProbeDetail::Ack {
                ack_command,
                ack_control_packet_num,
            } => {
                dst.put_u8(ack_command.to_wire());
                dst.put_u16(ack_control_packet_num);
            }
        }

        let checksum = ones_complement_sum(&dst[at..]);
        dst[at + CHECKSUM_AT..at + CHECKSUM_AT + 2].copy_from_slice(&checksum.to_be_bytes());
        Ok(dst.len() - at)
    }

    /// Decodes and checksum-verifies a received control packet.
    ///
    /// # Errors
    ///
    /// [`ProbeDecodeError::InvalidSize`] when the packet length disagrees
    /// with its command, [`ProbeDecodeError::Checksum`] on corruption, and
    /// [`ProbeDecodeError::UnknownCommand`] for command bytes this build
    /// does not know (log and drop).
    pub fn decode(raw: &[u8]) -> Result<Self, ProbeDecodeError> {
        if raw.len() < FIXED_LEN {
            return Err(ProbeDecodeError::InvalidSize {
                required: PROBE_COMMAND_LEN,
                len: raw.len(),
            });
        }
        let command = ProbeCommand::from_wire(raw[3])
            .ok_or(ProbeDecodeError::UnknownCommand(raw[3]))?;
        let required = if command == ProbeCommand::Ack {
            PROBE_ACK_LEN
        } else {
            PROBE_COMMAND_LEN
        };
        if raw.len() != required {
            return Err(ProbeDecodeError::InvalidSize {
                required,
                len: raw.len(),
            });
        }

        // verify with the checksum field zeroed out
        let expected = u16::from_be_bytes([raw[CHECKSUM_AT], raw[CHECKSUM_AT + 1]]);
        let mut zeroed = raw.to_vec();
        zeroed[CHECKSUM_AT] = 0;
        zeroed[CHECKSUM_AT + 1] = 0;
        let actual = ones_complement_sum(&zeroed);
        if expected != actual {
            return Err(ProbeDecodeError::Checksum { expected, actual });
        }

        let mut src = raw;
        let senders_version = ProtocolVersion {
            version: src.get_u8(),
            major: src.get_u8(),
            probe: src.get_u8(),
        };
        src.advance(1); // command, read above
        let senders_ip = take_padded_string(&mut src, MAX_IP_STRING_LENGTH);
        let mut senders_gid = [0u8; MAX_IPV6_GID_LENGTH];
        src.copy_to_slice(&mut senders_gid);
        let senders_stream_name = take_padded_string(&mut src, MAX_STREAM_NAME_STRING_LENGTH);
        let senders_control_dest_port = src.get_u16();
        let control_packet_num = src.get_u16();
        src.advance(2); // checksum, verified above
        let detail = if command == ProbeCommand::Ack {
            let ack_command = ProbeCommand::from_wire(src.get_u8())
                .ok_or_else(|| ProbeDecodeError::UnknownCommand(raw[FIXED_LEN]))?;
            ProbeDetail::Ack {
                ack_command,
                ack_control_packet_num: src.get_u16(),
            }
        } else {
            ProbeDetail::Command {
                requires_ack: src.get_u8() != 0,
            }
        };

        Ok(Self {
            senders_version,
            command,
            senders_ip,
            senders_gid,
            senders_stream_name,
            senders_control_dest_port,
            control_packet_num,
            detail,
        })
    }
}
