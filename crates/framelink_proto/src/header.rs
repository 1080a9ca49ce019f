//! Data packet framing: the header carried in front of every payload
//! fragment on the wire.
//!
//! Layout of a single datagram:
//!
//! ```text
//! [ common header | seq-0 extension? | data-offset extension? | payload bytes ]
//! ```
//!
//! The common header differs between framing versions:
//!
//! ```text
//! v1: kind:8 | seq:16 | payload_num:8                  (4 bytes)
//! v2: kind:8 | seq:16 | payload_num:16 | packet_id:32  (9 bytes)
//! ```
//!
//! The first packet of every payload (`seq == 0`) carries the payload-wide
//! metadata:
//!
//! ```text
//! total_payload_size:32 | max_latency_us:64 | ptp_sec:32 | ptp_ns:32 |
//! user_data:64 | extra_data_size:16 | extra_data[..]
//! ```
//!
//! followed, under v2 only, by `tx_start_time_us:64`. Packets of a
//! [`PayloadKind::DataOffset`] payload with `seq > 0` instead carry a
//! 4-byte byte offset into the payload.
//!
//! All integers are big-endian. Decoded headers are uniform across
//! versions: v1 decodes with `packet_id == 0` and `tx_start_time_us == 0`.

use bytes::{Buf, BufMut, Bytes};
use static_assertions::const_assert;

use crate::seq::Seq;

/// How the data bytes of a payload's packets relate to payload byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PayloadKind {
    /// Packets occupy consecutive byte ranges of the payload in sequence
    /// number order.
    #[default]
    Sequential,
    /// Each packet past the first carries an explicit byte offset into the
    /// payload, letting the transport reorder aggressively.
    DataOffset,
}

impl PayloadKind {
    const fn to_wire(self) -> u8 {
        match self {
            Self::Sequential => 0,
            Self::DataOffset => 1,
        }
    }

    const fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Sequential),
            1 => Some(Self::DataOffset),
            _ => None,
        }
    }
}

/// A PTP `(seconds, nanoseconds)` pair carried verbatim with each payload.
///
/// The transport does not interpret it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PtpTimestamp {
    /// Seconds portion.
    pub seconds: u32,
    /// Nanoseconds portion.
    pub nanoseconds: u32,
}

/// Payload-wide metadata carried by the `seq == 0` packet of every payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadStart {
    /// Total size of the payload in bytes, across all packets.
    pub total_payload_size: u32,
    /// Receiver-enforced delivery deadline, in microseconds from the
    /// arrival of the payload's first packet.
    pub max_latency_us: u64,
    /// Origination timestamp of the media this payload carries.
    pub origination_ptp: PtpTimestamp,
    /// Opaque application data echoed back in the receive callback.
    pub user_data: u64,
    /// Opaque blob carrying the stream identifier and, optionally, the
    /// stream configuration. At most [`MAX_EXTRA_DATA_LEN`] bytes.
    pub extra_data: Bytes,
    /// Time the transmitter started sending this payload, in microseconds.
    /// v2 only; 0 under v1 framing.
    pub tx_start_time_us: u64,
}

/// Decoded framing header, uniform across wire versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketHeader {
    /// Data ordering discipline of this payload's packets.
    pub kind: PayloadKind,
    /// Per-payload packet sequence number, starting at 0.
    pub seq: Seq,
    /// Per-endpoint payload number. 8-bit on the wire under v1.
    pub payload_num: Seq,
    /// Monotonic per-endpoint packet counter, wrapping. v2 only; 0 under
    /// v1 framing.
    pub packet_id: u32,
    /// Payload-wide metadata. `Some` if and only if `seq == 0`.
    pub start: Option<PayloadStart>,
    /// Byte offset of this packet's data within the payload. Meaningful
    /// only when `kind == DataOffset` and `seq > 0`.
    pub data_offset: u32,
}

/// The fields needed to route a packet into the receive reorderers,
/// peekable without a full header decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderInfo {
    /// Per-endpoint payload number.
    pub payload_num: Seq,
    /// Per-payload packet sequence number.
    pub seq: Seq,
}

/// Upper bound on the length of the seq-0 extra data blob.
pub const MAX_EXTRA_DATA_LEN: usize = 1536;

const V1_COMMON_LEN: usize = 1 + 2 + 1;
const V2_COMMON_LEN: usize = 1 + 2 + 2 + 4;
const START_FIXED_LEN: usize = 4 + 8 + 4 + 4 + 8 + 2;
const V2_START_TRAILER_LEN: usize = 8;
const OFFSET_EXT_LEN: usize = 4;

const_assert!(V1_COMMON_LEN == 4);
const_assert!(V2_COMMON_LEN == 9);
const_assert!(START_FIXED_LEN == 30);

/// Failed to decode a [`PacketHeader`] from a received datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderDecodeError {
    /// Datagram ended before the header did.
    #[error("packet too small - {len} / {required} bytes")]
    TooSmall {
        /// Bytes required to finish decoding.
        required: usize,
        /// Bytes actually available.
        len: usize,
    },
    /// Unknown payload kind discriminant.
    #[error("invalid payload kind {value}")]
    InvalidKind {
        /// Raw kind byte.
        value: u8,
    },
    /// The declared extra data size does not fit in the datagram.
    #[error("extra data length {len} exceeds remaining packet bytes {remaining}")]
    ExtraDataTooLong {
        /// Declared extra data length.
        len: usize,
        /// Bytes remaining in the datagram after the fixed header fields.
        remaining: usize,
    },
}

/// Failed to encode a [`PacketHeader`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderEncodeError {
    /// Destination buffer cannot hold the encoded header. Nothing has been
    /// written.
    #[error("buffer too small - {capacity} / {required} bytes")]
    BufferTooSmall {
        /// Bytes the encoded header requires.
        required: usize,
        /// Bytes the destination can hold.
        capacity: usize,
    },
    /// Extra data blob exceeds [`MAX_EXTRA_DATA_LEN`].
    #[error("extra data length {len} exceeds {MAX_EXTRA_DATA_LEN}")]
    ExtraDataTooLong {
        /// Length of the blob given.
        len: usize,
    },
    /// A `seq == 0` header has no [`PayloadStart`].
    #[error("sequence-0 packet missing payload start info")]
    MissingStart,
    /// A `seq > 0` header carries a [`PayloadStart`].
    #[error("payload start info on non-zero sequence {seq}")]
    UnexpectedStart {
        /// Sequence number of the offending header.
        seq: Seq,
    },
    /// Payload number does not fit in v1's 8-bit field.
    #[error("payload number {payload_num} not representable under v1")]
    PayloadNumTooLarge {
        /// The offending payload number.
        payload_num: Seq,
    },
}

/// Framing codec, selected once per endpoint from the negotiated
/// [`ProtocolVersion`](crate::ProtocolVersion).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wire {
    /// Version 1: 8-bit payload numbers, no packet ids.
    V1,
    /// Version 2: 16-bit payload numbers, packet ids, transmit start
    /// timestamps.
    V2,
}

impl Wire {
    /// Length in bytes of the version-dependent common header.
    #[must_use]
    pub const fn common_len(self) -> usize {
        match self {
            Self::V1 => V1_COMMON_LEN,
            Self::V2 => V2_COMMON_LEN,
        }
    }

    /// Length in bytes that `header` occupies on the wire.
    #[must_use]
    pub fn encoded_len(self, header: &PacketHeader) -> usize {
        let mut len = self.common_len();
        if let Some(start) = &header.start {
            len += START_FIXED_LEN + start.extra_data.len();
            if self == Self::V2 {
                len += V2_START_TRAILER_LEN;
            }
        } else if header.kind == PayloadKind::DataOffset {
            len += OFFSET_EXT_LEN;
        }
        len
    }

    /// Decodes a header from the front of `src`, consuming exactly the
    /// header bytes and leaving the payload data behind.
    ///
    /// The seq-0 extra data is taken as a zero-copy slice of `src`.
    ///
    /// # Errors
    ///
    /// Errors if the datagram is shorter than the header it declares, if
    /// the payload kind is unknown, or if the declared extra data size
    /// exceeds the bytes actually present. `src` may have been partially
    /// consumed on error.
    pub fn decode_header(self, src: &mut Bytes) -> Result<PacketHeader, HeaderDecodeError> {
        let common = self.common_len();
        if src.remaining() < common {
            return Err(HeaderDecodeError::TooSmall {
                required: common,
                len: src.remaining(),
            });
        }

        let kind_raw = src.get_u8();
        let kind =
            PayloadKind::from_wire(kind_raw).ok_or(HeaderDecodeError::InvalidKind { value: kind_raw })?;
        let seq = Seq(src.get_u16());
        let (payload_num, packet_id) = match self {
            Self::V1 => (Seq(u16::from(src.get_u8())), 0),
            Self::V2 => (Seq(src.get_u16()), src.get_u32()),
        };

        let mut header = PacketHeader {
            kind,
            seq,
            payload_num,
            packet_id,
            start: None,
            data_offset: 0,
        };

        if seq == Seq(0) {
            if src.remaining() < START_FIXED_LEN {
                return Err(HeaderDecodeError::TooSmall {
                    required: START_FIXED_LEN,
                    len: src.remaining(),
                });
            }
            let total_payload_size = src.get_u32();
            let max_latency_us = src.get_u64();
            let origination_ptp = PtpTimestamp {
                seconds: src.get_u32(),
                nanoseconds: src.get_u32(),
            };
            let user_data = src.get_u64();
            let extra_len = usize::from(src.get_u16());

            // the extra data size is not self-describing beyond this field,
            // so bound it by what the datagram actually holds
            let trailer = if self == Self::V2 {
                V2_START_TRAILER_LEN
            } else {
                0
            };
            if extra_len + trailer > src.remaining() || extra_len > MAX_EXTRA_DATA_LEN {
                return Err(HeaderDecodeError::ExtraDataTooLong {
                    len: extra_len,
                    remaining: src.remaining().saturating_sub(trailer),
                });
            }
            let extra_data = src.split_to(extra_len);
            let tx_start_time_us = if self == Self::V2 { src.get_u64() } else { 0 };

            header.start = Some(PayloadStart {
                total_payload_size,
                max_latency_us,
                origination_ptp,
                user_data,
                extra_data,
                tx_start_time_us,
            });
        } else if kind == PayloadKind::DataOffset {
            if src.remaining() < OFFSET_EXT_LEN {
                return Err(HeaderDecodeError::TooSmall {
                    required: OFFSET_EXT_LEN,
                    len: src.remaining(),
                });
            }
            header.data_offset = src.get_u32();
        }

        Ok(header)
    }

    /// Encodes `header` into `dst`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Errors without writing anything if `dst` cannot hold the whole
    /// header, or if the header is internally inconsistent (`start`
    /// presence must match `seq == 0`, v1 payload numbers must fit in 8
    /// bits, extra data must fit [`MAX_EXTRA_DATA_LEN`]).
    pub fn encode_header(
        self,
        dst: &mut impl BufMut,
        header: &PacketHeader,
    ) -> Result<usize, HeaderEncodeError> {
        match (&header.start, header.seq) {
            (None, Seq(0)) => return Err(HeaderEncodeError::MissingStart),
            (Some(_), seq) if seq != Seq(0) => {
                return Err(HeaderEncodeError::UnexpectedStart { seq });
            }
            _ => {}
        }
        if let Some(start) = &header.start {
            if start.extra_data.len() > MAX_EXTRA_DATA_LEN {
                return Err(HeaderEncodeError::ExtraDataTooLong {
                    len: start.extra_data.len(),
                });
            }
        }
        if self == Self::V1 && header.payload_num.0 > u16::from(u8::MAX) {
            return Err(HeaderEncodeError::PayloadNumTooLarge {
                payload_num: header.payload_num,
            });
        }

        let required = self.encoded_len(header);
        if dst.remaining_mut() < required {
            return Err(HeaderEncodeError::BufferTooSmall {
                required,
                capacity: dst.remaining_mut(),
            });
        }

        dst.put_u8(header.kind.to_wire());
        dst.put_u16(header.seq.0);
        match self {
            Self::V1 => {
                #[allow(clippy::cast_possible_truncation)] // checked above
                dst.put_u8(header.payload_num.0 as u8);
            }
            Self::V2 => {
                dst.put_u16(header.payload_num.0);
                dst.put_u32(header.packet_id);
            }
        }

        if let Some(start) = &header.start {
            dst.put_u32(start.total_payload_size);
            dst.put_u64(start.max_latency_us);
            dst.put_u32(start.origination_ptp.seconds);
            dst.put_u32(start.origination_ptp.nanoseconds);
            dst.put_u64(start.user_data);
            #[allow(clippy::cast_possible_truncation)] // bounded by MAX_EXTRA_DATA_LEN
            dst.put_u16(start.extra_data.len() as u16);
            dst.put_slice(&start.extra_data);
            if self == Self::V2 {
                dst.put_u64(start.tx_start_time_us);
            }
        } else if header.kind == PayloadKind::DataOffset {
            dst.put_u32(header.data_offset);
        }

        Ok(required)
    }

    /// Peeks the payload number and packet sequence out of a raw datagram
    /// without a full decode.
    ///
    /// Returns `None` if the datagram is too short to hold even the common
    /// header.
    #[must_use]
    pub fn reorder_info(self, raw: &[u8]) -> Option<ReorderInfo> {
        if raw.len() < self.common_len() {
            return None;
        }
        let seq = Seq(u16::from_be_bytes([raw[1], raw[2]]));
        let payload_num = match self {
            Self::V1 => Seq(u16::from(raw[3])),
            Self::V2 => Seq(u16::from_be_bytes([raw[3], raw[4]])),
        };
        Some(ReorderInfo { payload_num, seq })
    }
}
