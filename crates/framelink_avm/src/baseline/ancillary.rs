//! Baseline ancillary-data profile v01.00 and the bit-level payload
//! codec (SMPTE ST 291 / RFC 8331 layout).
//!
//! Ancillary payload layout, all fields MSB-first big-endian:
//!
//! ```text
//! payload header: anc_count:16 | field:2 | reserved:14
//! per anc packet: c:1 | line_number:11 | horizontal_offset:12 | s:1 | stream_num:7
//!                 did:10 | sdid:10 | data_count:10 | udw:10 × data_count | checksum:10
//!                 (zero padding to the next 32-bit boundary)
//! ```
//!
//! `did`, `sdid` and `data_count` are parity-bearing 10-bit words: 8 data
//! bits, bit 8 carrying the data's parity and bit 9 its inverse. User
//! data words are conveyed verbatim as 10-bit values. The checksum word
//! holds the 9-bit sum of every 10-bit word since (and including) `did`,
//! with bit 9 the inverse of bit 8.
//!
//! The decoder never rejects a payload for bad parity or checksums: it
//! counts the mismatches per payload and hands both the data and the
//! counts to the application.

use super::{
    key_value, tokens, warn_unknown_key, BaselineConfig, BaselineProfile, MakeConfigError,
    MediaKind, ParseConfigError, ProfileVersion, PROFILE_V1,
};
use crate::config::GenericConfig;

/// Baseline ancillary-data stream configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncillaryConfig {
    /// Profile version of this configuration.
    pub version: ProfileVersion,
}

/// The baseline ancillary-data profile codec, v01.00.
#[derive(Debug, Clone, Copy)]
pub struct AncillaryProfileV1;

impl BaselineProfile for AncillaryProfileV1 {
    fn media_kind(&self) -> MediaKind {
        MediaKind::AncillaryData
    }

    fn version(&self) -> ProfileVersion {
        PROFILE_V1
    }

    fn make_config(&self, config: &BaselineConfig) -> Result<GenericConfig, MakeConfigError> {
        let BaselineConfig::Ancillary(anc) = config else {
            return Err(MakeConfigError::InvalidField {
                field: "config",
                reason: "not an ancillary configuration",
            });
        };
        Ok(GenericConfig {
            uri: MediaKind::AncillaryData.uri().to_owned(),
            data: format!("cdi_profile_version={};", anc.version).into_bytes(),
        })
    }

    fn parse_config(&self, data: &str) -> Result<BaselineConfig, ParseConfigError> {
        let mut anc = AncillaryConfig::default();
        for token in tokens(data) {
            match key_value(token) {
                ("cdi_profile_version", value) => {
                    anc.version = value.and_then(|value| value.parse().ok()).ok_or(
                        ParseConfigError::InvalidValue {
                            key: "cdi_profile_version",
                            value: value.unwrap_or_default().to_owned(),
                        },
                    )?;
                }
                (key, _) => warn_unknown_key(MediaKind::AncillaryData, key),
            }
        }
        Ok(BaselineConfig::Ancillary(anc))
    }
}

/// Which field of an interlaced source the payload's packets belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AncField {
    /// Progressive source or field unknown.
    #[default]
    Unspecified,
    /// Reserved on-wire value.
    Invalid,
    /// First (top) field.
    InterlacedFirst,
    /// Second (bottom) field.
    InterlacedSecond,
}

impl AncField {
    const fn to_wire(self) -> u32 {
        match self {
            Self::Unspecified => 0,
            Self::Invalid => 1,
            Self::InterlacedFirst => 2,
            Self::InterlacedSecond => 3,
        }
    }

    const fn from_wire(value: u32) -> Self {
        match value {
            1 => Self::Invalid,
            2 => Self::InterlacedFirst,
            3 => Self::InterlacedSecond,
            _ => Self::Unspecified,
        }
    }
}

/// One ancillary data packet within a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncPacket {
    /// Whether the packet rides in the color-difference channel.
    pub color_channel: bool,
    /// Line number the packet was sourced from (11 bits).
    pub line_number: u16,
    /// Horizontal offset within the line (12 bits).
    pub horizontal_offset: u16,
    /// Whether `stream_num` is meaningful.
    pub stream_flag: bool,
    /// Source stream number (7 bits).
    pub stream_num: u8,
    /// Data identifier.
    pub did: u8,
    /// Secondary data identifier.
    pub sdid: u8,
    /// User data words, carried verbatim as 10-bit values.
    pub user_data: Vec<u16>,
}

/// One ancillary payload: a field marker plus its packets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncPayload {
    /// Field the packets belong to.
    pub field: AncField,
    /// The ancillary packets.
    pub packets: Vec<AncPacket>,
}

/// Per-payload error counters accumulated while decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AncDecodeStats {
    /// Parity-bearing words whose parity bits did not match their data.
    pub parity_errors: u64,
    /// Packets whose checksum word did not match the received words.
    pub checksum_errors: u64,
}

impl AncDecodeStats {
    /// Total errors observed in the payload.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.parity_errors + self.checksum_errors
    }
}

/// Failed to encode an [`AncPayload`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AncEncodeError {
    /// More packets than the 16-bit count can carry.
    #[error("{count} anc packets exceed the 16-bit packet count")]
    TooManyPackets {
        /// Packets in the payload.
        count: usize,
    },
    /// More user data words than the 8-bit data count can carry.
    #[error("{count} user data words exceed the 8-bit data count")]
    TooManyUserWords {
        /// Words in the packet.
        count: usize,
    },
    /// A field value exceeds its wire width.
    #[error("{field} value {value} exceeds {bits} bits")]
    FieldOverflow {
        /// Name of the offending field.
        field: &'static str,
        /// Value given.
        value: u32,
        /// Wire width of the field.
        bits: u32,
    },
}

/// Failed to decode an ancillary payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AncDecodeError {
    /// The payload ended mid-structure.
    #[error("ancillary payload truncated at bit {bit}")]
    Truncated {
        /// Bit offset where more data was needed.
        bit: usize,
    },
}

/// Encodes an ancillary payload into its wire form.
///
/// # Errors
///
/// See [`AncEncodeError`].
pub fn encode_payload(payload: &AncPayload) -> Result<Vec<u8>, AncEncodeError> {
    let mut writer = BitWriter::new();
    let count =
        u32::try_from(payload.packets.len()).map_err(|_| AncEncodeError::TooManyPackets {
            count: payload.packets.len(),
        })?;
    if count > 0xFFFF {
        return Err(AncEncodeError::TooManyPackets {
            count: payload.packets.len(),
        });
    }
    writer.write(count, 16);
    writer.write(payload.field.to_wire(), 2);
    writer.write(0, 14);

    for packet in &payload.packets {
        check_width("line_number", u32::from(packet.line_number), 11)?;
        check_width("horizontal_offset", u32::from(packet.horizontal_offset), 12)?;
        check_width("stream_num", u32::from(packet.stream_num), 7)?;
        if packet.user_data.len() > 0xFF {
            return Err(AncEncodeError::TooManyUserWords {
                count: packet.user_data.len(),
            });
        }

        writer.write(u32::from(packet.color_channel), 1);
        writer.write(u32::from(packet.line_number), 11);
        writer.write(u32::from(packet.horizontal_offset), 12);
        writer.write(u32::from(packet.stream_flag), 1);
        writer.write(u32::from(packet.stream_num), 7);

        let did = with_parity(packet.did);
        let sdid = with_parity(packet.sdid);
        #[allow(clippy::cast_possible_truncation)] // bounded to 0xFF above
        let data_count = with_parity(packet.user_data.len() as u8);
        let mut sum = u32::from(did) + u32::from(sdid) + u32::from(data_count);
        writer.write(u32::from(did), 10);
        writer.write(u32::from(sdid), 10);
        writer.write(u32::from(data_count), 10);
        for &word in &packet.user_data {
            check_width("user_data", u32::from(word), 10)?;
            sum += u32::from(word);
            writer.write(u32::from(word), 10);
        }
        writer.write(checksum_word(sum), 10);
        writer.align_32();
    }
    Ok(writer.finish())
}

/// Decodes an ancillary payload, counting parity and checksum mismatches
/// instead of failing on them.
///
/// # Errors
///
/// Errors only when the payload is structurally truncated.
pub fn decode_payload(raw: &[u8]) -> Result<(AncPayload, AncDecodeStats), AncDecodeError> {
    let mut reader = BitReader::new(raw);
    let mut stats = AncDecodeStats::default();

    let count = reader.read(16)?;
    let field = AncField::from_wire(reader.read(2)?);
    reader.read(14)?;

    let mut packets = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let color_channel = reader.read(1)? != 0;
        #[allow(clippy::cast_possible_truncation)] // 11 bits
        let line_number = reader.read(11)? as u16;
        #[allow(clippy::cast_possible_truncation)] // 12 bits
        let horizontal_offset = reader.read(12)? as u16;
        let stream_flag = reader.read(1)? != 0;
        #[allow(clippy::cast_possible_truncation)] // 7 bits
        let stream_num = reader.read(7)? as u8;

        let did_word = reader.read(10)?;
        let sdid_word = reader.read(10)?;
        let count_word = reader.read(10)?;
        let did = check_parity(did_word, &mut stats);
        let sdid = check_parity(sdid_word, &mut stats);
        let data_count = check_parity(count_word, &mut stats);

        let mut sum = did_word + sdid_word + count_word;
        let mut user_data = Vec::with_capacity(usize::from(data_count));
        for _ in 0..data_count {
            let word = reader.read(10)?;
            sum += word;
            #[allow(clippy::cast_possible_truncation)] // 10 bits
            user_data.push(word as u16);
        }
        let received = reader.read(10)?;
        if received != checksum_word(sum) {
            stats.checksum_errors += 1;
        }
        reader.align_32()?;

        packets.push(AncPacket {
            color_channel,
            line_number,
            horizontal_offset,
            stream_flag,
            stream_num,
            did,
            sdid,
            user_data,
        });
    }

    Ok((AncPayload { field, packets }, stats))
}

/// Odd-parity bit of an 8-bit value: 1 when the value has an odd number
/// of set bits.
#[must_use]
pub const fn parity8(value: u8) -> bool {
    value.count_ones() % 2 == 1
}

/// Builds the parity-bearing 10-bit word for 8 data bits: bit 8 is the
/// parity, bit 9 its inverse.
const fn with_parity(value: u8) -> u16 {
    let parity = parity8(value) as u16;
    ((1 - parity) << 9) | (parity << 8) | value as u16
}

/// Extracts the data bits of a parity-bearing word, counting a parity
/// error if either protection bit is wrong.
#[allow(clippy::cast_possible_truncation)]
fn check_parity(word: u32, stats: &mut AncDecodeStats) -> u8 {
    let data = word as u8;
    let parity = word >> 8 & 1;
    let inverse = word >> 9 & 1;
    if parity != u32::from(parity8(data)) || inverse == parity {
        stats.parity_errors += 1;
    }
    data
}

/// Builds the 10-bit checksum word from the sum of the packet's words:
/// the low 9 bits of the sum, with bit 9 the inverse of bit 8.
const fn checksum_word(sum: u32) -> u32 {
    let low = sum & 0x1FF;
    let inverse = 1 - (low >> 8 & 1);
    (inverse << 9) | low
}

fn check_width(field: &'static str, value: u32, bits: u32) -> Result<(), AncEncodeError> {
    if value >> bits != 0 {
        return Err(AncEncodeError::FieldOverflow { field, value, bits });
    }
    Ok(())
}

/// MSB-first bit accumulator.
struct BitWriter {
    out: Vec<u8>,
    /// Bits already written into the final byte of `out`; 0 when the
    /// output is byte-aligned.
    partial: u32,
}

impl BitWriter {
    const fn new() -> Self {
        Self {
            out: Vec::new(),
            partial: 0,
        }
    }

    fn write(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        debug_assert!(bits == 32 || value >> bits == 0);
        let mut left = bits;
        while left > 0 {
            if self.partial == 0 {
                self.out.push(0);
            }
            let space = 8 - self.partial;
            let take = space.min(left);
            let chunk = (value >> (left - take)) & ((1 << take) - 1);
            #[allow(clippy::cast_possible_truncation)] // take <= 8 bits
            if let Some(last) = self.out.last_mut() {
                *last |= (chunk << (space - take)) as u8;
            }
            self.partial = (self.partial + take) % 8;
            left -= take;
        }
    }

    fn align_32(&mut self) {
        if self.partial != 0 {
            self.partial = 0;
        }
        while self.out.len() % 4 != 0 {
            self.out.push(0);
        }
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// MSB-first bit reader.
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn read(&mut self, bits: u32) -> Result<u32, AncDecodeError> {
        debug_assert!(bits <= 32);
        if self.bit + bits as usize > self.data.len() * 8 {
            return Err(AncDecodeError::Truncated { bit: self.bit });
        }
        let mut value = 0u32;
        for _ in 0..bits {
            let byte = self.data[self.bit / 8];
            let bit = (byte >> (7 - self.bit % 8)) & 1;
            value = (value << 1) | u32::from(bit);
            self.bit += 1;
        }
        Ok(value)
    }

    fn align_32(&mut self) -> Result<(), AncDecodeError> {
        let rem = self.bit % 32;
        if rem != 0 {
            self.read(32 - rem as u32)?;
        }
        Ok(())
    }
}
