//! Generic configuration and the extra-data blob.
//!
//! A stream's configuration travels as a `(uri, data)` pair: the URI
//! names the profile that understands the payload (§[`baseline`] for the
//! three registered baseline URIs) and `data` is an opaque blob - for
//! baseline profiles, an ASCII key-value string. The pair, together with
//! the stream identifier, is packed into the extra-data field of each
//! payload's sequence-0 packet:
//!
//! ```text
//! stream_identifier:16 | flags:8 | [uri_len:16 | uri | data_len:16 | data]
//! ```
//!
//! with the bracketed part present iff bit 0 of `flags` is set. All
//! integers big-endian.
//!
//! [`baseline`]: crate::baseline

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Longest allowed configuration URI, in octets.
pub const MAX_URI_LEN: usize = 256;
/// Longest allowed configuration data blob, in octets.
pub const MAX_DATA_LEN: usize = 1024;

const FLAG_HAS_CONFIG: u8 = 0b1;

/// A stream configuration opaque to the transport: a profile URI and a
/// profile-defined data blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericConfig {
    /// Profile URI, ASCII, at most [`MAX_URI_LEN`] octets.
    pub uri: String,
    /// Profile-defined payload, at most [`MAX_DATA_LEN`] octets.
    pub data: Vec<u8>,
}

/// The compact per-payload tag every transmitted payload carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AvmExtraData {
    /// Which stream of the connection this payload belongs to.
    pub stream_identifier: u16,
}

/// Extra-data blob of one payload: the stream tag plus, when the
/// configuration changed, the configuration itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraDataBlob {
    /// The per-payload stream tag.
    pub tag: AvmExtraData,
    /// The stream configuration, on payloads where it (re)announced.
    pub config: Option<GenericConfig>,
}

/// Failed to encode an [`ExtraDataBlob`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtraDataEncodeError {
    /// URI exceeds [`MAX_URI_LEN`].
    #[error("config uri of {len} octets exceeds {MAX_URI_LEN}")]
    UriTooLong {
        /// Octets in the URI given.
        len: usize,
    },
    /// Data blob exceeds [`MAX_DATA_LEN`].
    #[error("config data of {len} octets exceeds {MAX_DATA_LEN}")]
    DataTooLong {
        /// Octets in the data given.
        len: usize,
    },
}

/// Failed to decode an [`ExtraDataBlob`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtraDataDecodeError {
    /// Blob ended before its declared fields did.
    #[error("extra data blob truncated at {len} octets")]
    Truncated {
        /// Octets in the blob.
        len: usize,
    },
    /// A declared length exceeds its limit.
    #[error("declared {field} length {len} over limit")]
    FieldTooLong {
        /// Which length field.
        field: &'static str,
        /// Declared length.
        len: usize,
    },
    /// URI bytes were not valid UTF-8.
    #[error("config uri is not valid utf-8")]
    UriNotUtf8,
}

impl ExtraDataBlob {
    /// Encodes the blob for the sequence-0 packet.
    ///
    /// # Errors
    ///
    /// Errors if the configuration exceeds the URI or data size limits.
    pub fn encode(&self) -> Result<Bytes, ExtraDataEncodeError> {
        let mut out = BytesMut::with_capacity(
            3 + self
                .config
                .as_ref()
                .map_or(0, |config| 4 + config.uri.len() + config.data.len()),
        );
        out.put_u16(self.tag.stream_identifier);
        match &self.config {
            None => out.put_u8(0),
            Some(config) => {
                if config.uri.len() > MAX_URI_LEN {
                    return Err(ExtraDataEncodeError::UriTooLong {
                        len: config.uri.len(),
                    });
                }
                if config.data.len() > MAX_DATA_LEN {
                    return Err(ExtraDataEncodeError::DataTooLong {
                        len: config.data.len(),
                    });
                }
                out.put_u8(FLAG_HAS_CONFIG);
                #[allow(clippy::cast_possible_truncation)] // bounded above
                out.put_u16(config.uri.len() as u16);
                out.put_slice(config.uri.as_bytes());
                #[allow(clippy::cast_possible_truncation)] // bounded above
                out.put_u16(config.data.len() as u16);
                out.put_slice(&config.data);
            }
        }
        Ok(out.freeze())
    }

    /// Decodes a blob received on a sequence-0 packet.
    ///
    /// # Errors
    ///
    /// See [`ExtraDataDecodeError`].
    pub fn decode(raw: &Bytes) -> Result<Self, ExtraDataDecodeError> {
        let truncated = || ExtraDataDecodeError::Truncated { len: raw.len() };
        let mut src = raw.clone();
        if src.remaining() < 3 {
            return Err(truncated());
        }
        let tag = AvmExtraData {
            stream_identifier: src.get_u16(),
        };
        let flags = src.get_u8();
        if flags & FLAG_HAS_CONFIG == 0 {
            return Ok(Self { tag, config: None });
        }

        if src.remaining() < 2 {
            return Err(truncated());
        }
        let uri_len = usize::from(src.get_u16());
        if uri_len > MAX_URI_LEN {
            return Err(ExtraDataDecodeError::FieldTooLong {
                field: "uri",
                len: uri_len,
            });
        }
        if src.remaining() < uri_len {
            return Err(truncated());
        }
        let uri = String::from_utf8(src.split_to(uri_len).to_vec())
            .map_err(|_| ExtraDataDecodeError::UriNotUtf8)?;

        if src.remaining() < 2 {
            return Err(truncated());
        }
        let data_len = usize::from(src.get_u16());
        if data_len > MAX_DATA_LEN {
            return Err(ExtraDataDecodeError::FieldTooLong {
                field: "data",
                len: data_len,
            });
        }
        if src.remaining() < data_len {
            return Err(truncated());
        }
        let data = src.split_to(data_len).to_vec();

        Ok(Self {
            tag,
            config: Some(GenericConfig { uri, data }),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn tag_only_round_trip() {
        let blob = ExtraDataBlob {
            tag: AvmExtraData {
                stream_identifier: 513,
            },
            config: None,
        };
        let raw = blob.encode().unwrap();
        assert_eq!(3, raw.len());
        assert_eq!(blob, ExtraDataBlob::decode(&raw).unwrap());
    }

    #[test]
    fn config_round_trip() {
        let blob = ExtraDataBlob {
            tag: AvmExtraData {
                stream_identifier: 1,
            },
            config: Some(GenericConfig {
                uri: "https://cdi.elemental.com/specs/baseline-video".into(),
                data: b"cdi_profile_version=01.00;".to_vec(),
            }),
        };
        let raw = blob.encode().unwrap();
        assert_eq!(blob, ExtraDataBlob::decode(&raw).unwrap());
    }

    #[test]
    fn truncation_rejected() {
        let blob = ExtraDataBlob {
            tag: AvmExtraData {
                stream_identifier: 1,
            },
            config: Some(GenericConfig {
                uri: "https://example.com/profile".into(),
                data: vec![1, 2, 3],
            }),
        };
        let raw = blob.encode().unwrap();
        for len in 0..raw.len() {
            let cut = raw.slice(..len);
            assert!(ExtraDataBlob::decode(&cut).is_err(), "len {len}");
        }
    }

    #[test]
    fn oversized_fields_rejected() {
        let blob = ExtraDataBlob {
            tag: AvmExtraData::default(),
            config: Some(GenericConfig {
                uri: "x".repeat(MAX_URI_LEN + 1),
                data: Vec::new(),
            }),
        };
        assert_matches!(
            blob.encode(),
            Err(ExtraDataEncodeError::UriTooLong { .. })
        );

        let blob = ExtraDataBlob {
            tag: AvmExtraData::default(),
            config: Some(GenericConfig {
                uri: "u".into(),
                data: vec![0; MAX_DATA_LEN + 1],
            }),
        };
        assert_matches!(
            blob.encode(),
            Err(ExtraDataEncodeError::DataTooLong { .. })
        );
    }
}
