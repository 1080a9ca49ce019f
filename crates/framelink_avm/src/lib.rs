//! Audio / video / metadata layer of framelink.
//!
//! The transport engine moves opaque payloads; this crate gives them
//! media meaning. A transmitter tags each payload with a 16-bit stream
//! identifier and, when the stream configuration changes, a *baseline
//! profile* configuration: a constrained, versioned set of media
//! parameters (video geometry and colorimetry, audio channel grouping,
//! ancillary data) carried as an ASCII key-value string inside a generic
//! `(uri, data)` configuration blob. The receiver parses the blob back
//! and hands the application the parsed configuration exactly when it
//! changes.
//!
//! - [`config`] - the generic configuration and the extra-data blob
//!   attached to each payload's first packet
//! - [`baseline`] - the profile registry and the video / audio /
//!   ancillary baseline codecs, including the bit-level ancillary payload
//!   format
//! - [`facade`] - transmit and receive entry points tying the above to
//!   `framelink_transport`

pub mod baseline;
pub mod config;
pub mod facade;

pub use {
    baseline::{AudioConfig, BaselineConfig, MediaKind, ProfileVersion, VideoConfig},
    config::{AvmExtraData, GenericConfig},
    facade::{AvmDelivery, AvmPayloadConfig, AvmReceivedConfig, AvmRx, AvmSendError, AvmTx},
};
