//! Wire protocol for the framelink media transport.
//!
//! This crate defines everything that crosses the network: the framing
//! header carried by every data packet, the probe control packets used by
//! the connection state machine, and the protocol version negotiated
//! between endpoints. It performs no I/O and holds no connection state -
//! the transport engine in `framelink_transport` drives these codecs.
//!
//! All integers are big-endian on the wire, and all structures are
//! byte-packed. Two framing versions exist ([`Wire::V1`] and [`Wire::V2`]);
//! an endpoint advertises its version in probe packets and both sides use
//! the lower of the two. Decoded headers are uniform across versions so
//! the rest of the engine never branches on the negotiated version.

pub mod header;
pub mod probe;
pub mod seq;
pub mod version;

pub use {
    header::{PacketHeader, PayloadKind, PayloadStart, PtpTimestamp, ReorderInfo, Wire},
    probe::{ProbeCommand, ProbeHeader},
    seq::Seq,
    version::ProtocolVersion,
};
