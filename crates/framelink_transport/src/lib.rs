//! Payload transport engine for framelink.
//!
//! Applications hand this crate a scatter-gather buffer describing one
//! media payload (one video frame, one audio grain) together with an
//! identifier and timestamp. The transmit side fragments the payload into
//! wire packets and submits them to a datagram adapter; the receive side
//! reassembles arriving fragments - however they were reordered in flight -
//! back into an in-order scatter-gather buffer and delivers payloads to the
//! application strictly in payload-number order.
//!
//! The engine is sans-IO: it never talks to a network itself. The embedder
//! supplies a [`DatagramAdapter`](adapter::DatagramAdapter) for transmit
//! and feeds received datagrams into [`RxEndpoint::ingest`](recv::RxEndpoint::ingest)
//! from its poll thread. Time is supplied by the caller as a monotonic
//! microsecond clock, which keeps latency enforcement deterministic and
//! testable.
//!
//! # Structure
//!
//! - [`pool`] - bounded object arenas used for all reassembly bookkeeping
//! - [`sgl`] - the scatter-gather list, the universal data container
//! - [`adapter`] - the seam to the underlying datagram fabric
//! - [`send`] - the transmit packetizer
//! - [`recv`] - the two-stage receive reorderer (packets within a payload,
//!   payloads within an endpoint)
//! - [`queue`] - the bounded delivery queue drained by the application's
//!   delivery thread

pub mod adapter;
pub mod pool;
pub mod queue;
pub mod recv;
pub mod send;
pub mod sgl;

pub use {
    adapter::{DatagramAdapter, SubmitError, TxPacket},
    pool::{Pool, PoolHandle, SyncPool},
    queue::DeliveryQueue,
    recv::{RxDelivery, RxEndpoint, RxEndpointConfig, RxPayloadStatus},
    send::{SendError, TxCompletion, TxEndpoint, TxEndpointConfig, TxPayload, TxStatus, TxTicket},
    sgl::Sgl,
};
