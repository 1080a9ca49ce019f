//! The seam between the engine and the underlying datagram fabric.
//!
//! The engine never opens sockets or fabric queues itself. The embedder
//! supplies a [`DatagramAdapter`] for the transmit path; on the receive
//! path, its poll loop feeds whole datagrams into
//! [`RxEndpoint::ingest`](crate::recv::RxEndpoint::ingest) directly, so no
//! trait is needed there.

use bytes::Bytes;

use crate::sgl::Sgl;

/// Largest number of scatter entries a single datagram may be submitted
/// with: the header plus [`MAX_TX_IOVCNT`]` - 1` data fragments.
pub const MAX_TX_IOVCNT: usize = 10;

/// One datagram handed to the adapter: an encoded framing header followed
/// by the payload fragments it covers.
///
/// The adapter transmits `header` then `data` back to back. Fragments are
/// [`Bytes`] slices of the application's payload, so submission involves
/// no copies; the adapter retains the handles until the fabric is done
/// with them.
#[derive(Debug, Clone)]
pub struct TxPacket {
    /// Encoded framing header.
    pub header: Bytes,
    /// Payload bytes carried by this datagram. May be empty (zero-length
    /// payloads still send their sequence-0 packet).
    pub data: Sgl,
}

impl TxPacket {
    /// Total bytes this datagram occupies on the wire.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        self.header.len() + self.data.len()
    }

    /// Number of scatter entries this datagram submits.
    #[must_use]
    pub fn iov_count(&self) -> usize {
        1 + self.data.fragment_count()
    }
}

/// The adapter could not accept a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The adapter's submit queue is full. Nothing from the batch was
    /// transmitted; the caller retries the whole payload later.
    #[error("adapter submit queue full")]
    QueueFull,
    /// The adapter failed in a way that will not succeed on retry.
    #[error("adapter fatal error: {0}")]
    Fatal(String),
}

/// A user-space datagram fabric capable of vectorized transmission.
///
/// `submit` must be all-or-nothing per batch: either every packet is
/// queued for transmission, or the batch is rejected (typically with
/// [`SubmitError::QueueFull`]) and nothing was sent. The engine relies on
/// this to make a rejected send retryable without burning payload
/// numbers.
pub trait DatagramAdapter {
    /// Queues a batch of datagrams for transmission.
    ///
    /// # Errors
    ///
    /// [`SubmitError::QueueFull`] when the submit queue cannot take the
    /// whole batch; [`SubmitError::Fatal`] for unrecoverable adapter
    /// failures.
    fn submit(&mut self, batch: &[TxPacket]) -> Result<(), SubmitError>;
}
