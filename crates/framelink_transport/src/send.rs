//! Transmit packetizer: turns one application payload into an ordered
//! sequence of wire packets and hands them to the adapter.

use bytes::{Bytes, BytesMut};
use framelink_proto::{
    header::{HeaderEncodeError, PacketHeader, PayloadKind, PayloadStart, PtpTimestamp},
    ProtocolVersion, Seq, Wire,
};

use crate::{
    adapter::{DatagramAdapter, SubmitError, TxPacket, MAX_TX_IOVCNT},
    sgl::Sgl,
};

/// Transmit-side configuration of one endpoint.
#[derive(Debug, Clone)]
pub struct TxEndpointConfig {
    /// Negotiated protocol version; selects the framing codec and the
    /// payload number range.
    pub version: ProtocolVersion,
    /// Most payload bytes a single packet may carry. The actual slice
    /// length is this value rounded down to a multiple of the payload's
    /// unit size.
    pub max_packet_data_len: usize,
}

/// One payload handed to [`TxEndpoint::send_payload`].
#[derive(Debug, Clone)]
pub struct TxPayload {
    /// Payload bytes. Borrowed only for the duration of the send call;
    /// the packets keep zero-copy slices of the fragments.
    pub data: Sgl,
    /// Data ordering discipline for this payload's packets.
    pub kind: PayloadKind,
    /// Minimum granularity, in bytes, at which packet boundaries are
    /// allowed. Derived from the media configuration.
    pub unit_size: usize,
    /// Delivery deadline in microseconds, enforced by the receiver from
    /// first-packet arrival and echoed in the transmit completion.
    pub max_latency_us: u64,
    /// Origination timestamp carried verbatim to the receiver.
    pub origination_ptp: PtpTimestamp,
    /// Opaque application data echoed in the receive callback.
    pub user_data: u64,
    /// Extra data blob for the sequence-0 packet (stream identifier and,
    /// optionally, the serialized stream configuration).
    pub extra_data: Bytes,
}

/// Receipt for a submitted payload, consumed by
/// [`TxEndpoint::complete_payload`] when the adapter reports completion.
///
/// Consuming the ticket by value is what makes the "exactly one
/// completion per payload" contract hold.
#[derive(Debug)]
#[must_use = "a submitted payload must be completed exactly once"]
pub struct TxTicket {
    /// Payload number the payload was sent under.
    pub payload_num: Seq,
    /// Number of packets the payload was split into.
    pub packet_count: usize,
    /// When the send was submitted, in caller microseconds.
    pub tx_start_time_us: u64,
    /// Deadline the payload was sent with.
    pub max_latency_us: u64,
    /// Opaque application data from the payload.
    pub user_data: u64,
}

/// Final status of one transmitted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// The adapter acknowledged the payload within its deadline.
    Ok,
    /// The adapter acknowledged the payload after `max_latency_us` had
    /// already elapsed.
    Late,
    /// The adapter reported an error for this payload.
    Error(String),
}

/// Handed to the application's transmit callback, exactly once per
/// submitted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxCompletion {
    /// Payload number the payload was sent under.
    pub payload_num: Seq,
    /// Final status.
    pub status: TxStatus,
    /// When the send was submitted, in caller microseconds.
    pub tx_start_time_us: u64,
    /// Opaque application data from the payload.
    pub user_data: u64,
}

/// Failed to submit a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The adapter's submit queue is saturated. No packet was sent and no
    /// payload number was consumed; retry the same payload.
    #[error("adapter submit queue full")]
    QueueFull,
    /// `unit_size` is zero or larger than the per-packet data budget.
    #[error("unit size {unit_size} unusable with packet data budget {budget}")]
    BadUnitSize {
        /// Unit size requested.
        unit_size: usize,
        /// Per-packet data budget.
        budget: usize,
    },
    /// The payload would need more packets than a sequence number can
    /// count.
    #[error("payload of {len} bytes needs more than {max} packets", max = u16::MAX)]
    PayloadTooLarge {
        /// Payload length in bytes.
        len: usize,
    },
    /// A packet would need more scatter entries than the adapter accepts.
    #[error("packet needs {count} scatter entries, adapter takes {MAX_TX_IOVCNT}")]
    TooManyFragments {
        /// Entries the packet would need.
        count: usize,
    },
    /// Header encoding failed.
    #[error("failed to encode packet header")]
    Encode(#[from] HeaderEncodeError),
    /// The adapter failed in a way that will not succeed on retry.
    #[error("adapter fatal error: {0}")]
    Fatal(String),
}

/// Transmit half of one endpoint: payload numbering, packetizing,
/// completion status derivation.
#[derive(Debug)]
pub struct TxEndpoint {
    wire: Wire,
    payload_num_max: u16,
    max_packet_data_len: usize,
    next_payload_num: Seq,
    next_packet_id: u32,
}

impl TxEndpoint {
    /// Creates the transmit half of an endpoint.
    #[must_use]
    pub fn new(config: &TxEndpointConfig) -> Self {
        Self {
            wire: config.version.wire(),
            payload_num_max: config.version.payload_num_max(),
            max_packet_data_len: config.max_packet_data_len,
            next_payload_num: Seq(0),
            next_packet_id: 0,
        }
    }

    /// The payload number the next submitted payload will use.
    #[must_use]
    pub const fn next_payload_num(&self) -> Seq {
        self.next_payload_num
    }

    /// Fragments `payload` into packets and submits them to the adapter
    /// as one vectorized batch.
    ///
    /// Packet 0 carries the payload-wide metadata including `extra_data`;
    /// every packet's data segment is a contiguous, unit-size-aligned
    /// slice of the input (the final packet carries the remainder). No
    /// payload bytes are copied.
    ///
    /// On success the endpoint's payload number advances (wrapping at the
    /// negotiated maximum) and a [`TxTicket`] is returned for the
    /// completion path. On [`SendError::QueueFull`] nothing was sent and
    /// no numbering state was consumed.
    ///
    /// # Errors
    ///
    /// See [`SendError`].
    pub fn send_payload(
        &mut self,
        adapter: &mut impl DatagramAdapter,
        payload: &TxPayload,
        now_us: u64,
    ) -> Result<TxTicket, SendError> {
        let budget = self.aligned_budget(payload.unit_size)?;
        let total = payload.data.len();
        let packet_count = total.div_ceil(budget).max(1);
        if packet_count > usize::from(u16::MAX) + 1 {
            return Err(SendError::PayloadTooLarge { len: total });
        }

        let mut packets = Vec::with_capacity(packet_count);
        let mut cursor = FragmentCursor::new(&payload.data);
        let mut offset = 0usize;
        for seq in 0..packet_count {
            let data_len = budget.min(total - offset);
            let data = cursor.take(data_len)?;

            #[allow(clippy::cast_possible_truncation)] // bounded by the packet_count check
            let header = PacketHeader {
                kind: payload.kind,
                seq: Seq(seq as u16),
                payload_num: self.next_payload_num,
                packet_id: self.next_packet_id.wrapping_add(seq as u32),
                start: (seq == 0).then(|| PayloadStart {
                    total_payload_size: total as u32,
                    max_latency_us: payload.max_latency_us,
                    origination_ptp: payload.origination_ptp,
                    user_data: payload.user_data,
                    extra_data: payload.extra_data.clone(),
                    tx_start_time_us: now_us,
                }),
                data_offset: offset as u32,
            };

            let mut buf = BytesMut::with_capacity(self.wire.encoded_len(&header));
            self.wire.encode_header(&mut buf, &header)?;
            packets.push(TxPacket {
                header: buf.freeze(),
                data,
            });
            offset += data_len;
        }

        match adapter.submit(&packets) {
            Ok(()) => {}
            Err(SubmitError::QueueFull) => return Err(SendError::QueueFull),
            Err(SubmitError::Fatal(msg)) => return Err(SendError::Fatal(msg)),
        }

        // numbering is only burned once the adapter has the batch
        let payload_num = self.next_payload_num;
        self.next_payload_num = self.next_payload_num.next_wrapping(self.payload_num_max);
        #[allow(clippy::cast_possible_truncation)]
        {
            self.next_packet_id = self.next_packet_id.wrapping_add(packet_count as u32);
        }

        Ok(TxTicket {
            payload_num,
            packet_count,
            tx_start_time_us: now_us,
            max_latency_us: payload.max_latency_us,
            user_data: payload.user_data,
        })
    }

    /// Derives the final status of a submitted payload from the adapter's
    /// completion report, consuming the ticket.
    #[must_use]
    pub fn complete_payload(
        &self,
        ticket: TxTicket,
        result: Result<(), String>,
        now_us: u64,
    ) -> TxCompletion {
        let status = match result {
            Err(msg) => TxStatus::Error(msg),
            Ok(()) if now_us > ticket.tx_start_time_us + ticket.max_latency_us => TxStatus::Late,
            Ok(()) => TxStatus::Ok,
        };
        TxCompletion {
            payload_num: ticket.payload_num,
            status,
            tx_start_time_us: ticket.tx_start_time_us,
            user_data: ticket.user_data,
        }
    }

    fn aligned_budget(&self, unit_size: usize) -> Result<usize, SendError> {
        let budget = self.max_packet_data_len;
        let aligned = if unit_size == 0 {
            0
        } else {
            budget - budget % unit_size
        };
        if aligned == 0 {
            return Err(SendError::BadUnitSize { unit_size, budget });
        }
        Ok(aligned)
    }
}

/// Walks an input SGL producing zero-copy sub-lists of consecutive bytes.
struct FragmentCursor<'a> {
    entries: &'a [Bytes],
    entry: usize,
    offset: usize,
}

impl<'a> FragmentCursor<'a> {
    fn new(sgl: &'a Sgl) -> Self {
        Self {
            entries: sgl.fragments(),
            entry: 0,
            offset: 0,
        }
    }

    fn take(&mut self, mut count: usize) -> Result<Sgl, SendError> {
        let mut out = Sgl::new();
        while count > 0 {
            let entry = &self.entries[self.entry];
            let left = entry.len() - self.offset;
            if left == 0 {
                self.entry += 1;
                self.offset = 0;
                continue;
            }
            let take = left.min(count);
            out.append(entry.slice(self.offset..self.offset + take));
            self.offset += take;
            count -= take;
        }
        if out.fragment_count() + 1 > MAX_TX_IOVCNT {
            return Err(SendError::TooManyFragments {
                count: out.fragment_count() + 1,
            });
        }
        Ok(out)
    }
}
