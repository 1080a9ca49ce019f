//! Receive side of an endpoint: reassembles packets into payloads and
//! payloads into an in-order delivery stream.
//!
//! Reassembly is two-staged. Within one payload, arriving fragments are
//! stitched into contiguous runs ([`runs`]); across payloads, the endpoint
//! enforces strictly increasing payload-number delivery through a
//! power-of-two state ring, a bounded out-of-order window, and a
//! per-payload deadline measured from first-packet arrival.
//!
//! All state here is owned by the embedder's receive poll thread, which
//! calls [`RxEndpoint::ingest`] for every datagram. Completed (or failed)
//! payloads land on a bounded [`DeliveryQueue`] drained by the
//! application's delivery thread; every payload produces exactly one
//! delivery descriptor, errors included.

mod runs;

use std::sync::Arc;

use bytes::Bytes;
use framelink_proto::{
    header::{PacketHeader, PayloadStart, PtpTimestamp},
    ProtocolVersion, Seq, Wire,
};
use tracing::{debug, warn};

use self::runs::{InsertOutcome, Run, RunPoolExhausted};
use crate::{
    pool::{Pool, PoolHandle, SyncPool},
    queue::DeliveryQueue,
    sgl::Sgl,
};

/// Default bound on payloads buffered out of order per endpoint.
pub const DEFAULT_PAYLOAD_WINDOW: usize = 32;
/// Default bound on packet fragments buffered across all in-flight
/// payloads of an endpoint.
pub const DEFAULT_PACKET_BUFFER_LIMIT: usize = 2048;

/// Receive-side configuration of one endpoint.
#[derive(Debug, Clone)]
pub struct RxEndpointConfig {
    /// Negotiated protocol version; selects the framing codec and the
    /// payload number range.
    pub version: ProtocolVersion,
    /// How many payloads may be in flight out of order. The payload state
    /// ring is sized to the next power of two strictly above this.
    pub payload_window: usize,
    /// Bound on packet fragments buffered across all in-flight payloads.
    /// Reaching the bound errors the payload being inserted into.
    pub max_buffered_packets: usize,
    /// Number of reorder run nodes in the endpoint's pool.
    pub run_count: usize,
    /// Number of recycled error-message strings.
    pub error_string_count: usize,
    /// Capacity of the delivery queue. A full queue blocks ingest, which
    /// is the engine's back-pressure path.
    pub delivery_queue_len: usize,
    /// Deadline applied to a payload whose sequence-0 packet (carrying
    /// the real deadline) has not arrived yet, in microseconds.
    pub default_timeout_us: u64,
    /// Payload number expected first. Matches the transmit side's
    /// numbering start; 0 on a fresh connection.
    pub initial_payload_num: Seq,
}

impl Default for RxEndpointConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::V2,
            payload_window: DEFAULT_PAYLOAD_WINDOW,
            max_buffered_packets: DEFAULT_PACKET_BUFFER_LIMIT,
            run_count: 256,
            error_string_count: 32,
            delivery_queue_len: 64,
            default_timeout_us: 100_000,
            initial_payload_num: Seq(0),
        }
    }
}

/// Final status of one received payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxPayloadStatus {
    /// The payload arrived whole and in time; `sgl` holds its bytes in
    /// order.
    Ok,
    /// The payload errored (timeout, window overflow, pool exhaustion,
    /// size mismatch, eviction); `sgl` is empty and `error` names the
    /// reason.
    Error,
}

/// One payload handed to the application, in payload-number order.
#[derive(Debug, PartialEq)]
pub struct RxDelivery {
    /// Payload number of this payload.
    pub payload_num: Seq,
    /// Whether the payload arrived whole.
    pub status: RxPayloadStatus,
    /// The payload bytes, in order. Empty for error deliveries.
    pub sgl: Sgl,
    /// Packets that arrived for this payload.
    pub packet_count: u32,
    /// Total size the transmitter declared, when known.
    pub total_payload_size: u32,
    /// Origination timestamp carried with the payload.
    pub origination_ptp: PtpTimestamp,
    /// Opaque application data from the transmitter.
    pub user_data: u64,
    /// Deadline the payload was sent with, when known.
    pub max_latency_us: u64,
    /// When the transmitter started sending, in its microsecond clock.
    /// 0 under v1 framing.
    pub tx_start_time_us: u64,
    /// Extra data blob from the sequence-0 packet (stream identifier and,
    /// optionally, stream configuration).
    pub extra_data: Bytes,
    /// Error message for [`RxPayloadStatus::Error`] deliveries, drawn
    /// from the endpoint's recycled string pool.
    pub error: Option<String>,
}

/// Counters exposed to other threads through a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RxStats {
    /// Datagrams ingested.
    pub total_packets: u64,
    /// Fragments currently buffered across all in-flight payloads.
    pub buffered_packets: usize,
    /// Datagrams dropped because the header would not decode.
    pub decode_errors: u64,
    /// Fragments dropped as duplicates.
    pub duplicate_packets: u64,
    /// Packets for payloads outside the reorder window.
    pub out_of_window_packets: u64,
    /// Packets accounted against ignored or already-failed payloads.
    pub ignored_packets: u64,
    /// Payloads delivered whole.
    pub delivered_ok: u64,
    /// Payloads delivered as errors.
    pub delivered_error: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum SlotState {
    /// Packets are still being collected.
    #[default]
    InProgress,
    /// All bytes are present; awaiting in-order delivery.
    Complete,
    /// The payload failed; awaiting in-order error delivery.
    Error,
    /// Placeholder for a payload that will never be delivered; cleared
    /// when the delivery cursor passes it.
    Ignore,
}

#[derive(Debug, Default)]
struct RxPayloadState {
    payload_num: Seq,
    state: SlotState,
    packet_count: u32,
    bytes_received: u64,
    expected_total: Option<u32>,
    first_arrival_us: u64,
    max_latency_us: Option<u64>,
    start: Option<PayloadStart>,
    run_head: Option<PoolHandle>,
    buffered_fragments: usize,
    error_reason: Option<&'static str>,
}

/// Returns payload buffers to their pools from the delivery thread.
///
/// Obtained from [`RxEndpoint::recycler`]; cloneable and shareable. Every
/// delivery must come back through [`RxRecycler::free`] once the
/// application is done with it - that is what releases the adapter
/// receive buffers (fragment handles) and recycles the error message
/// string.
#[derive(Debug, Clone)]
pub struct RxRecycler {
    strings: Arc<SyncPool<String>>,
}

impl RxRecycler {
    /// Frees one delivery: fragment handles drop back to the adapter's
    /// buffers, the error message string returns to the endpoint's pool.
    pub fn free(&self, delivery: RxDelivery) {
        if let Some(msg) = delivery.error {
            store_string(&self.strings, msg);
        }
        drop(delivery.sgl);
    }
}

fn take_string(pool: &SyncPool<String>) -> String {
    let mut pool = pool.lock();
    pool.get().map_or_else(String::new, |handle| {
        let s = std::mem::take(pool.item_mut(handle));
        pool.put(handle);
        s
    })
}

fn store_string(pool: &SyncPool<String>, mut s: String) {
    s.clear();
    let mut pool = pool.lock();
    if let Some(handle) = pool.get() {
        *pool.item_mut(handle) = s;
        pool.put(handle);
    }
}

/// Receive half of one endpoint.
#[derive(Debug)]
pub struct RxEndpoint {
    wire: Wire,
    payload_num_max: u16,
    payload_num_space: u32,
    payload_window: u32,
    ring_size: u32,
    max_buffered_packets: usize,
    default_timeout_us: u64,
    mask: usize,
    slots: Vec<Option<PoolHandle>>,
    current_index: Seq,
    states: Pool<RxPayloadState>,
    runs: Pool<Run>,
    queue: DeliveryQueue<RxDelivery>,
    strings: Arc<SyncPool<String>>,
    stats: RxStats,
}

impl RxEndpoint {
    /// Creates the receive half of an endpoint.
    ///
    /// # Panics
    ///
    /// Panics if `payload_window` is 0 or does not leave a valid state
    /// ring within the version's payload number space.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // ring and window sizes are tiny
    pub fn new(config: &RxEndpointConfig) -> Self {
        assert!(config.payload_window > 0);
        let ring_size = (config.payload_window + 1).next_power_of_two();
        let payload_num_space = u32::from(config.version.payload_num_max()) + 1;
        assert!(
            ring_size as u32 * 2 <= payload_num_space,
            "state ring must be well below the payload number space"
        );

        let strings = {
            let count = config.error_string_count;
            let mut pool = Pool::new("rx error strings", count, 0, 0, String::new);
            // pre-size so steady-state messages never allocate
            pool.put_all();
            for _ in 0..count {
                if let Some(handle) = pool.get() {
                    pool.item_mut(handle).reserve(128);
                }
            }
            pool.put_all();
            Arc::new(SyncPool::new(pool))
        };

        Self {
            wire: config.version.wire(),
            payload_num_max: config.version.payload_num_max(),
            payload_num_space,
            payload_window: config.payload_window as u32,
            ring_size: ring_size as u32,
            max_buffered_packets: config.max_buffered_packets,
            default_timeout_us: config.default_timeout_us,
            mask: ring_size - 1,
            slots: vec![None; ring_size],
            current_index: config.initial_payload_num,
            states: Pool::new("rx payload states", ring_size, 0, 0, RxPayloadState::default),
            runs: Pool::new("rx reorder runs", config.run_count, 0, 0, Run::default),
            queue: DeliveryQueue::new(config.delivery_queue_len),
            strings,
            stats: RxStats::default(),
        }
    }

    /// The queue completed payloads are delivered on. Clone it into the
    /// application's delivery thread.
    #[must_use]
    pub fn delivery_queue(&self) -> DeliveryQueue<RxDelivery> {
        self.queue.clone()
    }

    /// The free-path handle for returning deliveries. Clone it into the
    /// application's delivery thread.
    #[must_use]
    pub fn recycler(&self) -> RxRecycler {
        RxRecycler {
            strings: Arc::clone(&self.strings),
        }
    }

    /// Snapshot of the endpoint's counters.
    #[must_use]
    pub fn stats(&self) -> RxStats {
        self.stats.clone()
    }

    /// The payload number expected next for in-order delivery.
    #[must_use]
    pub const fn current_index(&self) -> Seq {
        self.current_index
    }

    /// Ingests one received datagram: decodes the framing header, attaches
    /// the fragment to its payload's reorder state, and drains whatever
    /// has become deliverable in order.
    ///
    /// Wire-level errors are absorbed: a datagram that fails to decode is
    /// counted, logged and dropped, never failing the endpoint.
    pub fn ingest(&mut self, datagram: Bytes, now_us: u64) {
        self.stats.total_packets += 1;
        let mut src = datagram;
        let header = match self.wire.decode_header(&mut src) {
            Ok(header) => header,
            Err(err) => {
                self.stats.decode_errors += 1;
                warn!(%err, "dropping undecodable packet");
                return;
            }
        };
        self.route_packet(header, src, now_us);
        self.send_ready_payloads(now_us);
    }

    /// Delivers every payload that is ready at `now_us`, in payload-number
    /// order: completed and errored payloads are enqueued, ignored ones
    /// are skipped, and an in-progress payload past its deadline becomes a
    /// timeout error. Stops at the first payload that is still genuinely
    /// in progress (or at an empty slot).
    ///
    /// [`ingest`](Self::ingest) calls this automatically; call it from a
    /// timer as well so that deadlines fire on quiet connections.
    pub fn send_ready_payloads(&mut self, now_us: u64) {
        loop {
            let slot = self.current_index.0 as usize & self.mask;
            let Some(handle) = self.slots[slot] else {
                break;
            };
            if self.states.item(handle).payload_num != self.current_index {
                // the slot is parked for a future payload; the expected
                // one has produced no packets yet
                break;
            }
            match self.states.item(handle).state {
                SlotState::Complete | SlotState::Error => {
                    self.deliver(handle, slot);
                }
                SlotState::Ignore => {
                    self.release_state(handle, slot);
                }
                SlotState::InProgress => {
                    let st = self.states.item(handle);
                    let deadline = st.max_latency_us.unwrap_or(self.default_timeout_us);
                    if now_us.saturating_sub(st.first_arrival_us) <= deadline {
                        break;
                    }
                    Self::fail_payload(
                        &mut self.states,
                        &mut self.runs,
                        &mut self.stats,
                        handle,
                        "payload timed out awaiting packets",
                    );
                    self.deliver(handle, slot);
                }
            }
            self.current_index = self.current_index.next_wrapping(self.payload_num_max);
        }
    }

    /// Tears the endpoint down: every in-flight payload is released back
    /// to the pools and the delivery queue is shut down (the delivery
    /// thread drains it and then sees the end).
    pub fn close(&mut self) {
        for slot in 0..self.slots.len() {
            if let Some(handle) = self.slots[slot] {
                let st = self.states.item_mut(handle);
                let freed = runs::release_all(&mut self.runs, &mut st.run_head);
                self.stats.buffered_packets -= freed;
                *st = RxPayloadState::default();
                self.states.put(handle);
                self.slots[slot] = None;
            }
        }
        self.queue.shutdown();
    }

    fn forward_dist(&self, from: Seq, to: Seq) -> u32 {
        (u32::from(to.0) + self.payload_num_space - u32::from(from.0)) % self.payload_num_space
    }

    fn route_packet(&mut self, header: PacketHeader, data: Bytes, now_us: u64) {
        let Some(handle) = self.lookup_or_create(header.payload_num, now_us) else {
            return;
        };

        let Self {
            states,
            runs,
            stats,
            max_buffered_packets,
            ..
        } = self;
        let st = states.item_mut(handle);
        st.packet_count += 1;

        match st.state {
            SlotState::Ignore | SlotState::Error => {
                // account the traffic, but the payload will never deliver
                // data
                st.bytes_received += data.len() as u64;
                stats.ignored_packets += 1;
                return;
            }
            SlotState::Complete => {
                stats.ignored_packets += 1;
                warn!(
                    payload_num = st.payload_num.0,
                    seq = header.seq.0,
                    "packet for already-completed payload dropped"
                );
                return;
            }
            SlotState::InProgress => {}
        }

        if let Some(start) = header.start {
            st.expected_total = Some(start.total_payload_size);
            st.max_latency_us = Some(start.max_latency_us);
            st.start = Some(start);
        }

        // a zero-length payload is complete the moment its sequence-0
        // packet lands; there is nothing to buffer
        if st.expected_total == Some(0) && header.seq == Seq(0) && data.is_empty() {
            st.state = SlotState::Complete;
            return;
        }

        let data_len = data.len() as u64;
        match runs::insert_fragment(runs, &mut st.run_head, header.seq.0, data) {
            Ok(InsertOutcome::Inserted) => {}
            Ok(InsertOutcome::Duplicate) => {
                stats.duplicate_packets += 1;
                return;
            }
            Err(RunPoolExhausted) => {
                Self::fail_payload(states, runs, stats, handle, "reorder pools exhausted");
                return;
            }
        }
        let st = states.item_mut(handle);
        st.bytes_received += data_len;
        st.buffered_fragments += 1;
        stats.buffered_packets += 1;

        if stats.buffered_packets >= *max_buffered_packets {
            Self::fail_payload(
                states,
                runs,
                stats,
                handle,
                "packet reorder window exceeded",
            );
            return;
        }

        let st = states.item_mut(handle);
        if let Some(total) = st.expected_total {
            if st.bytes_received > u64::from(total) {
                Self::fail_payload(
                    states,
                    runs,
                    stats,
                    handle,
                    "received more bytes than the declared payload size",
                );
                return;
            }
            if st.bytes_received == u64::from(total) && runs::is_single_from_zero(runs, st.run_head)
            {
                st.state = SlotState::Complete;
            }
        }
    }

    fn lookup_or_create(&mut self, payload_num: Seq, now_us: u64) -> Option<PoolHandle> {
        let slot = payload_num.0 as usize & self.mask;
        if let Some(handle) = self.slots[slot] {
            if self.states.item(handle).payload_num == payload_num {
                return Some(handle);
            }
            // wrap collision: a stale payload is still parked where a new
            // one is arriving
            let dist = self.forward_dist(self.current_index, payload_num);
            if dist >= self.payload_window {
                self.stats.out_of_window_packets += 1;
                return None;
            }
            warn!(
                old = self.states.item(handle).payload_num.0,
                new = payload_num.0,
                "evicting stale payload on wrap collision"
            );
            Self::fail_payload(
                &mut self.states,
                &mut self.runs,
                &mut self.stats,
                handle,
                "payload evicted by a newer payload number",
            );
            self.deliver(handle, slot);
        }

        let dist = self.forward_dist(self.current_index, payload_num);
        if dist >= self.ring_size {
            self.stats.out_of_window_packets += 1;
            warn!(
                payload_num = payload_num.0,
                "packet outside the payload reorder window dropped"
            );
            return None;
        }

        let handle = self.states.get()?;
        let st = self.states.item_mut(handle);
        *st = RxPayloadState {
            payload_num,
            first_arrival_us: now_us,
            ..RxPayloadState::default()
        };
        if dist >= self.payload_window {
            // too far ahead to buffer; keep a placeholder so its traffic
            // is accounted until the cursor catches up
            st.state = SlotState::Ignore;
            self.stats.out_of_window_packets += 1;
        }
        self.slots[slot] = Some(handle);
        Some(handle)
    }

    /// Marks a payload failed: its buffered runs go back to the pools and
    /// it awaits in-order delivery as an error.
    fn fail_payload(
        states: &mut Pool<RxPayloadState>,
        runs: &mut Pool<Run>,
        stats: &mut RxStats,
        handle: PoolHandle,
        reason: &'static str,
    ) {
        let st = states.item_mut(handle);
        let freed = runs::release_all(runs, &mut st.run_head);
        stats.buffered_packets -= freed;
        st.buffered_fragments = 0;
        st.state = SlotState::Error;
        st.error_reason = Some(reason);
        debug!(payload_num = st.payload_num.0, reason, "payload failed");
    }

    /// Builds the delivery descriptor for a completed or failed payload,
    /// enqueues it, and releases the slot.
    fn deliver(&mut self, handle: PoolHandle, slot: usize) {
        let st = self.states.item_mut(handle);
        let (status, sgl, error) = if st.state == SlotState::Complete {
            let sgl = runs::take_if_single_from_zero(&mut self.runs, &mut st.run_head)
                .unwrap_or_default();
            self.stats.buffered_packets -= st.buffered_fragments;
            st.buffered_fragments = 0;
            (RxPayloadStatus::Ok, sgl, None)
        } else {
            let mut msg = take_string(&self.strings);
            msg.push_str(st.error_reason.unwrap_or("payload error"));
            (RxPayloadStatus::Error, Sgl::new(), Some(msg))
        };

        match status {
            RxPayloadStatus::Ok => self.stats.delivered_ok += 1,
            RxPayloadStatus::Error => self.stats.delivered_error += 1,
        }

        let meta = st.start.take().unwrap_or_default();
        let delivery = RxDelivery {
            payload_num: st.payload_num,
            status,
            sgl,
            packet_count: st.packet_count,
            total_payload_size: meta.total_payload_size,
            origination_ptp: meta.origination_ptp,
            user_data: meta.user_data,
            max_latency_us: meta.max_latency_us,
            tx_start_time_us: meta.tx_start_time_us,
            extra_data: meta.extra_data,
            error,
        };
        if let Err(dropped) = self.queue.push(delivery) {
            debug!(
                payload_num = dropped.0.payload_num.0,
                "delivery dropped, queue shut down"
            );
        }
        self.release_state(handle, slot);
    }

    fn release_state(&mut self, handle: PoolHandle, slot: usize) {
        let st = self.states.item_mut(handle);
        debug_assert!(st.run_head.is_none(), "releasing state with live runs");
        *st = RxPayloadState::default();
        self.states.put(handle);
        self.slots[slot] = None;
    }

    /// Parks a state for `payload_num` regardless of window checks, for
    /// driving wrap-collision paths in tests.
    #[cfg(test)]
    fn park_for_test(&mut self, payload_num: Seq, now_us: u64) {
        let slot = payload_num.0 as usize & self.mask;
        assert!(self.slots[slot].is_none());
        let handle = self.states.get().expect("state pool exhausted");
        *self.states.item_mut(handle) = RxPayloadState {
            payload_num,
            first_arrival_us: now_us,
            ..RxPayloadState::default()
        };
        self.slots[slot] = Some(handle);
    }
}
