//! End-to-end exchange tests: payloads go through the transmit
//! packetizer, a loopback adapter, and the receive reorderers.

use bytes::Bytes;
use framelink_proto::{header::PayloadKind, header::PtpTimestamp, ProtocolVersion, Seq};
use framelink_transport::{
    adapter::{DatagramAdapter, SubmitError, TxPacket},
    recv::{RxEndpoint, RxEndpointConfig, RxPayloadStatus},
    send::{TxEndpoint, TxEndpointConfig, TxPayload},
    sgl::Sgl,
};

#[derive(Debug, Default)]
struct LoopbackAdapter {
    datagrams: Vec<Bytes>,
}

impl DatagramAdapter for LoopbackAdapter {
    fn submit(&mut self, batch: &[TxPacket]) -> Result<(), SubmitError> {
        for packet in batch {
            let mut datagram = Vec::with_capacity(packet.wire_len());
            datagram.extend_from_slice(&packet.header);
            datagram.extend_from_slice(&packet.data.to_vec());
            self.datagrams.push(Bytes::from(datagram));
        }
        Ok(())
    }
}

fn tx_payload(data: Vec<u8>, unit_size: usize, max_latency_us: u64) -> TxPayload {
    TxPayload {
        data: Sgl::from_fragment(Bytes::from(data)),
        kind: PayloadKind::Sequential,
        unit_size,
        max_latency_us,
        origination_ptp: PtpTimestamp {
            seconds: 1_700_000,
            nanoseconds: 12_345,
        },
        user_data: 0xFEED_F00D,
        extra_data: Bytes::from_static(b"\x00\x07\x00"),
    }
}

/// One payload, three 3000-byte packets, arriving in order, on an
/// endpoint pair whose numbering starts at payload 7.
#[test]
fn three_packets_in_order() {
    let mut adapter = LoopbackAdapter::default();
    let mut tx = TxEndpoint::new(&TxEndpointConfig {
        version: ProtocolVersion::V2,
        max_packet_data_len: 3000,
    });
    // advance the transmit side to payload number 7
    for _ in 0..7 {
        tx.send_payload(&mut adapter, &tx_payload(vec![0; 1], 1, 1_000), 0)
            .unwrap();
    }
    adapter.datagrams.clear();

    let mut rx = RxEndpoint::new(&RxEndpointConfig {
        initial_payload_num: Seq(7),
        ..RxEndpointConfig::default()
    });

    let data: Vec<u8> = (0..9000u32).map(|i| (i % 253) as u8).collect();
    let ticket = tx
        .send_payload(&mut adapter, &tx_payload(data.clone(), 5, 16_000), 100)
        .unwrap();
    assert_eq!(Seq(7), ticket.payload_num);
    assert_eq!(3, ticket.packet_count);
    assert_eq!(3, adapter.datagrams.len());

    for datagram in adapter.datagrams.drain(..) {
        rx.ingest(datagram, 200);
    }

    let queue = rx.delivery_queue();
    let delivery = queue.try_pop().expect("payload should have delivered");
    assert_eq!(RxPayloadStatus::Ok, delivery.status);
    assert_eq!(Seq(7), delivery.payload_num);
    assert_eq!(9000, delivery.sgl.len());
    assert_eq!(data, delivery.sgl.to_vec());
    assert_eq!(0xFEED_F00D, delivery.user_data);
    assert_eq!(100, delivery.tx_start_time_us);
    assert!(queue.try_pop().is_none());
}

/// The same payload with its packets arriving in the order 2, 0, 1.
#[test]
fn reorder_2_0_1() {
    let mut adapter = LoopbackAdapter::default();
    let mut tx = TxEndpoint::new(&TxEndpointConfig {
        version: ProtocolVersion::V2,
        max_packet_data_len: 3000,
    });
    let mut rx = RxEndpoint::new(&RxEndpointConfig::default());

    let data: Vec<u8> = (0..9000u32).map(|i| (i % 241) as u8).collect();
    tx.send_payload(&mut adapter, &tx_payload(data.clone(), 5, 16_000), 0)
        .unwrap();

    let datagrams = std::mem::take(&mut adapter.datagrams);
    for index in [2usize, 0, 1] {
        rx.ingest(datagrams[index].clone(), 10);
    }

    let delivery = rx.delivery_queue().try_pop().expect("no delivery");
    assert_eq!(RxPayloadStatus::Ok, delivery.status);
    assert_eq!(data, delivery.sgl.to_vec());
    assert!(rx.delivery_queue().try_pop().is_none());
}

/// Every permutation of a five-packet payload reassembles identically.
#[test]
fn all_arrival_orders_reassemble() {
    fn permutations(items: Vec<usize>) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items];
        }
        let mut out = Vec::new();
        for (i, &pick) in items.iter().enumerate() {
            let mut rest = items.clone();
            rest.remove(i);
            for mut tail in permutations(rest) {
                tail.insert(0, pick);
                out.push(tail);
            }
        }
        out
    }

    let mut adapter = LoopbackAdapter::default();
    let mut tx = TxEndpoint::new(&TxEndpointConfig {
        version: ProtocolVersion::V2,
        max_packet_data_len: 100,
    });
    let data: Vec<u8> = (0..500u32).map(|i| (i % 97) as u8).collect();
    tx.send_payload(&mut adapter, &tx_payload(data.clone(), 4, 16_000), 0)
        .unwrap();
    let datagrams = std::mem::take(&mut adapter.datagrams);
    assert_eq!(5, datagrams.len());

    for order in permutations((0..5).collect()) {
        let mut rx = RxEndpoint::new(&RxEndpointConfig::default());
        for &index in &order {
            rx.ingest(datagrams[index].clone(), 0);
        }
        let delivery = rx
            .delivery_queue()
            .try_pop()
            .unwrap_or_else(|| panic!("order {order:?} did not deliver"));
        assert_eq!(data, delivery.sgl.to_vec(), "order {order:?}");
        assert_eq!(0, rx.stats().buffered_packets);
    }
}

/// Payload numbers wrap at the negotiated maximum and in-order delivery
/// continues across the wrap.
#[test]
fn delivery_continues_across_payload_num_wrap() {
    let mut adapter = LoopbackAdapter::default();
    let mut tx = TxEndpoint::new(&TxEndpointConfig {
        version: ProtocolVersion::V1,
        max_packet_data_len: 64,
    });
    let mut rx = RxEndpoint::new(&RxEndpointConfig {
        version: ProtocolVersion::V1,
        payload_window: 4,
        delivery_queue_len: 16,
        ..RxEndpointConfig::default()
    });
    let queue = rx.delivery_queue();

    let mut delivered = Vec::new();
    for round in 0..=256u32 {
        tx.send_payload(&mut adapter, &tx_payload(vec![7; 8], 1, 1_000), u64::from(round))
            .unwrap();
        for datagram in adapter.datagrams.drain(..) {
            rx.ingest(datagram, u64::from(round));
        }
        while let Some(delivery) = queue.try_pop() {
            assert_eq!(RxPayloadStatus::Ok, delivery.status);
            delivered.push(delivery.payload_num);
        }
    }

    assert_eq!(257, delivered.len());
    // payload 255 is followed by payload 0
    assert_eq!(Seq(255), delivered[255]);
    assert_eq!(Seq(0), delivered[256]);
    assert_eq!(Seq(1), rx.current_index());
}

/// Losing the sequence-0 packet leaves the payload incomplete until the
/// deadline passes, at which point it errors in sequence.
#[test]
fn seq0_loss_times_out() {
    let mut adapter = LoopbackAdapter::default();
    let mut tx = TxEndpoint::new(&TxEndpointConfig {
        version: ProtocolVersion::V2,
        max_packet_data_len: 1000,
    });
    let mut rx = RxEndpoint::new(&RxEndpointConfig {
        default_timeout_us: 8_000,
        ..RxEndpointConfig::default()
    });

    tx.send_payload(&mut adapter, &tx_payload(vec![1; 3000], 1, 16_000), 0)
        .unwrap();
    let datagrams = std::mem::take(&mut adapter.datagrams);

    // drop the seq-0 packet; later packets buffer but cannot complete
    rx.ingest(datagrams[1].clone(), 1_000);
    rx.ingest(datagrams[2].clone(), 1_100);
    assert!(rx.delivery_queue().try_pop().is_none());
    assert_eq!(2, rx.stats().buffered_packets);

    // the default deadline applies since the real one rode on seq 0
    rx.send_ready_payloads(9_500);
    let delivery = rx.delivery_queue().try_pop().expect("timeout delivery");
    assert_eq!(RxPayloadStatus::Error, delivery.status);
    assert!(delivery.sgl.is_empty());
    assert!(delivery.error.is_some());
    assert_eq!(0, rx.stats().buffered_packets);
}

/// A zero-length payload is still a payload: one packet, one delivery.
#[test]
fn empty_payload_round_trip() {
    let mut adapter = LoopbackAdapter::default();
    let mut tx = TxEndpoint::new(&TxEndpointConfig {
        version: ProtocolVersion::V2,
        max_packet_data_len: 1000,
    });
    let mut rx = RxEndpoint::new(&RxEndpointConfig::default());

    let ticket = tx
        .send_payload(&mut adapter, &tx_payload(Vec::new(), 5, 1_000), 0)
        .unwrap();
    assert_eq!(1, ticket.packet_count);

    for datagram in adapter.datagrams.drain(..) {
        rx.ingest(datagram, 0);
    }
    let delivery = rx.delivery_queue().try_pop().expect("no delivery");
    assert_eq!(RxPayloadStatus::Ok, delivery.status);
    assert_eq!(0, delivery.sgl.len());
    assert_eq!(0, delivery.total_payload_size);
}

/// Reaching the buffered-packet bound errors the payload being built
/// while the rest of the stream keeps flowing.
#[test]
fn window_overflow_recovers() {
    let mut adapter = LoopbackAdapter::default();
    let mut tx = TxEndpoint::new(&TxEndpointConfig {
        version: ProtocolVersion::V2,
        max_packet_data_len: 100,
    });
    let mut rx = RxEndpoint::new(&RxEndpointConfig {
        payload_window: 4,
        max_buffered_packets: 4,
        ..RxEndpointConfig::default()
    });

    // payload 0: five packets; hold back seq 0 so the rest buffer
    tx.send_payload(&mut adapter, &tx_payload(vec![9; 500], 1, 16_000), 0)
        .unwrap();
    let first = std::mem::take(&mut adapter.datagrams);
    for datagram in &first[1..] {
        rx.ingest(datagram.clone(), 0);
    }
    // the fourth buffered fragment hits the bound and fails payload 0,
    // which is at the head of the line and so delivers immediately
    assert_eq!(0, rx.stats().buffered_packets);
    let delivery = rx.delivery_queue().try_pop().expect("error delivery");
    assert_eq!(RxPayloadStatus::Error, delivery.status);
    assert_eq!(Seq(0), delivery.payload_num);

    // the straggling seq-0 packet is dropped, not buffered
    rx.ingest(first[0].clone(), 10);
    assert!(rx.delivery_queue().try_pop().is_none());
    assert_eq!(0, rx.stats().buffered_packets);

    // the next payload flows normally
    tx.send_payload(&mut adapter, &tx_payload(vec![3; 100], 1, 16_000), 20)
        .unwrap();
    for datagram in adapter.datagrams.drain(..) {
        rx.ingest(datagram, 20);
    }
    let delivery = rx.delivery_queue().try_pop().expect("ok delivery");
    assert_eq!(RxPayloadStatus::Ok, delivery.status);
    assert_eq!(Seq(1), delivery.payload_num);
}
