//! Transmit and receive entry points for media payloads.
//!
//! [`AvmTx`] wraps the transport packetizer: it tags every payload with
//! its stream identifier and, when the caller passes a baseline
//! configuration, serializes it into the payload's first packet. The
//! receive side ([`AvmRx`]) reverses this: it extracts the stream tag
//! from each delivery and surfaces the parsed configuration to the
//! application exactly when it differs from the previous one seen on
//! that stream.

use ahash::AHashMap;
use framelink_proto::header::{PayloadKind, PtpTimestamp};
use framelink_transport::{
    adapter::DatagramAdapter,
    recv::RxDelivery,
    send::{SendError, TxEndpoint, TxEndpointConfig, TxPayload, TxTicket},
    sgl::Sgl,
};
use tracing::warn;

use crate::{
    baseline::{make_baseline_config, parse_baseline_config, BaselineConfig, MakeConfigError},
    config::{AvmExtraData, ExtraDataBlob, ExtraDataEncodeError, GenericConfig},
};

/// Per-payload parameters for [`AvmTx::tx_payload`].
#[derive(Debug, Clone)]
pub struct AvmPayloadConfig {
    /// Which stream of the connection the payload belongs to.
    pub stream_identifier: u16,
    /// Data ordering discipline for the payload's packets.
    pub kind: PayloadKind,
    /// Origination timestamp carried verbatim to the receiver.
    pub origination_ptp: PtpTimestamp,
    /// Opaque application data echoed in the receive callback.
    pub user_data: u64,
    /// Packet boundary granularity in bytes, used when no baseline
    /// configuration is passed (which would otherwise derive it).
    pub unit_size: usize,
}

impl Default for AvmPayloadConfig {
    fn default() -> Self {
        Self {
            stream_identifier: 0,
            kind: PayloadKind::Sequential,
            origination_ptp: PtpTimestamp::default(),
            user_data: 0,
            unit_size: 1,
        }
    }
}

/// Failed to transmit a media payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AvmSendError {
    /// The connection has multiple endpoints; use
    /// [`AvmTx::endpoint_tx_payload`] to address one.
    #[error("connection has multiple endpoints - address one explicitly")]
    InvalidHandle,
    /// The baseline configuration would not serialize.
    #[error("failed to serialize stream configuration")]
    Config(#[from] MakeConfigError),
    /// The extra-data blob would not encode.
    #[error("failed to encode stream extra data")]
    ExtraData(#[from] ExtraDataEncodeError),
    /// The transport rejected the send (including `QueueFull`, which the
    /// caller retries).
    #[error("transport send failed")]
    Transport(#[from] SendError),
}

/// Transmit side of a media connection: one or more transmit endpoints
/// fanning out streams.
#[derive(Debug)]
pub struct AvmTx {
    endpoints: Vec<TxEndpoint>,
}

impl AvmTx {
    /// Creates a single-endpoint connection.
    #[must_use]
    pub fn new(config: &TxEndpointConfig) -> Self {
        Self {
            endpoints: vec![TxEndpoint::new(config)],
        }
    }

    /// Creates a multi-endpoint connection fanning out to one endpoint
    /// per configuration.
    #[must_use]
    pub fn with_endpoints(configs: &[TxEndpointConfig]) -> Self {
        Self {
            endpoints: configs.iter().map(TxEndpoint::new).collect(),
        }
    }

    /// Number of endpoints in this connection.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Transmits one media payload on a single-endpoint connection.
    ///
    /// When `config` is given it is serialized into the payload's first
    /// packet; pass it on the first payload of a stream and whenever the
    /// stream configuration changes. Otherwise only the compact stream
    /// tag is attached.
    ///
    /// # Errors
    ///
    /// [`AvmSendError::InvalidHandle`] on a multi-endpoint connection;
    /// otherwise see [`AvmSendError`]. A
    /// [`SendError::QueueFull`] simply means retry later.
    pub fn tx_payload(
        &mut self,
        adapter: &mut impl DatagramAdapter,
        payload_config: &AvmPayloadConfig,
        config: Option<&BaselineConfig>,
        data: Sgl,
        max_latency_us: u64,
        now_us: u64,
    ) -> Result<TxTicket, AvmSendError> {
        if self.endpoints.len() != 1 {
            return Err(AvmSendError::InvalidHandle);
        }
        self.endpoint_tx_payload(0, adapter, payload_config, config, data, max_latency_us, now_us)
    }

    /// Transmits one media payload on the endpoint at `endpoint_index`.
    ///
    /// # Errors
    ///
    /// [`AvmSendError::InvalidHandle`] when the index is out of range;
    /// otherwise see [`AvmSendError`].
    pub fn endpoint_tx_payload(
        &mut self,
        endpoint_index: usize,
        adapter: &mut impl DatagramAdapter,
        payload_config: &AvmPayloadConfig,
        config: Option<&BaselineConfig>,
        data: Sgl,
        max_latency_us: u64,
        now_us: u64,
    ) -> Result<TxTicket, AvmSendError> {
        let endpoint = self
            .endpoints
            .get_mut(endpoint_index)
            .ok_or(AvmSendError::InvalidHandle)?;

        let (generic, unit_size) = match config {
            Some(config) => (
                Some(make_baseline_config(config)?),
                config.unit_size_bytes(),
            ),
            None => (None, payload_config.unit_size.max(1)),
        };
        let extra_data = ExtraDataBlob {
            tag: AvmExtraData {
                stream_identifier: payload_config.stream_identifier,
            },
            config: generic,
        }
        .encode()?;

        let payload = TxPayload {
            data,
            kind: payload_config.kind,
            unit_size,
            max_latency_us,
            origination_ptp: payload_config.origination_ptp,
            user_data: payload_config.user_data,
            extra_data,
        };
        Ok(endpoint.send_payload(adapter, &payload, now_us)?)
    }
}

/// The stream configuration attached to a delivery, as far as it could
/// be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvmReceivedConfig {
    /// A registered baseline profile parsed the configuration.
    Baseline(BaselineConfig),
    /// The configuration is not a known baseline profile (unknown URI,
    /// unsupported version, or a failed parse); the raw form is handed
    /// through and the payload data is still delivered.
    NotBaseline(GenericConfig),
}

/// One media payload handed to the application.
#[derive(Debug)]
pub struct AvmDelivery {
    /// The transport-level delivery: status, payload bytes, timing
    /// metadata.
    pub inner: RxDelivery,
    /// The per-payload stream tag.
    pub tag: AvmExtraData,
    /// The stream configuration - present only when it differs from the
    /// previous configuration seen on this stream.
    pub config: Option<AvmReceivedConfig>,
}

/// Receive side of a media connection: maps transport deliveries to
/// media deliveries, deduplicating stream configurations.
#[derive(Debug, Default)]
pub struct AvmRx {
    last_config: AHashMap<u16, GenericConfig>,
}

impl AvmRx {
    /// Creates an empty mapper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps one transport delivery, extracting the stream tag and
    /// parsing the stream configuration if this payload announced a new
    /// one.
    pub fn map_delivery(&mut self, delivery: RxDelivery) -> AvmDelivery {
        let blob = if delivery.extra_data.is_empty() {
            ExtraDataBlob::default()
        } else {
            match ExtraDataBlob::decode(&delivery.extra_data) {
                Ok(blob) => blob,
                Err(err) => {
                    warn!(%err, payload_num = delivery.payload_num.0, "bad extra data blob");
                    ExtraDataBlob::default()
                }
            }
        };

        let config = blob.config.and_then(|generic| {
            if self.last_config.get(&blob.tag.stream_identifier) == Some(&generic) {
                return None;
            }
            self.last_config
                .insert(blob.tag.stream_identifier, generic.clone());
            Some(match parse_baseline_config(&generic) {
                Ok(baseline) => AvmReceivedConfig::Baseline(baseline),
                Err(err) => {
                    warn!(
                        %err,
                        stream = blob.tag.stream_identifier,
                        "stream configuration is not a baseline profile"
                    );
                    AvmReceivedConfig::NotBaseline(generic)
                }
            })
        });

        AvmDelivery {
            inner: delivery,
            tag: blob.tag,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use framelink_proto::{ProtocolVersion, Seq};
    use framelink_transport::{
        adapter::{SubmitError, TxPacket},
        recv::{RxEndpoint, RxEndpointConfig},
    };

    use super::*;
    use crate::baseline::{AudioConfig, VideoConfig};

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

    fn tx() -> AvmTx {
        AvmTx::new(&TxEndpointConfig {
            version: ProtocolVersion::V2,
            max_packet_data_len: 1500,
        })
    }

    fn rx() -> (RxEndpoint, AvmRx) {
        (
            RxEndpoint::new(&RxEndpointConfig::default()),
            AvmRx::new(),
        )
    }

    fn video() -> BaselineConfig {
        BaselineConfig::Video(VideoConfig {
            width: 640,
            height: 480,
            frame_rate_num: 30,
            ..VideoConfig::default()
        })
    }

    fn send_and_recv(
        tx: &mut AvmTx,
        rx: &mut RxEndpoint,
        avm_rx: &mut AvmRx,
        config: Option<&BaselineConfig>,
        data: &'static [u8],
    ) -> AvmDelivery {
        let mut adapter = LoopbackAdapter::default();
        let payload_config = AvmPayloadConfig {
            stream_identifier: 9,
            user_data: 42,
            unit_size: 5,
            ..AvmPayloadConfig::default()
        };
        tx.tx_payload(
            &mut adapter,
            &payload_config,
            config,
            Sgl::from_fragment(Bytes::from_static(data)),
            10_000,
            0,
        )
        .unwrap();
        for datagram in adapter.datagrams.drain(..) {
            rx.ingest(datagram, 0);
        }
        avm_rx.map_delivery(rx.delivery_queue().try_pop().expect("no delivery"))
    }

    #[test]
    fn config_surfaces_only_when_changed() {
        let mut tx = tx();
        let (mut rx, mut avm_rx) = rx();
        let video = video();

        let first = send_and_recv(&mut tx, &mut rx, &mut avm_rx, Some(&video), b"frame-one!");
        assert_eq!(9, first.tag.stream_identifier);
        assert_eq!(42, first.inner.user_data);
        assert_eq!(b"frame-one!".to_vec(), first.inner.sgl.to_vec());
        assert_matches!(
            first.config,
            Some(AvmReceivedConfig::Baseline(BaselineConfig::Video(_)))
        );

        // same config again: deduplicated
        let second = send_and_recv(&mut tx, &mut rx, &mut avm_rx, Some(&video), b"frame-two!");
        assert_eq!(None, second.config);

        // no config attached at all
        let third = send_and_recv(&mut tx, &mut rx, &mut avm_rx, None, b"frame-three");
        assert_eq!(None, third.config);

        // a different stream config surfaces again
        let audio = BaselineConfig::Audio(AudioConfig::default());
        let fourth = send_and_recv(&mut tx, &mut rx, &mut avm_rx, Some(&audio), b"grain-four");
        assert_matches!(
            fourth.config,
            Some(AvmReceivedConfig::Baseline(BaselineConfig::Audio(_)))
        );
    }

    #[test]
    fn unparseable_config_is_handed_through_raw() {
        let (mut rx, mut avm_rx) = rx();
        let mut adapter = LoopbackAdapter::default();

        // hand-build a payload whose config has a bogus URI
        let blob = ExtraDataBlob {
            tag: AvmExtraData {
                stream_identifier: 3,
            },
            config: Some(GenericConfig {
                uri: "https://example.com/mystery-profile".into(),
                data: b"cdi_profile_version=01.00; who=knows;".to_vec(),
            }),
        };
        let mut endpoint = TxEndpoint::new(&TxEndpointConfig {
            version: ProtocolVersion::V2,
            max_packet_data_len: 1500,
        });
        let payload = TxPayload {
            data: Sgl::from_fragment(Bytes::from_static(b"payload")),
            kind: PayloadKind::Sequential,
            unit_size: 1,
            max_latency_us: 10_000,
            origination_ptp: PtpTimestamp::default(),
            user_data: 0,
            extra_data: blob.encode().unwrap(),
        };
        endpoint.send_payload(&mut adapter, &payload, 0).unwrap();
        for datagram in adapter.datagrams.drain(..) {
            rx.ingest(datagram, 0);
        }

        let delivery = avm_rx.map_delivery(rx.delivery_queue().try_pop().unwrap());
        // the payload data still arrives even though the config is opaque
        assert_eq!(b"payload".to_vec(), delivery.inner.sgl.to_vec());
        assert_matches!(
            delivery.config,
            Some(AvmReceivedConfig::NotBaseline(ref generic))
                if generic.uri == "https://example.com/mystery-profile"
        );
    }

    #[test]
    fn multi_endpoint_requires_explicit_address() {
        let config = TxEndpointConfig {
            version: ProtocolVersion::V2,
            max_packet_data_len: 1500,
        };
        let mut tx = AvmTx::with_endpoints(&[config.clone(), config]);
        let mut adapter = LoopbackAdapter::default();

        assert_matches!(
            tx.tx_payload(
                &mut adapter,
                &AvmPayloadConfig::default(),
                None,
                Sgl::from_fragment(Bytes::from_static(b"x")),
                1_000,
                0,
            ),
            Err(AvmSendError::InvalidHandle)
        );

        // addressing an endpoint explicitly works
        let ticket = tx
            .endpoint_tx_payload(
                1,
                &mut adapter,
                &AvmPayloadConfig::default(),
                None,
                Sgl::from_fragment(Bytes::from_static(b"x")),
                1_000,
                0,
            )
            .unwrap();
        assert_eq!(Seq(0), ticket.payload_num);

        assert_matches!(
            tx.endpoint_tx_payload(
                5,
                &mut adapter,
                &AvmPayloadConfig::default(),
                None,
                Sgl::new(),
                1_000,
                0,
            ),
            Err(AvmSendError::InvalidHandle)
        );
    }

    #[test]
    fn unit_size_comes_from_the_baseline_config() {
        let mut tx = tx();
        let mut adapter = LoopbackAdapter::default();
        // 4:2:2 ten-bit video: 5-byte pixel groups
        tx.tx_payload(
            &mut adapter,
            &AvmPayloadConfig::default(),
            Some(&video()),
            Sgl::from_fragment(Bytes::from(vec![0u8; 3000])),
            10_000,
            0,
        )
        .unwrap();

        // header lengths differ per packet, but every non-final data
        // slice must hold whole pixel groups
        let wire = ProtocolVersion::V2.wire();
        let lens: Vec<usize> = adapter
            .datagrams
            .iter()
            .map(|datagram| {
                let mut src = datagram.clone();
                wire.decode_header(&mut src).unwrap();
                src.len()
            })
            .collect();
        for &len in &lens[..lens.len() - 1] {
            assert_eq!(0, len % 5, "{lens:?}");
        }
        assert_eq!(3000, lens.iter().sum::<usize>());
    }
}
