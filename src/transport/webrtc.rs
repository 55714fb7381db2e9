//! WebRTC viewer sessions
//!
//! Each viewer gets its own peer connection with one sample track per
//! selected codec. H.264 arrives as AVCC and is rewritten to Annex-B with
//! the parameter sets in front of every IDR; audio frames pass through.
//!
//! ```text
//!   offer (SDP) ──► set_remote_description
//!                   add_track(video?) add_track(audio?)
//!                   create_answer ─► set_local_description
//!                   wait for ICE gathering
//!   answer (SDP) ◄── local_description
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{
    MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU,
};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{Result, TransportError};
use crate::media::h264::{avcc_to_annexb, AvcConfig};
use crate::media::{CodecDescriptor, CodecId, MediaKind, MediaPacket};

use super::{IceConfig, Negotiated, SelectedTrack, SessionRequest, TransportFactory, ViewerSink};

/// Upper bound on ICE candidate gathering before the answer is returned
const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_PROFILE_LEVEL_ID: &str = "42e01f";

/// Negotiates WebRTC sessions for viewers
#[derive(Debug, Clone, Default)]
pub struct WebRtcTransport;

impl WebRtcTransport {
    pub fn new() -> Self {
        Self
    }

    fn build_api(ice: &IceConfig) -> std::result::Result<API, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        if ice.has_port_range() {
            let ephemeral = EphemeralUDP::new(ice.port_min, ice.port_max)
                .map_err(|e| webrtc::Error::new(format!("invalid UDP port range: {e}")))?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
        }

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build())
    }

    async fn open(
        &self,
        request: SessionRequest<'_>,
    ) -> std::result::Result<(String, WebRtcSink), TransportError> {
        let offer = RTCSessionDescription::offer(request.offer_sdp.to_string())
            .map_err(|e| TransportError::InvalidOffer(e.to_string()))?;

        let api = Self::build_api(request.ice)?;
        let peer = Arc::new(api.new_peer_connection(rtc_configuration(request.ice)).await?);

        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = Arc::clone(&closed);
        let viewer = request.viewer;
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            tracing::debug!(viewer = %viewer, state = %state, "Peer connection state changed");
            if matches!(
                state,
                RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed
            ) {
                closed_flag.store(true, Ordering::Release);
            }
            Box::pin(async {})
        }));

        let stream_label = format!("livecast-{}", request.stream);
        let mut tracks = Vec::new();
        for selected in request.tracks.tracks() {
            let track = Arc::new(TrackLocalStaticSample::new(
                codec_capability(&selected.codec),
                selected.codec.kind.as_str().to_string(),
                stream_label.clone(),
            ));
            let sender = peer
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;

            // RTCP must be read for the interceptors to run
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });

            tracks.push(OutboundTrack::new(selected, track));
        }

        if let Err(e) = negotiate_answer(&peer, offer).await {
            let _ = peer.close().await;
            return Err(e);
        }

        let answer = match peer.local_description().await {
            Some(desc) => desc.sdp,
            None => {
                let _ = peer.close().await;
                return Err(TransportError::InvalidOffer(
                    "no local description after answer".to_string(),
                ));
            }
        };

        Ok((
            answer,
            WebRtcSink {
                peer,
                tracks,
                closed,
            },
        ))
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransport {
    async fn negotiate(&self, request: SessionRequest<'_>) -> Result<Negotiated> {
        let (answer_sdp, sink) = self.open(request).await?;
        Ok(Negotiated {
            answer_sdp,
            sink: Box::new(sink),
        })
    }
}

fn rtc_configuration(ice: &IceConfig) -> RTCConfiguration {
    let ice_servers = if ice.servers.is_empty() {
        Vec::new()
    } else {
        vec![RTCIceServer {
            urls: ice.servers.clone(),
            username: ice.username.clone(),
            credential: ice.credential.clone(),
            ..Default::default()
        }]
    };

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

async fn negotiate_answer(
    peer: &RTCPeerConnection,
    offer: RTCSessionDescription,
) -> std::result::Result<(), TransportError> {
    peer.set_remote_description(offer).await?;
    let answer = peer.create_answer(None).await?;

    let mut gather_complete = peer.gathering_complete_promise().await;
    peer.set_local_description(answer).await?;

    if tokio::time::timeout(ICE_GATHER_TIMEOUT, gather_complete.recv())
        .await
        .is_err()
    {
        tracing::warn!("ICE gathering did not complete, answering with partial candidates");
    }
    Ok(())
}

/// RTP capability advertised for a selected codec
fn codec_capability(codec: &CodecDescriptor) -> RTCRtpCodecCapability {
    match codec.codec {
        CodecId::H264 => {
            let profile = codec
                .avc
                .as_ref()
                .map(AvcConfig::profile_level_id)
                .unwrap_or_else(|| DEFAULT_PROFILE_LEVEL_ID.to_string());
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90_000,
                channels: 0,
                sdp_fmtp_line: format!(
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id={profile}"
                ),
                rtcp_feedback: vec![],
            }
        }
        CodecId::Opus => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        CodecId::Pcma | CodecId::Pcmu => RTCRtpCodecCapability {
            mime_type: if codec.codec == CodecId::Pcma {
                MIME_TYPE_PCMA
            } else {
                MIME_TYPE_PCMU
            }
            .to_owned(),
            clock_rate: 8000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        _ => RTCRtpCodecCapability {
            mime_type: format!("{}/{}", codec.kind, codec.codec.name()),
            clock_rate: codec.clock_rate,
            channels: codec.channels as u16,
            ..Default::default()
        },
    }
}

/// Turns packet timestamps into sample durations
#[derive(Debug, Clone)]
struct SampleClock {
    last: Option<Duration>,
    fallback: Duration,
}

impl SampleClock {
    fn new(kind: MediaKind) -> Self {
        let fallback = match kind {
            MediaKind::Video => Duration::from_millis(33),
            MediaKind::Audio => Duration::from_millis(20),
        };
        Self {
            last: None,
            fallback,
        }
    }

    fn duration(&mut self, timestamp: Duration) -> Duration {
        let duration = match self.last {
            Some(last) if timestamp > last => timestamp - last,
            _ => self.fallback,
        };
        self.last = Some(timestamp);
        duration
    }
}

struct OutboundTrack {
    index: usize,
    codec: CodecDescriptor,
    track: Arc<TrackLocalStaticSample>,
    clock: SampleClock,
}

impl OutboundTrack {
    fn new(selected: &SelectedTrack, track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            index: selected.index,
            codec: selected.codec.clone(),
            track,
            clock: SampleClock::new(selected.codec.kind),
        }
    }

    fn payload(&self, packet: &MediaPacket) -> bytes::Bytes {
        match (&self.codec.codec, &self.codec.avc) {
            (CodecId::H264, Some(avc)) => {
                avcc_to_annexb(&packet.data, avc.nalu_length_size, Some(avc))
            }
            (CodecId::H264, None) => avcc_to_annexb(&packet.data, 4, None),
            _ => packet.data.clone(),
        }
    }
}

/// Writes one viewer's packets into its peer connection
pub struct WebRtcSink {
    peer: Arc<RTCPeerConnection>,
    tracks: Vec<OutboundTrack>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ViewerSink for WebRtcSink {
    async fn write_packet(&mut self, packet: &MediaPacket) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed.into());
        }
        let Some(out) = self.tracks.iter_mut().find(|t| t.index == packet.stream_index) else {
            return Ok(());
        };

        let sample = Sample {
            data: out.payload(packet),
            duration: out.clock.duration(packet.timestamp),
            timestamp: SystemTime::now(),
            ..Default::default()
        };
        out.track
            .write_sample(&sample)
            .await
            .map_err(TransportError::from)?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.peer.close().await {
            tracing::debug!(error = %e, "Peer connection close failed");
        }
    }
}
