//! Track demuxer
//!
//! Turns parsed FLV tags into [`MediaPacket`]s and keeps the stream's codec
//! list: at most one video and one audio track, indexed in arrival order.

use bytes::Bytes;

use crate::error::Result;
use crate::media::h264::{contains_idr, AvcConfig};
use crate::media::{
    AudioPacket, AudioSpecificConfig, AudioTag, CodecDescriptor, CodecId, MediaKind, MediaPacket,
    VideoPacket, VideoTag,
};

/// What one tag produced
#[derive(Debug, Default)]
pub(crate) struct Demuxed {
    pub packet: Option<MediaPacket>,
    pub codecs_changed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct TrackDemuxer {
    codecs: Vec<CodecDescriptor>,
    video: Option<usize>,
    audio: Option<usize>,
}

impl TrackDemuxer {
    pub fn codecs(&self) -> &[CodecDescriptor] {
        &self.codecs
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn video_ready(&self) -> bool {
        self.video
            .map(|i| self.codecs[i].is_ready())
            .unwrap_or(false)
    }

    /// Insert or replace the track of the descriptor's kind
    fn set_track(&mut self, desc: CodecDescriptor) -> (usize, bool) {
        let slot = match desc.kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        };
        match *slot {
            Some(i) if self.codecs[i] == desc => (i, false),
            Some(i) => {
                self.codecs[i] = desc;
                (i, true)
            }
            None => {
                let i = self.codecs.len();
                *slot = Some(i);
                self.codecs.push(desc);
                (i, true)
            }
        }
    }

    /// Track index for a frame, creating a bare descriptor if no header came first
    fn track_for_frame(&mut self, desc: CodecDescriptor) -> (usize, bool) {
        let slot = match desc.kind {
            MediaKind::Video => self.video,
            MediaKind::Audio => self.audio,
        };
        match slot {
            Some(i) => (i, false),
            None => self.set_track(desc),
        }
    }

    pub fn video(&mut self, tag: VideoTag, timestamp: u32) -> Result<Demuxed> {
        let codec = tag.codec;
        let keyframe_flag = tag.is_keyframe();

        match tag.packet {
            VideoPacket::SequenceHeader(config) => {
                let desc = if codec == CodecId::H264 {
                    CodecDescriptor::h264(Some(AvcConfig::parse(config)?))
                } else {
                    CodecDescriptor::video(codec).with_extra(config)
                };
                let (_, changed) = self.set_track(desc);
                Ok(Demuxed {
                    packet: None,
                    codecs_changed: changed,
                })
            }
            VideoPacket::Frame {
                composition_time,
                data,
            } => {
                let (index, changed) = self.track_for_frame(match codec {
                    CodecId::H264 => CodecDescriptor::h264(None),
                    other => CodecDescriptor::video(other),
                });
                let nalu_length_size = self.codecs[index]
                    .avc
                    .as_ref()
                    .map(|c| c.nalu_length_size)
                    .unwrap_or(4);
                let keyframe = keyframe_flag
                    || (codec == CodecId::H264 && contains_idr(&data, nalu_length_size));

                Ok(Demuxed {
                    packet: Some(
                        MediaPacket::new(index, timestamp, data)
                            .keyframe(keyframe)
                            .with_composition_time(composition_time),
                    ),
                    codecs_changed: changed,
                })
            }
            VideoPacket::EndOfSequence | VideoPacket::Other => Ok(Demuxed::default()),
        }
    }

    pub fn audio(&mut self, tag: AudioTag, timestamp: u32) -> Result<Demuxed> {
        match tag.packet {
            AudioPacket::SequenceHeader(config) => {
                let desc = audio_descriptor(tag.codec, tag.sample_rate, tag.channels, config)?;
                let (_, changed) = self.set_track(desc);
                Ok(Demuxed {
                    packet: None,
                    codecs_changed: changed,
                })
            }
            AudioPacket::Frame(data) => {
                let (index, changed) = self.track_for_frame(CodecDescriptor::audio(
                    tag.codec,
                    tag.sample_rate,
                    tag.channels,
                ));
                Ok(Demuxed {
                    packet: Some(MediaPacket::new(index, timestamp, data)),
                    codecs_changed: changed,
                })
            }
            AudioPacket::EndOfSequence | AudioPacket::Other => Ok(Demuxed::default()),
        }
    }
}

fn audio_descriptor(
    codec: CodecId,
    sample_rate: u32,
    channels: u8,
    config: Bytes,
) -> Result<CodecDescriptor> {
    let desc = match codec {
        CodecId::Aac => {
            let asc = AudioSpecificConfig::parse(config.clone())?;
            CodecDescriptor::audio(codec, asc.sampling_frequency, asc.channels())
        }
        // OpusHead: magic(8) version(1) channel count(1) ...
        CodecId::Opus => {
            let channels = config.get(9).copied().filter(|c| *c > 0).unwrap_or(2);
            CodecDescriptor::audio(codec, 48_000, channels)
        }
        _ => CodecDescriptor::audio(codec, sample_rate, channels),
    };
    Ok(desc.with_extra(config))
}
