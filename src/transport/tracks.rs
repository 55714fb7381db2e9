//! Track selection for outbound sessions
//!
//! A pure function over the stream's codec list: pick the first video track
//! and the first audio track the transport can carry, skip everything else.

use crate::media::{CodecDescriptor, CodecId, MediaKind};

/// One codec list entry chosen for a viewer
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedTrack {
    /// Position in the stream's codec list, matches `MediaPacket::stream_index`
    pub index: usize,
    pub codec: CodecDescriptor,
}

/// Tracks a viewer session will carry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSelection {
    pub video: Option<SelectedTrack>,
    pub audio: Option<SelectedTrack>,
    /// Entries the transport cannot carry
    pub skipped: Vec<CodecDescriptor>,
}

impl TrackSelection {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }

    /// Audio without video; output starts without waiting for a key frame
    pub fn is_audio_only(&self) -> bool {
        self.video.is_none() && self.audio.is_some()
    }

    /// Kinds in the order they are negotiated (video first)
    pub fn kinds(&self) -> Vec<MediaKind> {
        self.tracks().map(|t| t.codec.kind).collect()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &SelectedTrack> {
        self.video.iter().chain(self.audio.iter())
    }

    /// Selected track for a packet's codec index
    pub fn track_for(&self, stream_index: usize) -> Option<&SelectedTrack> {
        self.tracks().find(|t| t.index == stream_index)
    }
}

/// Codecs a browser session can receive without transcoding
pub fn is_supported(codec: &CodecDescriptor) -> bool {
    match codec.kind {
        MediaKind::Video => codec.codec == CodecId::H264,
        MediaKind::Audio => matches!(codec.codec, CodecId::Pcma | CodecId::Pcmu | CodecId::Opus),
    }
}

pub fn select_tracks(codecs: &[CodecDescriptor]) -> TrackSelection {
    let mut selection = TrackSelection::default();

    for (index, codec) in codecs.iter().enumerate() {
        let slot = match codec.kind {
            MediaKind::Video => &mut selection.video,
            MediaKind::Audio => &mut selection.audio,
        };
        if slot.is_none() && is_supported(codec) {
            *slot = Some(SelectedTrack {
                index,
                codec: codec.clone(),
            });
        } else {
            selection.skipped.push(codec.clone());
        }
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h264() -> CodecDescriptor {
        CodecDescriptor::h264(None)
    }

    #[test]
    fn test_video_and_audio() {
        let codecs = vec![h264(), CodecDescriptor::audio(CodecId::Pcmu, 8000, 1)];
        let selection = select_tracks(&codecs);

        assert_eq!(selection.video.as_ref().unwrap().index, 0);
        assert_eq!(selection.audio.as_ref().unwrap().index, 1);
        assert_eq!(selection.kinds(), vec![MediaKind::Video, MediaKind::Audio]);
        assert!(selection.skipped.is_empty());
        assert!(!selection.is_audio_only());
    }

    #[test]
    fn test_unsupported_tracks_are_skipped() {
        let codecs = vec![
            CodecDescriptor::audio(CodecId::Aac, 44_100, 2),
            CodecDescriptor::video(CodecId::H265),
            CodecDescriptor::audio(CodecId::Opus, 48_000, 2),
        ];
        let selection = select_tracks(&codecs);

        assert!(selection.video.is_none());
        assert_eq!(selection.audio.as_ref().unwrap().index, 2);
        assert_eq!(selection.skipped.len(), 2);
        assert!(selection.is_audio_only());
        assert_eq!(selection.kinds(), vec![MediaKind::Audio]);
        assert_eq!(selection.track_for(2).unwrap().codec.codec, CodecId::Opus);
        assert!(selection.track_for(0).is_none());
    }

    #[test]
    fn test_only_first_track_per_kind() {
        let codecs = vec![h264(), h264()];
        let selection = select_tracks(&codecs);

        assert_eq!(selection.video.as_ref().unwrap().index, 0);
        assert_eq!(selection.skipped.len(), 1);
    }

    #[test]
    fn test_nothing_supported() {
        let selection = select_tracks(&[CodecDescriptor::audio(CodecId::Mp3, 44_100, 2)]);
        assert!(selection.is_empty());
        assert!(select_tracks(&[]).is_empty());
    }
}
