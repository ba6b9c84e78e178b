//! Boundary to the external conferencing SDK.
//!
//! Everything hard (ICE negotiation, media transport, codec negotiation,
//! stream mixing) lives behind [`ConferenceBackend`]; this crate only
//! orchestrates it. The types here mirror the SDK's object model as plain
//! data so the session can be driven and tested without native media.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

use crate::config::IceServer;
use crate::errors::MixcallError;

/// A video resolution, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    Front,
    Back,
}

/// Capture constraints for the video half of a local stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    pub frame_rate: u32,
    pub resolution: Resolution,
    pub facing: CameraFacing,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            resolution: Resolution::new(640, 480),
            facing: CameraFacing::Front,
        }
    }
}

/// Capture constraints for a local stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConstraints {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

impl StreamConstraints {
    /// Microphone plus front camera at the default resolution.
    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints::default()),
        }
    }

    /// Microphone only.
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
}

/// Codec selection for an outbound stream.
///
/// The pair must match the server's accepted codec set exactly; there is
/// no capability negotiation and a mismatch fails the publish outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub audio_codec: AudioCodec,
    pub video_codec: VideoCodec,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            audio_codec: AudioCodec::Opus,
            video_codec: VideoCodec::H264,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub video_resolution: Option<Resolution>,
}

/// Captured local audio/video. Owned by the session; released on leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStream {
    pub id: String,
}

/// Snapshot of an inbound stream advertised by the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStreamInfo {
    pub id: String,
    pub origin: String,
    /// Server-composed stream combining every participant's media.
    pub is_mixed: bool,
    pub video_resolutions: Vec<Resolution>,
}

/// Outbound media relationship with the conference. Only valid between the
/// publish success and a `PublicationEnded` notification or leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub id: String,
}

/// Inbound media relationship; same lifecycle shape as [`Publication`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub stream_id: String,
}

/// Room snapshot returned by a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceInfo {
    pub conference_id: String,
    pub remote_streams: Vec<RemoteStreamInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One decoded I420 video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Notifications pushed by the conferencing layer after a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConferenceEvent {
    Disconnected,
    StreamAdded(RemoteStreamInfo),
    ParticipantJoined {
        id: String,
    },
    MessageReceived {
        payload: String,
        sender_id: String,
        target: String,
    },
    StreamEnded {
        stream_id: String,
    },
    StreamUpdated {
        stream_id: String,
    },
    PublicationEnded {
        publication_id: String,
    },
    PublicationMuted {
        publication_id: String,
        kind: TrackKind,
    },
    PublicationUnmuted {
        publication_id: String,
        kind: TrackKind,
    },
    SubscriptionEnded {
        subscription_id: String,
    },
    SubscriptionMuted {
        subscription_id: String,
        kind: TrackKind,
    },
    SubscriptionUnmuted {
        subscription_id: String,
        kind: TrackKind,
    },
}

/// Operations the external conferencing SDK provides.
///
/// Each operation is a single outstanding call with no retry; the
/// notification channel returned by [`join`](Self::join) is consumed by
/// the session's event loop.
#[async_trait]
pub trait ConferenceBackend: Send + Sync {
    /// Join a room with a one-shot token and the session's ICE servers.
    /// Returns the room snapshot and the notification channel for this
    /// conference instance.
    async fn join(
        &self,
        token: &str,
        ice_servers: &[IceServer],
    ) -> Result<(ConferenceInfo, mpsc::UnboundedReceiver<ConferenceEvent>), MixcallError>;

    /// Start capture and hand back the local stream handle.
    async fn create_local_stream(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<LocalStream, MixcallError>;

    async fn publish(
        &self,
        stream: &LocalStream,
        options: &PublishOptions,
    ) -> Result<Publication, MixcallError>;

    async fn subscribe(
        &self,
        stream_id: &str,
        options: &SubscribeOptions,
    ) -> Result<Subscription, MixcallError>;

    /// Decoded frames for a subscribed stream, in arrival order. The
    /// stream ends when the subscription does.
    fn video_frames(&self, subscription: &Subscription) -> BoxStream<'static, VideoFrame>;

    /// Stop capture and drop the local stream.
    async fn release_local_stream(&self, stream: LocalStream);

    async fn leave(&self) -> Result<(), MixcallError>;
}

/// Render seam: binds a subscribed stream's frames to a platform surface.
/// Implemented by the render layer; the session attaches on subscribe
/// success and detaches on leave.
pub trait VideoRenderTarget: Send + Sync {
    fn attach(&self, stream_id: &str, frames: BoxStream<'static, VideoFrame>);
    fn detach(&self, stream_id: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_options_default_to_the_fixed_codec_pair() {
        let options = PublishOptions::default();
        assert_eq!(options.audio_codec, AudioCodec::Opus);
        assert_eq!(options.video_codec, VideoCodec::H264);
    }

    #[test]
    fn default_video_constraints_are_vga_front_camera() {
        let video = VideoConstraints::default();
        assert_eq!(video.frame_rate, 30);
        assert_eq!(video.resolution, Resolution::new(640, 480));
        assert_eq!(video.facing, CameraFacing::Front);
    }

    #[test]
    fn audio_only_constraints_have_no_video() {
        let constraints = StreamConstraints::audio_only();
        assert!(constraints.audio);
        assert!(constraints.video.is_none());
    }
}
