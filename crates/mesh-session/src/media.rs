//! Local capture sources.
//!
//! A session owns at most two capture sources - the camera and, while
//! sharing, the screen - with exactly one active at a time. Starting a
//! screen share does not stop the camera; it stays acquired so that
//! ending the share restores it without a fresh permission prompt.

use crate::errors::CaptureError;

use async_trait::async_trait;
use signal_protocol::SharingMode;
use uuid::Uuid;

/// Which device a track was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Camera capture.
    Camera,
    /// Display capture.
    Screen,
}

impl From<SourceKind> for SharingMode {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Camera => SharingMode::Camera,
            SourceKind::Screen => SharingMode::Screen,
        }
    }
}

/// Opaque handle to a captured media track.
///
/// Cloning clones the handle, not the capture; all clones refer to the
/// same underlying track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    id: Uuid,
    kind: SourceKind,
}

impl MediaTrack {
    /// Create a handle for a fresh capture.
    #[must_use]
    pub fn new(kind: SourceKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
        }
    }

    /// The track's unique ID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The device kind this track came from.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }
}

/// Device capture collaborator.
///
/// `acquire` may suspend (permission prompts, device warm-up); the
/// coordinator deliberately does not process any other work while an
/// acquisition for a join or mode switch is pending.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Acquire a track from the given device kind.
    async fn acquire(&mut self, kind: SourceKind) -> Result<MediaTrack, CaptureError>;

    /// Release a previously acquired track.
    fn release(&mut self, track: &MediaTrack);
}

/// The session's local sources and outbound media mode.
#[derive(Debug)]
pub struct LocalMedia {
    camera: MediaTrack,
    screen: Option<MediaTrack>,
    active: SourceKind,
    muted: bool,
    video_off: bool,
}

impl LocalMedia {
    /// Start with the camera as the active source.
    #[must_use]
    pub fn new(camera: MediaTrack) -> Self {
        Self {
            camera,
            screen: None,
            active: SourceKind::Camera,
            muted: false,
            video_off: false,
        }
    }

    /// The track currently being sent on outbound links.
    #[must_use]
    pub fn active_track(&self) -> &MediaTrack {
        match self.active {
            SourceKind::Camera => &self.camera,
            // Screen is only ever active while the source exists; the
            // camera fallback keeps this total.
            SourceKind::Screen => self.screen.as_ref().unwrap_or(&self.camera),
        }
    }

    /// The camera track (always acquired for the session's lifetime).
    #[must_use]
    pub fn camera_track(&self) -> &MediaTrack {
        &self.camera
    }

    /// Active source as the wire-level sharing mode.
    #[must_use]
    pub fn sharing_mode(&self) -> SharingMode {
        self.active.into()
    }

    /// Whether the screen is the active source.
    #[must_use]
    pub fn is_screen_sharing(&self) -> bool {
        self.active == SourceKind::Screen
    }

    /// Make a freshly captured screen track the active source. The camera
    /// stays acquired.
    pub fn start_screen(&mut self, track: MediaTrack) {
        self.screen = Some(track);
        self.active = SourceKind::Screen;
    }

    /// End the screen share, restoring the camera as active. Returns the
    /// screen track for release, or `None` when no share was running.
    pub fn end_screen(&mut self) -> Option<MediaTrack> {
        self.active = SourceKind::Camera;
        self.screen.take()
    }

    /// Audio mute flag.
    #[must_use]
    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Video-off flag.
    #[must_use]
    pub fn video_off(&self) -> bool {
        self.video_off
    }

    pub fn set_video_off(&mut self, video_off: bool) {
        self.video_off = video_off;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_is_active_by_default() {
        let camera = MediaTrack::new(SourceKind::Camera);
        let media = LocalMedia::new(camera.clone());

        assert_eq!(media.active_track(), &camera);
        assert_eq!(media.sharing_mode(), SharingMode::Camera);
        assert!(!media.is_screen_sharing());
    }

    #[test]
    fn test_screen_share_preserves_camera() {
        let camera = MediaTrack::new(SourceKind::Camera);
        let screen = MediaTrack::new(SourceKind::Screen);
        let mut media = LocalMedia::new(camera.clone());

        media.start_screen(screen.clone());
        assert_eq!(media.active_track(), &screen);
        assert_eq!(media.sharing_mode(), SharingMode::Screen);
        assert_eq!(media.camera_track(), &camera);

        let released = media.end_screen();
        assert_eq!(released, Some(screen));
        assert_eq!(media.active_track(), &camera);
        assert_eq!(media.sharing_mode(), SharingMode::Camera);
    }

    #[test]
    fn test_end_screen_without_share_is_a_noop() {
        let camera = MediaTrack::new(SourceKind::Camera);
        let mut media = LocalMedia::new(camera.clone());

        assert_eq!(media.end_screen(), None);
        assert_eq!(media.active_track(), &camera);
    }

    #[test]
    fn test_mute_flags_are_independent_of_active_source() {
        let mut media = LocalMedia::new(MediaTrack::new(SourceKind::Camera));
        media.set_muted(true);
        media.set_video_off(true);
        media.start_screen(MediaTrack::new(SourceKind::Screen));

        assert!(media.muted());
        assert!(media.video_off());
    }
}
