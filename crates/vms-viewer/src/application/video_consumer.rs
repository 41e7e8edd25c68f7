//! Video consumer: turns binary frames into rasters for one camera.
//!
//! # Decode context
//!
//! [`DecodeContext`] owns the decoder lifecycle for one displayed stream:
//!
//! * picture codecs (MJPEG) are decoded one payload at a time, no state kept;
//! * stream codecs (H.264) share one [`StreamDecoder`] across frames, opened
//!   lazily with the latest initialisation data;
//! * a codec switch closes the previous stream decoder exactly once before
//!   anything else is created;
//! * a changed initialisation block rebuilds the stream decoder;
//! * a fatal decoder error drops the decoder so the next frame recreates it.
//!
//! Per-frame failures are returned to the caller, which logs and drops the
//! frame; they never leave the context unusable.
//!
//! # Camera feed
//!
//! [`CameraFeed`] wires one decode context to a [`SessionManager`].  It
//! requests live video for its camera when the video channel becomes ready,
//! guarded so the request is issued once per readiness: the guard is armed
//! when the request goes out and disarmed when the channel closes, the
//! gateway loses its server session or the gateway reports an error.
//!
//! Binary frames carry no camera id.  The gateway sends a `liveData` text
//! frame right before each binary frame, so a feed only decodes a frame whose
//! preceding `liveData` named its camera.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use vms_core::{demux_frame, CameraId, CodecFamily, CodecId, Endpoint, ObjectDetection};

use crate::application::decoder::{DecodeError, DecoderBackend, Raster, StreamDecoder};
use crate::application::session_manager::{SessionManager, WeakSessionManager};
use crate::application::subscribers::Subscription;
use crate::domain::SessionEvent;

// ── Decode context ────────────────────────────────────────────────────────────

/// Decoder lifecycle for one stream.
pub struct DecodeContext {
    backend: Box<dyn DecoderBackend>,
    active_codec: Option<CodecId>,
    stream: Option<Box<dyn StreamDecoder>>,
    init_data: Option<Vec<u8>>,
    streams_opened: u64,
}

impl DecodeContext {
    pub fn new(backend: Box<dyn DecoderBackend>) -> Self {
        Self {
            backend,
            active_codec: None,
            stream: None,
            init_data: None,
            streams_opened: 0,
        }
    }

    /// Codec of the most recent frame.
    pub fn active_codec(&self) -> Option<CodecId> {
        self.active_codec
    }

    /// `true` while a stream decoder is open.
    pub fn has_stream_decoder(&self) -> bool {
        self.stream.is_some()
    }

    /// Stream decoders opened so far.
    pub fn streams_opened(&self) -> u64 {
        self.streams_opened
    }

    /// Decodes one binary frame.
    ///
    /// Returns `Ok(None)` when a stream decoder accepted the unit but has no
    /// picture yet.
    ///
    /// # Errors
    ///
    /// [`DecodeError`] for malformed frames, unsupported codecs and decoder
    /// failures.  The context stays usable after every error.
    pub fn process(&mut self, buf: &[u8]) -> Result<Option<Raster>, DecodeError> {
        let frame = demux_frame(buf)?;

        if self.active_codec != Some(frame.codec) {
            if let Some(previous) = self.active_codec {
                debug!(from = ?previous, to = ?frame.codec, "codec switch");
            }
            self.release_stream();
            self.active_codec = Some(frame.codec);
            self.init_data = frame.init_data.map(<[u8]>::to_vec);
        } else if let Some(init) = frame.init_data {
            if self.init_data.as_deref() != Some(init) {
                self.init_data = Some(init.to_vec());
                if self.stream.is_some() {
                    debug!(codec = ?frame.codec, "initialisation data changed; rebuilding decoder");
                    self.release_stream();
                }
            }
        }

        match frame.codec.family() {
            CodecFamily::Picture => self
                .backend
                .decode_picture(frame.codec, frame.payload)
                .map(Some),
            CodecFamily::Stream => self.decode_unit(frame.codec, frame.payload),
            CodecFamily::Unsupported => Err(DecodeError::Unsupported(frame.codec)),
        }
    }

    fn decode_unit(&mut self, codec: CodecId, unit: &[u8]) -> Result<Option<Raster>, DecodeError> {
        if self.stream.is_none() {
            let decoder = self.backend.open_stream(codec, self.init_data.as_deref())?;
            self.streams_opened += 1;
            self.stream = Some(decoder);
        }
        let Some(decoder) = self.stream.as_mut() else {
            return Ok(None);
        };

        match decoder.decode(unit) {
            Err(e) if e.is_fatal() => {
                warn!(?codec, error = %e, "stream decoder failed; recreating on next frame");
                self.release_stream();
                Err(e)
            }
            result => result,
        }
    }

    fn release_stream(&mut self) {
        if let Some(mut decoder) = self.stream.take() {
            decoder.close();
        }
    }
}

impl Drop for DecodeContext {
    fn drop(&mut self) {
        self.release_stream();
    }
}

// ── Camera feed ───────────────────────────────────────────────────────────────

/// Receives decoded rasters together with the detections for that frame.
pub trait FrameSink: Send {
    fn present(&mut self, camera_id: CameraId, raster: &Raster, objects: &[ObjectDetection]);
}

/// What a camera tile shows besides the picture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedView {
    /// The gateway's upstream session is up.
    pub connected: bool,
    /// The video channel is ready.
    pub ready: bool,
    pub error: Option<String>,
    /// Detections from the latest `liveData` for this camera.
    pub objects: Vec<ObjectDetection>,
    pub frames_presented: u64,
    pub frames_dropped: u64,
}

struct FeedState {
    view: FeedView,
    requested: bool,
    next_frame_is_ours: bool,
    decode: DecodeContext,
    sink: Box<dyn FrameSink>,
}

/// One displayed camera.  Dropping it unsubscribes and closes its decoder.
pub struct CameraFeed {
    camera_id: CameraId,
    state: Arc<Mutex<FeedState>>,
    _events: Subscription,
    _frames: Subscription,
}

fn lock(state: &Mutex<FeedState>) -> MutexGuard<'_, FeedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CameraFeed {
    /// Subscribes a feed for `camera_id` to `session`.
    ///
    /// If the video channel is already ready the live request goes out now;
    /// otherwise it goes out on the next readiness.
    pub fn attach(
        session: &SessionManager,
        camera_id: CameraId,
        backend: Box<dyn DecoderBackend>,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        let state = Arc::new(Mutex::new(FeedState {
            view: FeedView::default(),
            requested: false,
            next_frame_is_ours: false,
            decode: DecodeContext::new(backend),
            sink,
        }));

        let events = {
            let state = Arc::clone(&state);
            let weak = session.downgrade();
            session.subscribe(move |event| on_event(camera_id, &state, &weak, event))
        };

        let frames = {
            let state = Arc::clone(&state);
            session.subscribe_frames(move |bytes| on_frame(camera_id, &state, bytes))
        };

        if session.is_ready(Endpoint::Video) {
            // A Ready delivered since subscribing may already have requested.
            let request = claim_live_request(&mut lock(&state));
            if request {
                session.request_live_video(vec![camera_id]);
            }
        }

        Self {
            camera_id,
            state,
            _events: events,
            _frames: frames,
        }
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    /// Snapshot of the tile state.
    pub fn view(&self) -> FeedView {
        lock(&self.state).view.clone()
    }

    /// `true` while a live request for this feed is outstanding.
    pub fn is_requested(&self) -> bool {
        lock(&self.state).requested
    }
}

/// Marks the feed ready and arms the guard.  Returns `true` only for the
/// caller that armed it, which is the one that must send the request.
fn claim_live_request(state: &mut FeedState) -> bool {
    state.view.ready = true;
    !std::mem::replace(&mut state.requested, true)
}

fn on_event(
    camera_id: CameraId,
    state: &Mutex<FeedState>,
    session: &WeakSessionManager,
    event: &SessionEvent,
) {
    if event.endpoint() != Endpoint::Video {
        return;
    }

    let mut guard = lock(state);
    let request = match event {
        SessionEvent::Ready { .. } => {
            guard.view.error = None;
            claim_live_request(&mut guard)
        }
        SessionEvent::ServerConnection { connected, .. } => {
            guard.view.connected = *connected;
            if *connected {
                guard.view.error = None;
            } else {
                // The gateway lost its server session; it sends a fresh
                // connectionReady once that session is back.
                guard.view.ready = false;
                guard.requested = false;
                guard.next_frame_is_ours = false;
            }
            false
        }
        SessionEvent::ChannelClosed { .. } => {
            guard.view.ready = false;
            guard.view.connected = false;
            guard.requested = false;
            guard.next_frame_is_ours = false;
            false
        }
        SessionEvent::Error { message, .. } => {
            guard.view.error = Some(message.clone());
            guard.requested = false;
            false
        }
        SessionEvent::LiveData { data, .. } => {
            guard.next_frame_is_ours = data.camera_id == camera_id;
            if guard.next_frame_is_ours {
                guard.view.objects = data.objects.clone();
            }
            false
        }
        SessionEvent::ChannelOpened { .. } => false,
    };
    drop(guard);

    if request {
        if let Some(session) = session.upgrade() {
            info!(camera_id, "video channel ready; requesting live video");
            session.request_live_video(vec![camera_id]);
        }
    }
}

fn on_frame(camera_id: CameraId, state: &Mutex<FeedState>, bytes: &[u8]) {
    let mut guard = lock(state);
    if !std::mem::take(&mut guard.next_frame_is_ours) {
        return;
    }

    let FeedState {
        view, decode, sink, ..
    } = &mut *guard;
    match decode.process(bytes) {
        Ok(Some(raster)) => {
            sink.present(camera_id, &raster, &view.objects);
            view.frames_presented += 1;
        }
        Ok(None) => {}
        Err(e) => {
            view.frames_dropped += 1;
            if e.is_fatal() {
                warn!(camera_id, error = %e, "dropping frame");
            } else {
                debug!(camera_id, error = %e, "dropping frame");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
