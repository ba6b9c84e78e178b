use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::auth::{Token, TokenClient};
use crate::config::SessionConfig;
use crate::errors::MixcallError;
use crate::events::{EventEmitter, SessionEvent, SessionEventListener, SessionState};
use crate::sdk::{
    ConferenceBackend, ConferenceEvent, LocalStream, Publication, PublishOptions,
    RemoteStreamInfo, Resolution, StreamConstraints, SubscribeOptions, Subscription,
    VideoRenderTarget,
};
use crate::views::ViewClient;

/// Resolution selection for the mixed-stream subscription.
///
/// An exact 640x480 match wins. The fallback tracks the last advertised
/// resolution narrower than the current pick with a non-zero height;
/// since the pick starts at zero width, that branch never engages and a
/// list without an exact match yields the zero default. Preserved
/// deliberately; see DESIGN.md.
fn select_resolution(resolutions: &[Resolution]) -> Resolution {
    let mut selected = Resolution::default();
    for r in resolutions {
        if r.width == 640 && r.height == 480 {
            selected = *r;
            break;
        }
        if r.width < selected.width && r.height != 0 {
            selected = *r;
        }
    }
    selected
}

/// Manages the lifecycle of one conference room connection.
///
/// Single logical session: configure once, join with a token, then publish
/// the local stream and subscribe to the room's mixed stream concurrently.
/// All mutable handles live behind their own mutex and are written only by
/// the operation that owns them, so publish and subscribe completions may
/// interleave freely.
pub struct ConferenceSession {
    backend: Arc<dyn ConferenceBackend>,
    tokens: TokenClient,
    views: ViewClient,
    emitter: EventEmitter,
    state: Arc<Mutex<SessionState>>,
    config: Arc<Mutex<Option<SessionConfig>>>,
    conference_id: Arc<Mutex<Option<String>>>,
    local_stream: Arc<Mutex<Option<LocalStream>>>,
    mixed_stream: Arc<Mutex<Option<RemoteStreamInfo>>>,
    publication: Arc<Mutex<Option<Publication>>>,
    subscription: Arc<Mutex<Option<Subscription>>>,
    render_target: Arc<Mutex<Option<Arc<dyn VideoRenderTarget>>>>,
    /// Bumped by `leave`; completions carrying an older value are stale
    /// and must not touch session state.
    generation: Arc<AtomicU64>,
}

impl ConferenceSession {
    pub fn new(backend: Arc<dyn ConferenceBackend>) -> Self {
        let http = reqwest::Client::new();
        Self {
            backend,
            tokens: TokenClient::new(http.clone()),
            views: ViewClient::new(http),
            emitter: EventEmitter::new(),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            config: Arc::new(Mutex::new(None)),
            conference_id: Arc::new(Mutex::new(None)),
            local_stream: Arc::new(Mutex::new(None)),
            mixed_stream: Arc::new(Mutex::new(None)),
            publication: Arc::new(Mutex::new(None)),
            subscription: Arc::new(Mutex::new(None)),
            render_target: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.emitter.add_listener(listener);
    }

    /// Set the surface that receives the mixed stream's video frames.
    pub async fn set_render_target(&self, target: Arc<dyn VideoRenderTarget>) {
        *self.render_target.lock().await = Some(target);
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub async fn conference_id(&self) -> Option<String> {
        self.conference_id.lock().await.clone()
    }

    pub async fn local_stream(&self) -> Option<LocalStream> {
        self.local_stream.lock().await.clone()
    }

    pub async fn mixed_stream(&self) -> Option<RemoteStreamInfo> {
        self.mixed_stream.lock().await.clone()
    }

    pub async fn publication(&self) -> Option<Publication> {
        self.publication.lock().await.clone()
    }

    pub async fn subscription(&self) -> Option<Subscription> {
        self.subscription.lock().await.clone()
    }

    /// Store the immutable configuration. Idle -> Configured.
    pub async fn configure(&self, config: SessionConfig) -> Result<(), MixcallError> {
        self.begin(
            "configure",
            "Idle",
            &[SessionState::Idle],
            SessionState::Configured,
        )
        .await?;
        *self.config.lock().await = Some(config);
        Ok(())
    }

    /// Acquire a token and join: the view-becomes-visible flow.
    pub async fn connect(&self) -> Result<(), MixcallError> {
        let config = self
            .config
            .lock()
            .await
            .clone()
            .ok_or_else(|| MixcallError::Configuration("session is not configured".into()))?;
        let token = self.tokens.request_token(&config).await?;
        self.join(token).await
    }

    /// Join the room with a one-shot token. Configured -> Joining -> Joined.
    ///
    /// On success the room's pre-existing remote streams are announced and
    /// the first mixed one becomes the session's tracked mixed stream;
    /// individual streams are ignored. On failure the session returns to
    /// Configured with the error, no retry.
    pub async fn join(&self, token: Token) -> Result<(), MixcallError> {
        self.begin(
            "join",
            "Configured",
            &[SessionState::Configured],
            SessionState::Joining,
        )
        .await?;

        let Some(config) = self.config.lock().await.clone() else {
            self.revert_state(SessionState::Joining, SessionState::Configured)
                .await;
            return Err(MixcallError::Configuration(
                "session is not configured".into(),
            ));
        };

        let generation = self.generation.load(Ordering::SeqCst);

        match self.backend.join(token.as_str(), config.ice_servers()).await {
            Ok((info, events)) => {
                if self.stale(generation) {
                    tracing::warn!("join completed after leave; discarding room");
                    return Err(MixcallError::Sdk("session left during join".into()));
                }

                tracing::info!("joined conference {}", info.conference_id);
                *self.conference_id.lock().await = Some(info.conference_id.clone());

                let mut mixed = None;
                for stream in &info.remote_streams {
                    self.emitter
                        .emit(SessionEvent::RemoteStreamAdded(stream.clone()));
                    if mixed.is_none() && stream.is_mixed {
                        tracing::info!("tracking mixed stream {}", stream.id);
                        mixed = Some(stream.clone());
                    }
                }
                *self.mixed_stream.lock().await = mixed;

                self.set_state(SessionState::Joined).await;
                self.spawn_event_loop(events, generation);
                Ok(())
            }
            Err(e) => {
                if !self.stale(generation) {
                    self.revert_state(SessionState::Joining, SessionState::Configured)
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Capture and publish the local stream with the fixed codec pair,
    /// then tag it for the server's common mixed view.
    ///
    /// Tag failure is logged only; the publication stays active. Publish
    /// failure releases the capture and leaves the session Joined so the
    /// call degrades to receive-only.
    pub async fn publish(
        &self,
        constraints: StreamConstraints,
    ) -> Result<Publication, MixcallError> {
        self.begin(
            "publish",
            "Joined or Subscribing",
            &[SessionState::Joined, SessionState::Subscribing],
            SessionState::Publishing,
        )
        .await?;

        let generation = self.generation.load(Ordering::SeqCst);

        let stream = match self.backend.create_local_stream(&constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                self.revert_state(SessionState::Publishing, SessionState::Joined)
                    .await;
                return Err(e);
            }
        };

        // Leave may have torn the session down while capture was starting;
        // the stream is still only in hand, so stop it here rather than
        // storing it into the cleared slot.
        if self.stale(generation) {
            tracing::warn!("capture completed after leave; releasing local stream");
            self.backend.release_local_stream(stream).await;
            return Err(MixcallError::Sdk("session left during publish".into()));
        }
        *self.local_stream.lock().await = Some(stream.clone());

        match self.backend.publish(&stream, &PublishOptions::default()).await {
            Ok(publication) => {
                if self.stale(generation) {
                    tracing::warn!("publish completed after leave; discarding publication");
                    if let Some(stream) = self.local_stream.lock().await.take() {
                        self.backend.release_local_stream(stream).await;
                    }
                    return Err(MixcallError::Sdk("session left during publish".into()));
                }

                tracing::info!("published local stream as {}", publication.id);
                *self.publication.lock().await = Some(publication.clone());
                self.tag_common_view(&publication).await;
                Ok(publication)
            }
            Err(e) => {
                if let Some(stream) = self.local_stream.lock().await.take() {
                    self.backend.release_local_stream(stream).await;
                }
                if !self.stale(generation) {
                    self.revert_state(SessionState::Publishing, SessionState::Joined)
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Subscribe to the tracked mixed stream and bind it to the render
    /// target. Joined/Publishing -> Subscribing -> Active.
    pub async fn subscribe(&self) -> Result<Subscription, MixcallError> {
        self.begin(
            "subscribe",
            "Joined or Publishing",
            &[SessionState::Joined, SessionState::Publishing],
            SessionState::Subscribing,
        )
        .await?;

        let Some(mixed) = self.mixed_stream.lock().await.clone() else {
            self.revert_state(SessionState::Subscribing, SessionState::Joined)
                .await;
            return Err(MixcallError::Sdk(
                "room has no mixed stream to subscribe to".into(),
            ));
        };

        let resolution = select_resolution(&mixed.video_resolutions);
        let options = SubscribeOptions {
            video_resolution: Some(resolution),
        };

        let generation = self.generation.load(Ordering::SeqCst);

        match self.backend.subscribe(&mixed.id, &options).await {
            Ok(subscription) => {
                if self.stale(generation) {
                    tracing::warn!("subscribe completed after leave; discarding subscription");
                    return Err(MixcallError::Sdk("session left during subscribe".into()));
                }

                tracing::info!("subscribed to mixed stream as {}", subscription.id);
                *self.subscription.lock().await = Some(subscription.clone());

                if let Some(target) = self.render_target.lock().await.clone() {
                    let frames = self.backend.video_frames(&subscription);
                    target.attach(&mixed.id, frames);
                }

                self.set_state(SessionState::Active).await;
                Ok(subscription)
            }
            Err(e) => {
                if !self.stale(generation) {
                    self.revert_state(SessionState::Subscribing, SessionState::Joined)
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Publish and subscribe back-to-back without awaiting each other;
    /// the completions may interleave. Publish failure is logged and the
    /// session continues receive-only; the result reflects the subscribe.
    pub async fn activate(&self, constraints: StreamConstraints) -> Result<(), MixcallError> {
        let (published, subscribed) = tokio::join!(self.publish(constraints), self.subscribe());
        if let Err(e) = published {
            tracing::warn!("publish failed, continuing receive-only: {e}");
        }
        subscribed.map(|_| ())
    }

    /// Leave the conference from any state.
    ///
    /// Server rejection and success converge on the same teardown: the
    /// render target is detached, capture always stops, every handle is
    /// cleared and the session returns to Idle. In-flight completions
    /// observe the bumped generation and become no-ops.
    pub async fn leave(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(SessionState::Leaving).await;

        if let (Some(target), Some(subscription)) = (
            self.render_target.lock().await.clone(),
            self.subscription.lock().await.take(),
        ) {
            target.detach(&subscription.stream_id);
        }

        if let Err(e) = self.backend.leave().await {
            tracing::warn!("leave rejected by conference layer: {e}");
        }

        if let Some(stream) = self.local_stream.lock().await.take() {
            self.backend.release_local_stream(stream).await;
        }

        *self.publication.lock().await = None;
        *self.subscription.lock().await = None;
        *self.mixed_stream.lock().await = None;
        *self.conference_id.lock().await = None;

        self.set_state(SessionState::Idle).await;
    }

    /// Guarded entry into an operation's transient state.
    async fn begin(
        &self,
        op: &'static str,
        expected: &'static str,
        allowed: &[SessionState],
        next: SessionState,
    ) -> Result<(), MixcallError> {
        {
            let mut state = self.state.lock().await;
            if !allowed.contains(&*state) {
                return Err(MixcallError::State {
                    op,
                    expected,
                    actual: state.to_string(),
                });
            }
            *state = next.clone();
        }
        self.emitter.emit(SessionEvent::StateChanged(next));
        Ok(())
    }

    async fn set_state(&self, next: SessionState) {
        *self.state.lock().await = next.clone();
        self.emitter.emit(SessionEvent::StateChanged(next));
    }

    /// Restore `to` only if the session is still in `from`; the other half
    /// of a concurrent publish/subscribe pair may have moved on.
    async fn revert_state(&self, from: SessionState, to: SessionState) {
        {
            let mut state = self.state.lock().await;
            if *state != from {
                return;
            }
            *state = to.clone();
        }
        self.emitter.emit(SessionEvent::StateChanged(to));
    }

    fn stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Fire-and-forget: the publish is never rolled back on tag failure.
    async fn tag_common_view(&self, publication: &Publication) {
        let config = self.config.lock().await.clone();
        let conference_id = self.conference_id.lock().await.clone();
        let (Some(config), Some(conference_id)) = (config, conference_id) else {
            tracing::warn!("common view tag skipped: no conference context");
            return;
        };
        if let Err(e) = self
            .views
            .tag_for_common_view(&config, &conference_id, &publication.id)
            .await
        {
            tracing::warn!("common view tag failed for {}: {e}", publication.id);
        }
    }

    fn spawn_event_loop(
        &self,
        mut events: mpsc::UnboundedReceiver<ConferenceEvent>,
        generation: u64,
    ) {
        let backend = self.backend.clone();
        let emitter = self.emitter.clone();
        let state = self.state.clone();
        let conference_id = self.conference_id.clone();
        let local_stream = self.local_stream.clone();
        let mixed_stream = self.mixed_stream.clone();
        let publication = self.publication.clone();
        let subscription = self.subscription.clone();
        let render_target = self.render_target.clone();
        let generations = self.generation.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if generations.load(Ordering::SeqCst) != generation {
                    tracing::debug!("notification after leave ignored: {event:?}");
                    break;
                }
                match event {
                    ConferenceEvent::Disconnected => {
                        tracing::info!("conference disconnected");
                        emitter.emit(SessionEvent::Disconnected);

                        if let (Some(target), Some(sub)) = (
                            render_target.lock().await.clone(),
                            subscription.lock().await.take(),
                        ) {
                            target.detach(&sub.stream_id);
                        }
                        if let Some(stream) = local_stream.lock().await.take() {
                            backend.release_local_stream(stream).await;
                        }
                        *publication.lock().await = None;
                        *mixed_stream.lock().await = None;
                        *conference_id.lock().await = None;
                        *state.lock().await = SessionState::Idle;
                        emitter.emit(SessionEvent::StateChanged(SessionState::Idle));
                        break;
                    }
                    // End notifications invalidate the matching handle:
                    // publications and subscriptions are only valid until
                    // the conference layer reports their end.
                    ConferenceEvent::PublicationEnded { publication_id } => {
                        let mut slot = publication.lock().await;
                        if slot.as_ref().is_some_and(|p| p.id == publication_id) {
                            *slot = None;
                        }
                        drop(slot);
                        emitter.emit(SessionEvent::PublicationEnded { publication_id });
                    }
                    ConferenceEvent::SubscriptionEnded { subscription_id } => {
                        let ended = {
                            let mut slot = subscription.lock().await;
                            let matches =
                                slot.as_ref().is_some_and(|s| s.id == subscription_id);
                            if matches { slot.take() } else { None }
                        };
                        if let Some(sub) = ended {
                            if let Some(target) = render_target.lock().await.clone() {
                                target.detach(&sub.stream_id);
                            }
                        }
                        emitter.emit(SessionEvent::SubscriptionEnded { subscription_id });
                    }
                    other => emitter.emit(other.into()),
                }
            }
            tracing::info!("session event loop ended");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_STUN_URL, IceServer};
    use crate::sdk::{ConferenceInfo, TrackKind, VideoFrame};
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use futures_util::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct MockBackend {
        join_fails: bool,
        publish_fails: bool,
        subscribe_fails: bool,
        capture_delay: Duration,
        publish_delay: Duration,
        subscribe_delay: Duration,
        has_mixed: bool,
        resolutions: Vec<Resolution>,
        released: StdMutex<Vec<LocalStream>>,
        joined_ice: StdMutex<Option<Vec<IceServer>>>,
        subscribe_options: StdMutex<Option<SubscribeOptions>>,
        events_tx: StdMutex<Option<mpsc::UnboundedSender<ConferenceEvent>>>,
        next_id: AtomicUsize,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                join_fails: false,
                publish_fails: false,
                subscribe_fails: false,
                capture_delay: Duration::ZERO,
                publish_delay: Duration::ZERO,
                subscribe_delay: Duration::ZERO,
                has_mixed: true,
                resolutions: vec![
                    Resolution::new(320, 240),
                    Resolution::new(640, 480),
                    Resolution::new(1280, 720),
                ],
                released: StdMutex::new(Vec::new()),
                joined_ice: StdMutex::new(None),
                subscribe_options: StdMutex::new(None),
                events_tx: StdMutex::new(None),
                next_id: AtomicUsize::new(0),
            }
        }

        fn released_streams(&self) -> Vec<LocalStream> {
            self.released.lock().unwrap().clone()
        }

        fn send_event(&self, event: ConferenceEvent) {
            let tx = self.events_tx.lock().unwrap();
            tx.as_ref().unwrap().send(event).unwrap();
        }
    }

    #[async_trait]
    impl ConferenceBackend for MockBackend {
        async fn join(
            &self,
            _token: &str,
            ice_servers: &[IceServer],
        ) -> Result<(ConferenceInfo, mpsc::UnboundedReceiver<ConferenceEvent>), MixcallError>
        {
            if self.join_fails {
                return Err(MixcallError::Sdk("join rejected".into()));
            }
            *self.joined_ice.lock().unwrap() = Some(ice_servers.to_vec());
            let (tx, rx) = mpsc::unbounded_channel();
            *self.events_tx.lock().unwrap() = Some(tx);
            let mut remote_streams = vec![RemoteStreamInfo {
                id: "solo-1".into(),
                origin: "participant-1".into(),
                is_mixed: false,
                video_resolutions: vec![Resolution::new(640, 480)],
            }];
            if self.has_mixed {
                remote_streams.push(RemoteStreamInfo {
                    id: "mixed-1".into(),
                    origin: "server".into(),
                    is_mixed: true,
                    video_resolutions: self.resolutions.clone(),
                });
            }
            Ok((
                ConferenceInfo {
                    conference_id: "conf-1".into(),
                    remote_streams,
                },
                rx,
            ))
        }

        async fn create_local_stream(
            &self,
            _constraints: &StreamConstraints,
        ) -> Result<LocalStream, MixcallError> {
            tokio::time::sleep(self.capture_delay).await;
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(LocalStream {
                id: format!("local-{n}"),
            })
        }

        async fn publish(
            &self,
            _stream: &LocalStream,
            _options: &PublishOptions,
        ) -> Result<Publication, MixcallError> {
            tokio::time::sleep(self.publish_delay).await;
            if self.publish_fails {
                return Err(MixcallError::Sdk("codec rejected".into()));
            }
            Ok(Publication { id: "pub-1".into() })
        }

        async fn subscribe(
            &self,
            stream_id: &str,
            options: &SubscribeOptions,
        ) -> Result<Subscription, MixcallError> {
            tokio::time::sleep(self.subscribe_delay).await;
            if self.subscribe_fails {
                return Err(MixcallError::Sdk("subscribe rejected".into()));
            }
            *self.subscribe_options.lock().unwrap() = Some(options.clone());
            Ok(Subscription {
                id: "sub-1".into(),
                stream_id: stream_id.to_string(),
            })
        }

        fn video_frames(&self, _subscription: &Subscription) -> BoxStream<'static, VideoFrame> {
            futures_util::stream::empty().boxed()
        }

        async fn release_local_stream(&self, stream: LocalStream) {
            self.released.lock().unwrap().push(stream);
        }

        async fn leave(&self) -> Result<(), MixcallError> {
            Ok(())
        }
    }

    struct RecordingTarget {
        attached: StdMutex<Vec<String>>,
        detached: StdMutex<Vec<String>>,
    }

    impl RecordingTarget {
        fn new() -> Self {
            Self {
                attached: StdMutex::new(Vec::new()),
                detached: StdMutex::new(Vec::new()),
            }
        }
    }

    impl VideoRenderTarget for RecordingTarget {
        fn attach(&self, stream_id: &str, _frames: BoxStream<'static, VideoFrame>) {
            self.attached.lock().unwrap().push(stream_id.to_string());
        }

        fn detach(&self, stream_id: &str) {
            self.detached.lock().unwrap().push(stream_id.to_string());
        }
    }

    struct CapturingListener {
        events: StdMutex<Vec<SessionEvent>>,
    }

    impl CapturingListener {
        fn new() -> Self {
            Self {
                events: StdMutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<SessionEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SessionEventListener for CapturingListener {
        fn on_event(&self, event: SessionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn config_for_base(base: &str) -> SessionConfig {
        SessionConfig::builder().server_base(base).build()
    }

    async fn joined_session(backend: Arc<MockBackend>, base: &str) -> ConferenceSession {
        let session = ConferenceSession::new(backend);
        session.configure(config_for_base(base)).await.unwrap();
        session.join(Token::from("tok".to_string())).await.unwrap();
        session
    }

    #[test]
    fn select_resolution_prefers_exact_vga() {
        let picked = select_resolution(&[
            Resolution::new(320, 240),
            Resolution::new(640, 480),
            Resolution::new(1280, 720),
        ]);
        assert_eq!(picked, Resolution::new(640, 480));
    }

    #[test]
    fn select_resolution_without_exact_match_yields_zero_default() {
        let picked = select_resolution(&[Resolution::new(320, 240), Resolution::new(800, 600)]);
        assert_eq!(picked, Resolution::default());
    }

    #[tokio::test]
    async fn configure_moves_idle_to_configured() {
        let session = ConferenceSession::new(Arc::new(MockBackend::new()));
        session.configure(config_for_base("")).await.unwrap();
        assert_eq!(session.state().await, SessionState::Configured);
    }

    #[tokio::test]
    async fn configure_twice_is_a_state_error() {
        let session = ConferenceSession::new(Arc::new(MockBackend::new()));
        session.configure(config_for_base("")).await.unwrap();
        let err = session.configure(config_for_base("")).await.unwrap_err();
        assert!(matches!(err, MixcallError::State { op: "configure", .. }));
    }

    #[tokio::test]
    async fn join_requires_configured() {
        let session = ConferenceSession::new(Arc::new(MockBackend::new()));
        let err = session
            .join(Token::from("tok".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, MixcallError::State { op: "join", .. }));
    }

    #[tokio::test]
    async fn join_tracks_mixed_stream_and_conference_id() {
        let session = joined_session(Arc::new(MockBackend::new()), "").await;
        assert_eq!(session.state().await, SessionState::Joined);
        assert_eq!(session.conference_id().await.as_deref(), Some("conf-1"));
        let mixed = session.mixed_stream().await.unwrap();
        assert_eq!(mixed.id, "mixed-1");
        assert!(mixed.is_mixed);
    }

    #[tokio::test]
    async fn join_hands_ice_servers_to_the_conference_layer() {
        let backend = Arc::new(MockBackend::new());
        let _session = joined_session(backend.clone(), "").await;

        let ice = backend.joined_ice.lock().unwrap().clone().unwrap();
        assert_eq!(ice, vec![IceServer::new(vec![DEFAULT_STUN_URL.to_string()])]);
    }

    #[tokio::test]
    async fn join_hands_configured_ice_servers_through() {
        let backend = Arc::new(MockBackend::new());
        let session = ConferenceSession::new(backend.clone());
        let config = SessionConfig::builder()
            .ice_server(IceServer::new(vec!["turn:turn.example.org:443".into()]))
            .build();
        session.configure(config).await.unwrap();
        session.join(Token::from("tok".to_string())).await.unwrap();

        let ice = backend.joined_ice.lock().unwrap().clone().unwrap();
        assert_eq!(
            ice,
            vec![IceServer::new(vec!["turn:turn.example.org:443".into()])]
        );
    }

    #[tokio::test]
    async fn join_failure_returns_to_configured() {
        let mut backend = MockBackend::new();
        backend.join_fails = true;
        let session = ConferenceSession::new(Arc::new(backend));
        session.configure(config_for_base("")).await.unwrap();
        let err = session
            .join(Token::from("tok".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, MixcallError::Sdk(_)));
        assert_eq!(session.state().await, SessionState::Configured);
        assert!(session.conference_id().await.is_none());
    }

    #[tokio::test]
    async fn publish_stores_publication_and_tags_common_view() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rooms/conf-1/streams/pub-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let session = joined_session(Arc::new(MockBackend::new()), &server.uri()).await;
        let publication = session
            .publish(StreamConstraints::audio_video())
            .await
            .unwrap();
        assert_eq!(publication.id, "pub-1");
        assert_eq!(session.publication().await, Some(publication));
    }

    #[tokio::test]
    async fn tag_failure_leaves_publication_active() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let session = joined_session(Arc::new(MockBackend::new()), &server.uri()).await;
        session
            .publish(StreamConstraints::audio_video())
            .await
            .unwrap();
        assert!(session.publication().await.is_some());
        assert!(session.local_stream().await.is_some());
    }

    #[tokio::test]
    async fn publish_failure_degrades_to_receive_only() {
        let mut backend = MockBackend::new();
        backend.publish_fails = true;
        let backend = Arc::new(backend);
        let session = joined_session(backend.clone(), "").await;

        let err = session
            .publish(StreamConstraints::audio_video())
            .await
            .unwrap_err();
        assert!(matches!(err, MixcallError::Sdk(_)));
        assert!(session.publication().await.is_none());
        assert!(session.local_stream().await.is_none());
        assert_eq!(backend.released_streams().len(), 1);
        assert_eq!(session.state().await, SessionState::Joined);

        // subscribe still works; the call is receive-only
        session.subscribe().await.unwrap();
        assert_eq!(session.state().await, SessionState::Active);
    }

    #[tokio::test]
    async fn subscribe_requests_the_selected_resolution() {
        let backend = Arc::new(MockBackend::new());
        let session = joined_session(backend.clone(), "").await;

        let subscription = session.subscribe().await.unwrap();
        assert_eq!(subscription.stream_id, "mixed-1");
        assert_eq!(session.state().await, SessionState::Active);

        let options = backend.subscribe_options.lock().unwrap().clone().unwrap();
        assert_eq!(options.video_resolution, Some(Resolution::new(640, 480)));
    }

    #[tokio::test]
    async fn subscribe_without_mixed_stream_fails() {
        let mut backend = MockBackend::new();
        backend.has_mixed = false;
        let session = joined_session(Arc::new(backend), "").await;

        let err = session.subscribe().await.unwrap_err();
        assert!(matches!(err, MixcallError::Sdk(_)));
        assert_eq!(session.state().await, SessionState::Joined);
    }

    #[tokio::test]
    async fn subscribe_attaches_and_leave_detaches_render_target() {
        let session = joined_session(Arc::new(MockBackend::new()), "").await;
        let target = Arc::new(RecordingTarget::new());
        session.set_render_target(target.clone()).await;

        session.subscribe().await.unwrap();
        assert_eq!(*target.attached.lock().unwrap(), vec!["mixed-1"]);

        session.leave().await;
        assert_eq!(*target.detached.lock().unwrap(), vec!["mixed-1"]);
    }

    #[tokio::test]
    async fn activate_allows_either_completion_order() {
        for (publish_ms, subscribe_ms) in [(40, 5), (5, 40)] {
            let mut backend = MockBackend::new();
            backend.publish_delay = Duration::from_millis(publish_ms);
            backend.subscribe_delay = Duration::from_millis(subscribe_ms);
            let session = joined_session(Arc::new(backend), "").await;

            session
                .activate(StreamConstraints::audio_video())
                .await
                .unwrap();

            assert!(session.publication().await.is_some());
            assert!(session.subscription().await.is_some());
            assert_eq!(session.state().await, SessionState::Active);
        }
    }

    #[tokio::test]
    async fn activate_with_publish_failure_still_subscribes() {
        let mut backend = MockBackend::new();
        backend.publish_fails = true;
        let session = joined_session(Arc::new(backend), "").await;

        session
            .activate(StreamConstraints::audio_video())
            .await
            .unwrap();

        assert!(session.publication().await.is_none());
        assert!(session.subscription().await.is_some());
    }

    #[tokio::test]
    async fn leave_always_releases_local_stream() {
        let backend = Arc::new(MockBackend::new());
        let session = joined_session(backend.clone(), "").await;
        session
            .activate(StreamConstraints::audio_video())
            .await
            .unwrap();

        session.leave().await;

        assert_eq!(backend.released_streams().len(), 1);
        assert!(session.local_stream().await.is_none());
        assert!(session.publication().await.is_none());
        assert!(session.subscription().await.is_none());
        assert!(session.conference_id().await.is_none());
        assert_eq!(session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn leave_before_join_is_harmless() {
        let session = ConferenceSession::new(Arc::new(MockBackend::new()));
        session.leave().await;
        assert_eq!(session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn stale_publish_after_leave_is_discarded() {
        let mut backend = MockBackend::new();
        backend.publish_delay = Duration::from_millis(80);
        let backend = Arc::new(backend);
        let session = joined_session(backend.clone(), "").await;

        let (published, ()) = tokio::join!(session.publish(StreamConstraints::audio_video()), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            session.leave().await;
        });

        assert!(published.is_err());
        assert!(session.publication().await.is_none());
        assert_eq!(backend.released_streams().len(), 1);
        assert_eq!(session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn leave_during_capture_stops_the_late_stream() {
        let mut backend = MockBackend::new();
        backend.capture_delay = Duration::from_millis(80);
        let backend = Arc::new(backend);
        let session = joined_session(backend.clone(), "").await;

        let (published, ()) = tokio::join!(session.publish(StreamConstraints::audio_video()), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            session.leave().await;
        });

        assert!(published.is_err());
        assert!(session.local_stream().await.is_none());
        assert_eq!(backend.released_streams().len(), 1);
        assert_eq!(session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn event_loop_forwards_notifications() {
        let backend = Arc::new(MockBackend::new());
        let session = joined_session(backend.clone(), "").await;
        let listener = Arc::new(CapturingListener::new());
        session.add_listener(listener.clone());

        backend.send_event(ConferenceEvent::ParticipantJoined { id: "p2".into() });
        backend.send_event(ConferenceEvent::PublicationMuted {
            publication_id: "pub-1".into(),
            kind: TrackKind::Audio,
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = listener.events();
        assert!(events.contains(&SessionEvent::ParticipantJoined { id: "p2".into() }));
        assert!(events.contains(&SessionEvent::PublicationMuted {
            publication_id: "pub-1".into(),
            kind: TrackKind::Audio,
        }));
    }

    #[tokio::test]
    async fn end_notifications_invalidate_handles() {
        let backend = Arc::new(MockBackend::new());
        let session = joined_session(backend.clone(), "").await;
        let target = Arc::new(RecordingTarget::new());
        session.set_render_target(target.clone()).await;
        session
            .activate(StreamConstraints::audio_video())
            .await
            .unwrap();

        backend.send_event(ConferenceEvent::PublicationEnded {
            publication_id: "pub-1".into(),
        });
        backend.send_event(ConferenceEvent::SubscriptionEnded {
            subscription_id: "sub-1".into(),
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(session.publication().await.is_none());
        assert!(session.subscription().await.is_none());
        assert_eq!(*target.detached.lock().unwrap(), vec!["mixed-1"]);
    }

    #[tokio::test]
    async fn end_notification_for_unknown_handle_is_ignored() {
        let backend = Arc::new(MockBackend::new());
        let session = joined_session(backend.clone(), "").await;
        session
            .activate(StreamConstraints::audio_video())
            .await
            .unwrap();

        backend.send_event(ConferenceEvent::PublicationEnded {
            publication_id: "someone-else".into(),
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(session.publication().await.is_some());
    }

    #[tokio::test]
    async fn disconnect_notification_resets_the_session() {
        let backend = Arc::new(MockBackend::new());
        let session = joined_session(backend.clone(), "").await;
        let listener = Arc::new(CapturingListener::new());
        session.add_listener(listener.clone());

        backend.send_event(ConferenceEvent::Disconnected);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(session.state().await, SessionState::Idle);
        assert!(session.conference_id().await.is_none());
        assert!(listener.events().contains(&SessionEvent::Disconnected));
    }
}
