//! Application coordinator.
//!
//! The [`AppCoordinator`] owns the avatar controller and audio manager, wires
//! them together over the event bus, and drives both from a single `tick`.
//! It also carries everything around the core engines: the chat transcript,
//! live price/TPS metrics, gaze tracking, visibility handling, theme state
//! and on-disk persistence.
//!
//! Network work (chat completions, metric polls, the TPS stream) runs on
//! spawned tasks; results come back over channels and are applied on the
//! tick, so all engine state stays on the cooperative thread.

pub mod chat;
pub mod metrics;
pub mod persist;

use crate::audio::fallback::{FallbackSpeech, VoiceProfile};
use crate::audio::sink::AudioSink;
use crate::audio::{AudioManager, EnqueueOptions};
use crate::avatar::scene::ScenePort;
use crate::avatar::AvatarController;
use crate::bus::{Event, EventBus};
use crate::config::CompanionConfig;
use crate::error::Result;
use chat::{sanitize_input, validate_input, ChatClient, ChatMessage};
use metrics::MetricsUpdate;
use persist::{PersistedState, StateStore};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Seconds after startup before the welcome line is queued.
const WELCOME_DELAY_SECS: f32 = 1.0;
/// Minimum seconds between gaze-target updates from pointer movement.
const POINTER_THROTTLE_SECS: f32 = 0.1;

struct ChatOutcome {
    result: Result<String>,
}

/// Engine-state summary for diagnostics overlays.
#[derive(Debug, Serialize)]
pub struct DebugSnapshot {
    pub graphics: bool,
    pub rig: Option<String>,
    pub talking: bool,
    /// A chat completion is in flight.
    pub thinking: bool,
    pub gesture: Option<String>,
    pub queue_len: usize,
    pub playing: bool,
    pub vu_width: f32,
    pub price: Option<f64>,
    pub tps: Option<f64>,
    pub transcript_len: usize,
    pub theme: String,
    pub visible: bool,
}

/// Top-level owner of the companion engines.
pub struct AppCoordinator {
    config: CompanionConfig,
    bus: Rc<EventBus>,
    avatar: Rc<RefCell<AvatarController>>,
    audio: Rc<RefCell<AudioManager>>,
    chat: ChatClient,
    client: reqwest::Client,

    conversation: Vec<ChatMessage>,
    store: Option<StateStore>,
    theme: String,
    user_context: Option<String>,

    price: Option<f64>,
    tps: Option<f64>,
    metrics_tx: mpsc::UnboundedSender<MetricsUpdate>,
    metrics_rx: mpsc::UnboundedReceiver<MetricsUpdate>,
    chat_tx: mpsc::UnboundedSender<ChatOutcome>,
    chat_rx: mpsc::UnboundedReceiver<ChatOutcome>,
    chat_pending: bool,

    clock: f32,
    price_timer: f32,
    tps_timer: f32,
    welcome_timer: Option<f32>,
    last_pointer_clock: f32,
    tps_streaming: bool,
    visible: bool,
}

impl AppCoordinator {
    /// Build the coordinator over injected scene and sink ports.
    #[must_use]
    pub fn new(
        config: CompanionConfig,
        scene: Box<dyn ScenePort>,
        sink: Box<dyn AudioSink>,
        voices: Vec<VoiceProfile>,
        store: Option<StateStore>,
    ) -> Self {
        let bus = Rc::new(EventBus::new());
        let client = reqwest::Client::new();

        let avatar = Rc::new(RefCell::new(AvatarController::new(
            Rc::clone(&bus),
            scene,
            client.clone(),
            config.avatar_load_timeout(),
        )));
        let audio = Rc::new(RefCell::new(AudioManager::new(
            Rc::clone(&bus),
            &config,
            client.clone(),
            sink,
            FallbackSpeech::new(voices),
        )));
        let chat = ChatClient::new(client.clone(), config.endpoints.chat.clone());

        let (metrics_tx, metrics_rx) = mpsc::unbounded_channel();
        let (chat_tx, chat_rx) = mpsc::unbounded_channel();

        Self {
            config,
            bus,
            avatar,
            audio,
            chat,
            client,
            conversation: Vec::new(),
            store,
            theme: "dark".to_owned(),
            user_context: None,
            price: None,
            tps: None,
            metrics_tx,
            metrics_rx,
            chat_tx,
            chat_rx,
            chat_pending: false,
            clock: 0.0,
            price_timer: 0.0,
            tps_timer: 0.0,
            welcome_timer: None,
            last_pointer_clock: -POINTER_THROTTLE_SECS,
            tps_streaming: false,
            visible: true,
        }
    }

    /// Bring the app up: wire speech to the avatar, probe graphics, load the
    /// avatar, restore the previous session, start the metrics feeds, and
    /// schedule the welcome line.
    pub async fn start(&mut self) {
        self.wire_speech_mirroring();

        // Graphics failure downgrades to audio-only; the controller already
        // announced it on the bus.
        if self.avatar.borrow_mut().init().is_err() {
            warn!("starting without graphics");
        }
        let sources = self.config.avatar.sources.clone();
        self.avatar.borrow_mut().load_avatar(&sources).await;

        if let Some(store) = &self.store {
            if let Some(state) = store.load(self.config.limits.max_conversation_size) {
                self.conversation = state.conversation;
                if !state.theme.is_empty() {
                    self.theme = state.theme;
                }
                self.user_context = state.user_context;
            }
        }

        if let Some(url) = self.config.ws_url.clone() {
            let tx = self.metrics_tx.clone();
            tokio::spawn(metrics::run_tps_stream(url, tx));
            self.tps_streaming = true;
        }

        self.welcome_timer = Some(WELCOME_DELAY_SECS);
        info!("coordinator started");
    }

    fn wire_speech_mirroring(&self) {
        use crate::bus::EventKind;

        let avatar = Rc::clone(&self.avatar);
        self.bus.on(EventKind::PlayStart, move |event| {
            if let Event::PlayStart(item) = event {
                avatar
                    .borrow_mut()
                    .start_speaking(&item.text, item.sentiment);
            }
            Ok(())
        });
        let avatar = Rc::clone(&self.avatar);
        self.bus.on(EventKind::PlayEnd, move |event| {
            if let Event::PlayEnd(_) = event {
                avatar.borrow_mut().stop_speaking();
            }
            Ok(())
        });
    }

    /// Advance both engines and absorb finished background work. Call once
    /// per frame with the elapsed seconds.
    pub fn tick(&mut self, dt: f32) {
        self.clock += dt;
        self.drain_chat_results();
        self.drain_metrics();
        self.run_timers(dt);
        self.avatar.borrow_mut().update(dt);
        self.audio.borrow_mut().update(dt);
    }

    // ── Chat ────────────────────────────────────────────────────────────

    /// Submit user input: sanitize, validate, record, and request a reply.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the sanitized input is empty or over the
    /// configured length limit. Completion failures are not errors here; the
    /// reply arrives (or the apology is spoken) on a later tick.
    pub fn submit_chat(&mut self, input: &str) -> Result<()> {
        let text = sanitize_input(input);
        validate_input(&text, self.config.limits.max_message_length)?;

        // Typing counts as the user interaction that unblocks audio.
        self.audio.borrow_mut().enable_context();

        self.conversation.push(ChatMessage::user(&text));
        chat::truncate_conversation(
            &mut self.conversation,
            self.config.limits.max_conversation_size,
        );
        self.persist();

        let chat = self.chat.clone();
        let tx = self.chat_tx.clone();
        let mut system_prompt = self.config.system_prompt.clone();
        if let Some(context) = &self.user_context {
            system_prompt.push_str("\nAbout the user: ");
            system_prompt.push_str(context);
        }
        let messages = self.conversation.clone();
        self.chat_pending = true;
        self.avatar.borrow_mut().think();
        tokio::spawn(async move {
            let result = chat.complete(&system_prompt, &messages).await;
            let _ = tx.send(ChatOutcome { result });
        });
        Ok(())
    }

    fn drain_chat_results(&mut self) {
        while let Ok(outcome) = self.chat_rx.try_recv() {
            self.chat_pending = false;
            match outcome.result {
                Ok(reply) => {
                    self.conversation.push(ChatMessage::assistant(&reply));
                    chat::truncate_conversation(
                        &mut self.conversation,
                        self.config.limits.max_conversation_size,
                    );
                    self.persist();
                    self.audio
                        .borrow_mut()
                        .enqueue(&reply, EnqueueOptions::default());
                }
                Err(e) => {
                    warn!("chat failed: {e}");
                    self.bus.emit(Event::Error {
                        context: "chat".to_owned(),
                        message: e.to_string(),
                    });
                    let apology = self.config.speech.chat_failure.clone();
                    self.audio
                        .borrow_mut()
                        .enqueue(&apology, EnqueueOptions::default());
                }
            }
        }
    }

    // ── Metrics ─────────────────────────────────────────────────────────

    fn drain_metrics(&mut self) {
        while let Ok(update) = self.metrics_rx.try_recv() {
            match update {
                MetricsUpdate::Price(price) => {
                    self.price = Some(price);
                    self.bus.emit(Event::PriceUpdate(price));
                }
                MetricsUpdate::Tps(tps) => {
                    self.tps = Some(tps);
                    self.bus.emit(Event::TpsUpdate(tps));
                }
            }
        }
    }

    fn run_timers(&mut self, dt: f32) {
        if let Some(remaining) = self.welcome_timer.as_mut() {
            *remaining -= dt;
            if *remaining <= 0.0 {
                self.welcome_timer = None;
                let welcome = self.config.speech.welcome.clone();
                self.audio
                    .borrow_mut()
                    .enqueue(&welcome, EnqueueOptions::default());
                self.avatar.borrow_mut().wave();
            }
        }

        self.price_timer += dt;
        let price_interval = self.config.update_intervals.price_ms as f32 / 1_000.0;
        if self.price_timer >= price_interval {
            self.price_timer = 0.0;
            let client = self.client.clone();
            let url = self.config.endpoints.price.clone();
            let tx = self.metrics_tx.clone();
            tokio::spawn(async move {
                match metrics::fetch_price(&client, &url).await {
                    Ok(price) => {
                        let _ = tx.send(MetricsUpdate::Price(price));
                    }
                    Err(e) => warn!("price poll failed: {e}"),
                }
            });
        }

        if !self.tps_streaming {
            self.tps_timer += dt;
            let tps_interval = self.config.update_intervals.tps_ms as f32 / 1_000.0;
            if self.tps_timer >= tps_interval {
                self.tps_timer = 0.0;
                let client = self.client.clone();
                let url = self.config.endpoints.tps.clone();
                let tx = self.metrics_tx.clone();
                tokio::spawn(async move {
                    match metrics::fetch_tps(&client, &url).await {
                        Ok(tps) => {
                            let _ = tx.send(MetricsUpdate::Tps(tps));
                        }
                        Err(e) => warn!("tps poll failed: {e}"),
                    }
                });
            }
        }
    }

    // ── Shell surface ───────────────────────────────────────────────────

    /// Pointer movement in screen-normalized coordinates. Throttled so rapid
    /// movement does not spam the gaze blend.
    pub fn pointer_moved(&mut self, x_norm: f32, y_norm: f32) {
        if self.clock - self.last_pointer_clock < POINTER_THROTTLE_SECS {
            return;
        }
        self.last_pointer_clock = self.clock;
        self.avatar.borrow_mut().set_look_target(x_norm, y_norm);
    }

    /// The embedding surface was shown or hidden. Hiding pauses speech;
    /// showing resumes it and greets with a nod.
    pub fn set_visible(&mut self, visible: bool) {
        if visible == self.visible {
            return;
        }
        self.visible = visible;
        if visible {
            self.audio.borrow_mut().resume();
            self.avatar.borrow_mut().nod();
        } else {
            self.audio.borrow_mut().pause();
        }
        self.bus.emit(Event::VisibilityChanged { visible });
    }

    /// The first user interaction unblocks audio playback.
    pub fn user_interacted(&mut self) {
        self.audio.borrow_mut().enable_context();
    }

    /// Flip between the dark and light theme and persist the choice.
    pub fn toggle_theme(&mut self) -> &str {
        self.theme = if self.theme == "dark" {
            "light".to_owned()
        } else {
            "dark".to_owned()
        };
        self.persist();
        &self.theme
    }

    /// Remember a free-form note about the user, fed into the system prompt.
    pub fn set_user_context(&mut self, context: Option<String>) {
        self.user_context = context;
        self.persist();
    }

    /// Transcript rendered as HTML-safe lines for the shell.
    #[must_use]
    pub fn transcript_html(&self) -> Vec<(chat::ChatRole, String)> {
        self.conversation
            .iter()
            .map(|m| (m.role, chat::escape_html(&m.content)))
            .collect()
    }

    /// Point-in-time engine summary for diagnostics overlays.
    #[must_use]
    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let avatar = self.avatar.borrow();
        let audio = self.audio.borrow();
        DebugSnapshot {
            graphics: avatar.graphics_available(),
            rig: avatar.rig_name().map(str::to_owned),
            talking: avatar.is_talking(),
            thinking: self.chat_pending,
            gesture: avatar.active_gesture().map(|g| g.to_string()),
            queue_len: audio.queue_len(),
            playing: audio.is_playing(),
            vu_width: audio.vu_width(),
            price: self.price,
            tps: self.tps,
            transcript_len: self.conversation.len(),
            theme: self.theme.clone(),
            visible: self.visible,
        }
    }

    /// Shared event bus, for shells that want to observe engine events.
    #[must_use]
    pub fn bus(&self) -> Rc<EventBus> {
        Rc::clone(&self.bus)
    }

    #[must_use]
    pub fn conversation(&self) -> &[ChatMessage] {
        &self.conversation
    }

    #[must_use]
    pub fn theme(&self) -> &str {
        &self.theme
    }

    /// Persist the session and tear both engines down.
    pub fn shutdown(&mut self) {
        self.persist();
        self.audio.borrow_mut().destroy();
        self.avatar.borrow_mut().dispose();
        info!("coordinator shut down");
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let state = PersistedState {
            conversation: self.conversation.clone(),
            theme: self.theme.clone(),
            user_context: self.user_context.clone(),
            saved_at: None,
        };
        if let Err(e) = store.save(&state) {
            warn!("cannot persist session: {e}");
        }
    }
}
