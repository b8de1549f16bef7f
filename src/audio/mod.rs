//! Speech audio pipeline.
//!
//! The [`AudioManager`] owns a bounded speech queue and plays one item at a
//! time: classify sentiment, synthesize through the TTS endpoint (with a
//! cache in front), and fall back to a local voice when synthesis fails.
//! Playback boundaries are announced on the event bus so the avatar can open
//! and close its mouth in step.
//!
//! Synthesis runs on spawned tasks; results come back over a channel and are
//! drained on the engine tick, so every state transition happens on the
//! cooperative thread that owns the manager.

pub mod fallback;
pub mod sentiment;
pub mod sink;
pub mod tts;
pub mod vu;

use crate::bus::{Event, EventBus};
use crate::config::CompanionConfig;
use crate::error::Result;
use bytes::Bytes;
use fallback::FallbackSpeech;
use sentiment::{classify, prosody, Sentiment};
use sink::{AudioSink, PcmClip, PlaybackHandle};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tts::{SynthOutcome, TtsClient, TtsRequest};
use uuid::Uuid;
use vu::{VuMeter, FFT_SIZE};

// ── Speech items ────────────────────────────────────────────────────────

/// One utterance moving through the pipeline.
#[derive(Debug, Clone)]
pub struct SpeechItem {
    pub id: Uuid,
    pub text: String,
    pub voice: String,
    pub sentiment: Sentiment,
    /// Speech rate multiplier sent to the synthesizer.
    pub rate: f32,
    /// Pitch multiplier sent to the synthesizer.
    pub pitch: f32,
    /// Per-item volume in `[0, 1]`.
    pub volume: f32,
    pub enqueued_at: Instant,
    /// Extra synthesis attempts this item needed (0 = first try worked).
    pub retries: u32,
}

impl SpeechItem {
    #[must_use]
    pub fn new(
        text: &str,
        voice: &str,
        sentiment: Sentiment,
        rate: f32,
        pitch: f32,
        volume: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.to_owned(),
            voice: voice.to_owned(),
            sentiment,
            rate,
            pitch,
            volume,
            enqueued_at: Instant::now(),
            retries: 0,
        }
    }
}

/// Per-enqueue overrides.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Skip classification and use this sentiment.
    pub sentiment: Option<Sentiment>,
    /// Override the configured voice.
    pub voice: Option<String>,
}

// ── Synthesized-audio cache ─────────────────────────────────────────────

/// Insert-only cache of synthesized audio, keyed by voice, sentiment and a
/// text prefix. Once full it stops accepting entries; nothing is evicted.
struct AudioCache {
    entries: HashMap<String, Bytes>,
    capacity: usize,
}

impl AudioCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<&Bytes> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: String, audio: Bytes) {
        if self.entries.len() >= self.capacity {
            debug!("audio cache full ({} entries), not caching", self.capacity);
            return;
        }
        self.entries.insert(key, audio);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Cache key for a speech item.
fn cache_key(voice: &str, sentiment: Sentiment, text: &str) -> String {
    let prefix: String = text.chars().take(32).collect();
    format!("{voice}:{sentiment}:{prefix}")
}

// ── Manager ─────────────────────────────────────────────────────────────

/// Result of a spawned synthesis task.
struct SynthResult {
    generation: u64,
    item: SpeechItem,
    outcome: Result<SynthOutcome>,
    attempts: u32,
}

enum PlaybackPhase {
    Idle,
    /// Waiting for a synthesis task to deliver its result.
    Synthesizing { item: SpeechItem },
    Playing {
        item: SpeechItem,
        handle: PlaybackHandle,
    },
}

/// Queued, sentiment-aware speech playback.
pub struct AudioManager {
    bus: Rc<EventBus>,
    sink: Box<dyn AudioSink>,
    tts: TtsClient,
    fallback: FallbackSpeech,
    cache: AudioCache,
    vu: VuMeter,

    queue: VecDeque<SpeechItem>,
    queue_capacity: usize,
    phase: PlaybackPhase,

    paused: bool,
    volume: f32,
    rate_scale: f32,
    /// Playback stays gated until the embedder signals a user interaction.
    context_ready: bool,
    /// Bumped on stop/destroy so stale synthesis results are discarded.
    generation: u64,

    voice: String,
    sample_rate: u32,

    results_tx: mpsc::UnboundedSender<SynthResult>,
    results_rx: mpsc::UnboundedReceiver<SynthResult>,
}

impl AudioManager {
    #[must_use]
    pub fn new(
        bus: Rc<EventBus>,
        config: &CompanionConfig,
        client: reqwest::Client,
        sink: Box<dyn AudioSink>,
        fallback: FallbackSpeech,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            bus,
            sink,
            tts: TtsClient::new(client, config.endpoints.tts.clone(), &config.audio),
            fallback,
            cache: AudioCache::new(config.limits.audio_cache_size),
            vu: VuMeter::new(),
            queue: VecDeque::new(),
            queue_capacity: config.limits.max_audio_queue_size,
            phase: PlaybackPhase::Idle,
            paused: false,
            volume: 1.0,
            rate_scale: 1.0,
            context_ready: false,
            generation: 0,
            voice: config.audio.voice.clone(),
            sample_rate: config.audio.sample_rate,
            results_tx,
            results_rx,
        }
    }

    /// Unblock playback after the first user interaction. Idempotent; kicks
    /// the queue if items accumulated while gated.
    pub fn enable_context(&mut self) {
        if self.context_ready {
            return;
        }
        info!("audio context enabled");
        self.context_ready = true;
        if matches!(self.phase, PlaybackPhase::Idle) && !self.paused && !self.queue.is_empty() {
            self.start_next();
        }
    }

    /// Queue text for speech. Empty or whitespace-only text is ignored.
    ///
    /// The item currently being synthesized or played counts toward the
    /// capacity; at the limit the oldest *queued* item is dropped to make
    /// room, keeping speech close to the present conversation.
    pub fn enqueue(&mut self, text: &str, options: EnqueueOptions) {
        if text.trim().is_empty() {
            return;
        }
        let sentiment = options.sentiment.unwrap_or_else(|| classify(text));
        let pros = prosody(sentiment);
        let voice = options.voice.unwrap_or_else(|| self.voice.clone());
        let item = SpeechItem::new(
            text,
            &voice,
            sentiment,
            pros.rate * self.rate_scale,
            pros.pitch,
            self.volume,
        );

        let in_flight = usize::from(!matches!(self.phase, PlaybackPhase::Idle));
        if self.queue.len() + in_flight >= self.queue_capacity {
            if let Some(dropped) = self.queue.pop_front() {
                warn!(
                    "speech queue full ({}), dropping oldest item {}",
                    self.queue_capacity, dropped.id
                );
            }
        }
        debug!("queued speech {} ({sentiment}): {} chars", item.id, text.len());
        self.queue.push_back(item);

        if matches!(self.phase, PlaybackPhase::Idle) && self.context_ready && !self.paused {
            self.start_next();
        }
    }

    /// Advance playback and absorb finished synthesis tasks. Call once per
    /// engine tick with the elapsed seconds.
    pub fn update(&mut self, dt: f32) {
        self.drain_synth_results();

        let finished = if let PlaybackPhase::Playing { handle, .. } = &self.phase {
            handle.tick(dt);
            if self.paused {
                false
            } else {
                self.vu.update(&handle.recent_samples(FFT_SIZE));
                handle.is_finished()
            }
        } else {
            false
        };

        if finished {
            if let PlaybackPhase::Playing { item, .. } =
                std::mem::replace(&mut self.phase, PlaybackPhase::Idle)
            {
                debug!("speech {} finished", item.id);
                self.vu.reset();
                self.bus.emit(Event::PlayEnd(item));
            }
            if !self.paused {
                self.start_next();
            }
        }
    }

    /// Pause the current playback and stop starting new items.
    pub fn pause(&mut self) {
        self.paused = true;
        if let PlaybackPhase::Playing { handle, .. } = &self.phase {
            handle.pause();
        }
    }

    /// Resume playback, kicking the queue if nothing was mid-flight.
    pub fn resume(&mut self) {
        self.paused = false;
        match &self.phase {
            PlaybackPhase::Playing { handle, .. } => handle.resume(),
            PlaybackPhase::Idle if !self.queue.is_empty() => self.start_next(),
            PlaybackPhase::Idle | PlaybackPhase::Synthesizing { .. } => {}
        }
    }

    /// Stop the current item without touching the queue. Idempotent.
    ///
    /// A pending synthesis result for the stopped item is discarded when it
    /// eventually arrives.
    pub fn stop(&mut self) {
        self.generation += 1;
        match std::mem::replace(&mut self.phase, PlaybackPhase::Idle) {
            PlaybackPhase::Playing { item, handle } => {
                handle.stop();
                self.vu.reset();
                self.bus.emit(Event::PlayEnd(item));
            }
            PlaybackPhase::Synthesizing { item } => {
                // `start_next` already announced this item, so close it out
                // even though no audio ever played.
                debug!("discarding in-flight synthesis for {}", item.id);
                self.bus.emit(Event::PlayEnd(item));
            }
            PlaybackPhase::Idle => {}
        }
    }

    /// Stop the current item and drop every queued one.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.stop();
    }

    /// Master volume, clamped to `[0, 1]`. Applies to the live playback too.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let PlaybackPhase::Playing { handle, .. } = &self.phase {
            handle.set_volume(self.volume);
        }
    }

    /// Speech-rate scale for future items, clamped to `[0.5, 2.0]`.
    pub fn set_rate(&mut self, scale: f32) {
        self.rate_scale = scale.clamp(0.5, 2.0);
    }

    /// Tear down: stop playback and drop the queue.
    pub fn destroy(&mut self) {
        self.clear();
    }

    // ── Getters ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn is_playing(&self) -> bool {
        matches!(
            self.phase,
            PlaybackPhase::Playing { .. } | PlaybackPhase::Synthesizing { .. }
        )
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// VU meter width in `[0, 100]` for the shell to display.
    #[must_use]
    pub fn vu_width(&self) -> f32 {
        self.vu.width()
    }

    /// The item currently being synthesized or played.
    #[must_use]
    pub fn current_item(&self) -> Option<&SpeechItem> {
        match &self.phase {
            PlaybackPhase::Playing { item, .. } | PlaybackPhase::Synthesizing { item } => {
                Some(item)
            }
            PlaybackPhase::Idle => None,
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn start_next(&mut self) {
        debug_assert!(matches!(self.phase, PlaybackPhase::Idle));
        let Some(item) = self.queue.pop_front() else {
            self.vu.reset();
            self.bus.emit(Event::QueueEmpty);
            return;
        };
        self.bus.emit(Event::PlayStart(item.clone()));

        let key = cache_key(&item.voice, item.sentiment, &item.text);
        if let Some(audio) = self.cache.get(&key) {
            debug!("cache hit for speech {}", item.id);
            let clip = PcmClip::from_pcm16(audio, self.sample_rate);
            self.begin_playback(item, clip);
            return;
        }

        let tts = self.tts.clone();
        let tx = self.results_tx.clone();
        let generation = self.generation;
        let task_item = item.clone();
        self.phase = PlaybackPhase::Synthesizing { item };
        tokio::spawn(async move {
            let request = TtsRequest {
                text: &task_item.text,
                voice: &task_item.voice,
                rate: task_item.rate,
                pitch: task_item.pitch,
                volume: task_item.volume,
            };
            let (outcome, attempts) = tts.synthesize(&request).await;
            // Receiver gone means the manager was destroyed; nothing to do.
            let _ = tx.send(SynthResult {
                generation,
                item: task_item,
                outcome,
                attempts,
            });
        });
    }

    fn drain_synth_results(&mut self) {
        while let Ok(result) = self.results_rx.try_recv() {
            if result.generation != self.generation {
                debug!("discarding stale synthesis result for {}", result.item.id);
                continue;
            }
            let mut item = result.item;
            item.retries = result.attempts.saturating_sub(1);
            self.phase = PlaybackPhase::Idle;

            match result.outcome {
                Ok(SynthOutcome::Audio(bytes)) => {
                    let key = cache_key(&item.voice, item.sentiment, &item.text);
                    self.cache.insert(key, bytes.clone());
                    let clip = PcmClip::from_pcm16(&bytes, self.sample_rate);
                    self.begin_playback(item, clip);
                }
                Ok(SynthOutcome::UseFallback) => {
                    info!("endpoint requested local speech for {}", item.id);
                    let clip = self.fallback.render(&item, self.sample_rate);
                    self.begin_playback(item, clip);
                }
                Err(e) => {
                    warn!("synthesis failed for {}, using local speech: {e}", item.id);
                    self.bus.emit(Event::Error {
                        context: "tts".to_owned(),
                        message: e.to_string(),
                    });
                    let clip = self.fallback.render(&item, self.sample_rate);
                    self.begin_playback(item, clip);
                }
            }
        }
    }

    fn begin_playback(&mut self, item: SpeechItem, clip: PcmClip) {
        match self.sink.play(clip, self.volume) {
            Ok(handle) => {
                if self.paused {
                    handle.pause();
                }
                self.phase = PlaybackPhase::Playing { item, handle };
            }
            Err(e) => {
                warn!("playback failed for {}: {e}", item.id);
                self.bus.emit(Event::Error {
                    context: "audio".to_owned(),
                    message: e.to_string(),
                });
                self.phase = PlaybackPhase::Idle;
                self.bus.emit(Event::PlayEnd(item));
                if !self.paused {
                    self.start_next();
                }
            }
        }
    }
}
