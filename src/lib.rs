//! Solmate: real-time animated companion engine.
//!
//! A 3D humanoid avatar listens to a chat transcript, speaks replies through a
//! TTS pipeline, and synchronizes facial and body motion with the spoken
//! content and user presence.
//!
//! # Architecture
//!
//! Three engines compose in dependency order, wired by a typed event bus:
//! - **Avatar controller**: owns the scene, the render loop, the humanoid rig,
//!   and the gesture/expression state machine
//! - **Audio manager**: owns the TTS queue, playback lifecycle, VU analyser,
//!   and the local speech fallback
//! - **App coordinator**: wires user input and the chat transcript into both
//!   engines and manages the app lifecycle
//!
//! All engine state is mutated on a single cooperative task; I/O (chat, TTS,
//! asset and config fetches, the metrics stream) suspends and delivers results
//! between ticks.

pub mod app;
pub mod audio;
pub mod avatar;
pub mod bus;
pub mod config;
pub mod error;

pub use app::AppCoordinator;
pub use audio::{AudioManager, SpeechItem};
pub use audio::sentiment::Sentiment;
pub use avatar::AvatarController;
pub use bus::{Event, EventBus, EventKind};
pub use config::CompanionConfig;
pub use error::{CompanionError, Result};
