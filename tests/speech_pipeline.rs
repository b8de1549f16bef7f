//! End-to-end speech pipeline tests against a mock TTS endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use solmate::audio::fallback::FallbackSpeech;
use solmate::audio::sink::VirtualSink;
use solmate::audio::{AudioManager, EnqueueOptions};
use solmate::bus::{Event, EventBus, EventKind};
use solmate::config::CompanionConfig;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(tts_url: String) -> CompanionConfig {
    let mut config = CompanionConfig::default();
    config.endpoints.tts = tts_url;
    config.audio.tts_retry_backoff_ms = 1;
    config.audio.tts_timeout_secs = 5;
    config
}

fn manager(config: &CompanionConfig, bus: Rc<EventBus>) -> AudioManager {
    AudioManager::new(
        bus,
        config,
        reqwest::Client::new(),
        Box::new(VirtualSink::new()),
        FallbackSpeech::default(),
    )
}

/// 0.1 s of 16-bit PCM at the default sample rate.
fn pcm_body() -> Vec<u8> {
    let samples = 2_400usize;
    let mut bytes = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let v = ((i as f32 * 0.1).sin() * 6_000.0) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Pump the manager until `done` holds or the deadline passes.
async fn pump(manager: &mut AudioManager, mut done: impl FnMut(&AudioManager) -> bool) {
    for _ in 0..1_000 {
        if done(manager) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.update(0.016);
    }
    panic!("pipeline did not reach the expected state in time");
}

#[tokio::test]
async fn endpoint_failure_exhausts_retries_then_speaks_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let bus = Rc::new(EventBus::new());
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    bus.on(EventKind::Error, move |event| {
        if let Event::Error { context, .. } = event {
            sink.borrow_mut().push(context.clone());
        }
        Ok(())
    });

    let config = test_config(format!("{}/tts", server.uri()));
    let mut manager = manager(&config, Rc::clone(&bus));
    manager.enable_context();
    manager.enqueue("hello out there", EnqueueOptions::default());

    // Three failed attempts, then the local fallback starts playing.
    pump(&mut manager, |m| {
        m.current_item().is_some_and(|item| item.retries == 2) && m.vu_width() > 0.0
    })
    .await;

    assert!(errors.borrow().iter().any(|c| c == "tts"));
}

#[tokio::test]
async fn overflow_drops_oldest_and_plays_the_rest_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm_body()))
        .mount(&server)
        .await;

    let bus = Rc::new(EventBus::new());
    let played = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&played);
    bus.on(EventKind::PlayStart, move |event| {
        if let Event::PlayStart(item) = event {
            sink.borrow_mut().push(item.text.clone());
        }
        Ok(())
    });
    let drained = Rc::new(RefCell::new(0u32));
    let counter = Rc::clone(&drained);
    bus.on(EventKind::QueueEmpty, move |_| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    let mut config = test_config(format!("{}/tts", server.uri()));
    config.limits.max_audio_queue_size = 1;
    let mut manager = manager(&config, Rc::clone(&bus));
    manager.enable_context();

    // First item starts immediately; the queue holds one, so the third
    // enqueue evicts the second.
    manager.enqueue("first line", EnqueueOptions::default());
    manager.enqueue("second line", EnqueueOptions::default());
    manager.enqueue("third line", EnqueueOptions::default());
    assert_eq!(manager.queue_len(), 1);

    pump(&mut manager, |m| {
        !m.is_playing() && m.queue_len() == 0 && played.borrow().len() >= 2
    })
    .await;

    assert_eq!(*played.borrow(), vec!["first line", "third line"]);
    assert!(*drained.borrow() >= 1, "queue drain announced");
}

#[tokio::test]
async fn fallback_header_skips_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-TTS-Fallback", "browser")
                .set_body_bytes(Vec::new()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(format!("{}/tts", server.uri()));
    let bus = Rc::new(EventBus::new());
    let mut manager = manager(&config, bus);
    manager.enable_context();
    manager.enqueue("say it locally", EnqueueOptions::default());

    pump(&mut manager, |m| {
        m.current_item().is_some_and(|item| item.retries == 0) && m.vu_width() > 0.0
    })
    .await;
}

#[tokio::test]
async fn second_playback_of_the_same_line_hits_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm_body()))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(format!("{}/tts", server.uri()));
    let bus = Rc::new(EventBus::new());
    let mut manager = manager(&config, bus);
    manager.enable_context();

    manager.enqueue("a memorable line", EnqueueOptions::default());
    pump(&mut manager, |m| !m.is_playing()).await;
    assert_eq!(manager.cache_len(), 1);

    // Same voice, sentiment and text: served from the cache, no second
    // request (the mock would fail its expectation).
    manager.enqueue("a memorable line", EnqueueOptions::default());
    pump(&mut manager, |m| !m.is_playing()).await;
}
