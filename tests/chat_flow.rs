//! Coordinator chat flow against mock chat and TTS endpoints.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use solmate::app::chat::ChatRole;
use solmate::app::persist::StateStore;
use solmate::app::AppCoordinator;
use solmate::audio::sink::VirtualSink;
use solmate::avatar::scene::HeadlessScene;
use solmate::config::CompanionConfig;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_backend() -> MockServer {
    let server = MockServer::start().await;
    // The system prompt rides inside `messages` as the leading line.
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_string_contains(r#""role":"system""#))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "content": "Understood." })),
        )
        .mount(&server)
        .await;
    // Speech goes through the local fallback so tests never wait on audio.
    Mock::given(method("POST"))
        .and(path("/tts"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-TTS-Fallback", "browser")
                .set_body_bytes(Vec::new()),
        )
        .mount(&server)
        .await;
    server
}

fn test_config(server: &MockServer, avatar_source: String) -> CompanionConfig {
    let mut config = CompanionConfig::default();
    config.system_prompt = "You are a companion.".to_owned();
    config.endpoints.chat = format!("{}/chat", server.uri());
    config.endpoints.tts = format!("{}/tts", server.uri());
    config.limits.max_conversation_size = 4;
    config.avatar.sources = vec![avatar_source];
    config
}

fn coordinator(config: CompanionConfig, store: Option<StateStore>) -> AppCoordinator {
    AppCoordinator::new(
        config,
        Box::new(HeadlessScene::new()),
        Box::new(VirtualSink::new()),
        Vec::new(),
        store,
    )
}

/// Tick until the newest transcript line is an assistant reply.
async fn pump_until_reply(app: &mut AppCoordinator) {
    for _ in 0..1_000 {
        if app
            .conversation()
            .last()
            .is_some_and(|m| m.role == ChatRole::Assistant)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        app.tick(0.016);
    }
    panic!("no assistant reply arrived in time");
}

#[tokio::test]
async fn transcript_is_bounded_to_the_newest_pairs() {
    let server = mock_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("none.glb").display().to_string();

    let mut app = coordinator(test_config(&server, missing), None);
    app.start().await;

    for i in 0..3 {
        app.submit_chat(&format!("question {i}")).unwrap();
        pump_until_reply(&mut app).await;
    }

    let convo = app.conversation();
    assert_eq!(convo.len(), 4, "bounded at the configured size");
    assert_eq!(convo[0].role, ChatRole::User);
    assert_eq!(convo[0].content, "question 1");
    assert_eq!(convo[1].role, ChatRole::Assistant);
    assert_eq!(convo[2].content, "question 2");
}

#[tokio::test]
async fn session_survives_a_restart() {
    let server = mock_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("none.glb").display().to_string();
    let state_path = dir.path().join("state.json");

    let mut app = coordinator(
        test_config(&server, missing.clone()),
        Some(StateStore::at(state_path.clone())),
    );
    app.start().await;
    app.submit_chat("remember this").unwrap();
    pump_until_reply(&mut app).await;
    app.toggle_theme();
    app.shutdown();

    let mut restored = coordinator(
        test_config(&server, missing),
        Some(StateStore::at(state_path)),
    );
    restored.start().await;

    assert_eq!(restored.conversation().len(), 2);
    assert_eq!(restored.conversation()[0].content, "remember this");
    assert_eq!(restored.theme(), "light");
}

#[tokio::test]
async fn chat_failure_speaks_the_apology() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-TTS-Fallback", "browser")
                .set_body_bytes(Vec::new()),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("none.glb").display().to_string();
    let mut app = coordinator(test_config(&server, missing), None);
    app.start().await;

    use solmate::bus::{Event, EventKind};
    use std::cell::RefCell;
    use std::rc::Rc;
    let spoken = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&spoken);
    app.bus().on(EventKind::PlayStart, move |event| {
        if let Event::PlayStart(item) = event {
            sink.borrow_mut().push(item.text.clone());
        }
        Ok(())
    });

    app.submit_chat("are you there?").unwrap();
    for _ in 0..1_000 {
        if spoken.borrow().iter().any(|t: &String| t.contains("trouble")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        app.tick(0.016);
    }

    // The failed turn leaves only the user line in the transcript.
    assert_eq!(app.conversation().len(), 1);
    assert!(
        spoken.borrow().iter().any(|t| t.contains("trouble")),
        "apology line queued for speech"
    );
}
