use chrono::{Local, TimeZone};
use image::RgbaImage;
use parking_lot::Mutex;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use snapask_lib::ai::openai::OpenAiGateway;
use snapask_lib::ai::{GatewayError, ModelGateway, Tier, NO_DESCRIPTION, NO_RESPONSE};
use snapask_lib::capture::{CaptureError, ScreenSource};
use snapask_lib::config::{ApiKey, AppConfig, ConfigError, MAX_TURNS_LIMIT};
use snapask_lib::session::conversation::{Conversation, LoopState, LoopStateHandle};
use snapask_lib::startup;

const VISION: &str = r#""model":"vision-model""#;
const FAST: &str = r#""model":"fast-model""#;

struct FixedScreen;

impl ScreenSource for FixedScreen {
    fn grab(&self) -> Result<RgbaImage, CaptureError> {
        Ok(RgbaImage::from_pixel(16, 16, image::Rgba([200, 0, 0, 255])))
    }
}

fn completion(text: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            {
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": "stop"
            }
        ]
    })
}

fn red_car() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(completion("a red car on a street"))
}

fn test_config(server: &MockServer, screenshots: &Path) -> AppConfig {
    AppConfig {
        vision_model: "vision-model".to_string(),
        fast_model: "fast-model".to_string(),
        api_base_url: format!("{}/v1", server.uri()),
        request_timeout_secs: 5,
        screenshots_dir: screenshots.to_path_buf(),
        ..AppConfig::default()
    }
}

fn gateway(config: &AppConfig) -> OpenAiGateway {
    let key = ApiKey::resolve(Some("test-key".to_string())).unwrap();
    OpenAiGateway::new(config, key).unwrap()
}

fn conversation(
    config: &AppConfig,
    input: &'static [u8],
) -> Conversation<&'static [u8], Vec<u8>> {
    let state: LoopStateHandle = Arc::new(Mutex::new(LoopState::Idle));
    Conversation::new(
        Arc::new(gateway(config)),
        Box::new(FixedScreen),
        config,
        state,
        input,
        Vec::new(),
    )
}

fn printed(conversation: &Conversation<&'static [u8], Vec<u8>>) -> String {
    String::from_utf8(conversation.output().clone()).unwrap()
}

#[tokio::test]
async fn overlapping_question_is_answered_from_cache() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let screenshots = dir.path().join("screenshots");
    let config = test_config(&server, &screenshots);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains(VISION))
        .and(body_string_contains("data:image/png;base64,"))
        .respond_with(red_car())
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(FAST))
        .and(body_string_contains("a red car on a street"))
        .and(body_string_contains("what color is the car"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("The car is red.")))
        .expect(1)
        .mount(&server)
        .await;

    let mut c = conversation(&config, b"yes\nwhat color is the car\nno\n");
    let fired_at = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    c.run_cycle(fired_at).await.unwrap();

    let saved = screenshots.join("screenshot_2024-01-01_12-00-00.png");
    assert!(saved.exists());
    assert!(image::open(&saved).is_ok());

    let out = printed(&c);
    assert!(out.contains(&format!("saved at {}", saved.display())));
    assert!(out.contains("a red car on a street"));
    assert!(out.contains("The car is red."));
    assert_eq!(c.state(), LoopState::Idle);
}

#[tokio::test]
async fn unrelated_question_reanalyzes_original_image() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, dir.path());

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(VISION))
        .and(body_string_contains("how many birds are visible"))
        .and(body_string_contains("data:image/png;base64,"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("three birds sitting on a wire")),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(VISION))
        .respond_with(red_car())
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(FAST))
        .and(body_string_contains("three birds sitting on a wire"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Three.")))
        .expect(1)
        .mount(&server)
        .await;

    let mut c = conversation(&config, b"yes\nhow many birds are visible\nno\n");
    c.run_cycle(Local::now()).await.unwrap();

    assert!(printed(&c).contains("Three."));
}

#[tokio::test]
async fn follow_up_history_is_capped() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        max_turns: 2,
        ..test_config(&server, dir.path())
    };

    Mock::given(method("POST"))
        .and(body_string_contains(VISION))
        .respond_with(red_car())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains(FAST))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("red")))
        .expect(3)
        .mount(&server)
        .await;

    let mut c = conversation(
        &config,
        b"yes\nfirst car question\nyes\nsecond car question\nyes\nthird car question\nno\n",
    );
    c.run_cycle(Local::now()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let last: serde_json::Value = requests.last().unwrap().body_json().unwrap();
    let messages = last["messages"].as_array().unwrap();
    // system prompt + two remembered turns + the new question
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1]["content"], "second car question");
    assert_eq!(messages[2]["role"], "assistant");
}

#[tokio::test]
async fn missing_content_yields_sentinels() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, dir.path());

    Mock::given(method("POST"))
        .and(body_string_contains(VISION))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "choices": [{ "message": { "role": "assistant" } }] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains(FAST))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let gateway = gateway(&config);
    let analysis = gateway.analyze_image(b"\x89PNG", None).await.unwrap();
    assert_eq!(analysis.description, NO_DESCRIPTION);

    let answer = gateway.answer_text("hello", &[], Tier::Fast).await.unwrap();
    assert_eq!(answer, NO_RESPONSE);
}

#[tokio::test]
async fn error_status_carries_status_and_body() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, dir.path());

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .expect(1)
        .mount(&server)
        .await;

    let err = gateway(&config)
        .answer_text("hello", &[], Tier::Vision)
        .await
        .unwrap_err();
    match err {
        GatewayError::Status { status, body } => {
            assert_eq!(status, 429);
            assert_eq!(body, "rate limited");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn failed_answer_abandons_the_cycle() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, dir.path());

    Mock::given(method("POST"))
        .and(body_string_contains(VISION))
        .respond_with(red_car())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains(FAST))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let mut c = conversation(&config, b"yes\nwhat color is the car\nyes\nand the street\n");
    c.run_cycle(Local::now()).await.unwrap();

    let out = printed(&c);
    assert!(out.contains("upstream down"));
    assert_eq!(out.matches("(yes/no)").count(), 1);
    assert!(!out.contains("Let me know if you need help later"));
    assert_eq!(c.state(), LoopState::Idle);
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        request_timeout_secs: 1,
        ..test_config(&server, dir.path())
    };

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = gateway(&config)
        .answer_text("hello", &[], Tier::Fast)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Transport(_)));
}

#[tokio::test]
async fn missing_credential_fails_before_any_request() {
    let server = MockServer::start().await;
    let config_dir = tempfile::tempdir().unwrap();
    let fresh_dir = config_dir.path().join("fresh");
    let saved = test_config(&server, config_dir.path());
    saved.save(config_dir.path());

    let err = startup(None, config_dir.path()).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::MissingApiKey)
    ));
    let err = startup(Some("   ".to_string()), &fresh_dir).err().unwrap();
    assert!(err.downcast_ref::<ConfigError>().is_some());
    assert!(!fresh_dir.exists());
    assert!(server.received_requests().await.unwrap().is_empty());

    // The same directory with a key wires the gateway to the configured server.
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(1)
        .mount(&server)
        .await;
    let ready = startup(Some("test-key".to_string()), config_dir.path()).unwrap();
    assert_eq!(ready.trigger.chord().to_string(), "Meta+§");
    let answer = ready
        .gateway
        .answer_text("hello", &[], Tier::Fast)
        .await
        .unwrap();
    assert_eq!(answer, "ok");
}

#[tokio::test]
async fn oversized_turn_limit_still_runs_a_cycle() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut saved = test_config(&server, &dir.path().join("screenshots"));
    saved.max_turns = usize::MAX;
    saved.save(dir.path());
    let config = AppConfig::load(dir.path());
    assert_eq!(config.max_turns, MAX_TURNS_LIMIT);

    Mock::given(method("POST"))
        .and(body_string_contains(VISION))
        .respond_with(red_car())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains(FAST))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("red")))
        .expect(1)
        .mount(&server)
        .await;

    let mut c = conversation(&config, b"yes\nwhat color is the car\nno\n");
    c.run_cycle(Local::now()).await.unwrap();

    assert!(printed(&c).contains("red"));
    assert_eq!(c.state(), LoopState::Idle);
}
