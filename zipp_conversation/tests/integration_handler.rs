//! End-to-end tests for the conversation handler.
//!
//! These tests verify that:
//! - Replies come back before the turn is recorded, and drained turns carry token counts
//! - Requests for one conversation are serialized and see earlier turns
//! - Failures turn into sentinel replies and leave memory untouched

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use zipp_conversation::{
    ConversationHandler, HandlerConfig, INTERNAL_ERROR_REPLY, IncomingMessage, NO_RESPONSE_REPLY,
    OptionError, PromptAssembler, PromptConfig,
};
use zipp_core::{
    GenerationError, GenerationOptions, MemoryKind, Message, Role, RoleLabels, TextGenerator,
};
use zipp_memory::MemoryRegistry;

const ECHO_OPTIONS: &[(&str, &str)] = &[("temperature", "Temperature value")];

/// Answers "structured: <message>" after an optional delay.
#[derive(Default)]
struct EchoGenerator {
    delay: Duration,
    fixed_reply: Option<String>,
    failure: Mutex<Option<GenerationError>>,
    fail_counts: bool,
    panic_counts: bool,
    count_delay: Duration,
    prompts: Mutex<Vec<String>>,
    options: Mutex<Vec<GenerationOptions>>,
}

impl EchoGenerator {
    fn delayed(millis: u64) -> Self {
        Self {
            delay: Duration::from_millis(millis),
            ..Self::default()
        }
    }

    fn replying(reply: &str) -> Self {
        Self {
            fixed_reply: Some(reply.to_string()),
            ..Self::default()
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    fn last_options(&self) -> GenerationOptions {
        self.options
            .lock()
            .expect("options lock")
            .last()
            .cloned()
            .expect("generate was never called")
    }
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        self.options
            .lock()
            .expect("options lock")
            .push(options.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(e) = self.failure.lock().expect("failure lock").clone() {
            return Err(e);
        }
        if let Some(reply) = &self.fixed_reply {
            return Ok(reply.clone());
        }

        let last = prompt
            .rsplit_once("User: ")
            .map_or("", |(_, rest)| rest.trim_end_matches("\nZipp: "));
        Ok(format!("structured: {last}"))
    }

    async fn count_tokens(&self, text: &str) -> Result<u32, GenerationError> {
        assert!(!self.panic_counts, "tokenizer crashed");
        if !self.count_delay.is_zero() {
            tokio::time::sleep(self.count_delay).await;
        }
        if self.fail_counts {
            return Err(GenerationError::Busy(503));
        }
        Ok(u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX))
    }

    fn default_sampling(&self) -> Map<String, Value> {
        let mut sampling = Map::new();
        sampling.insert("temperature".to_string(), json!(0.7));
        sampling
    }

    fn sampling_options(&self) -> &[(&'static str, &'static str)] {
        ECHO_OPTIONS
    }
}

fn handler(generator: &Arc<EchoGenerator>, kind: MemoryKind) -> Arc<ConversationHandler> {
    let registry = Arc::new(MemoryRegistry::new(kind.factory()));
    let assembler = PromptAssembler::new(PromptConfig::new(RoleLabels::new("User", "Zipp")));
    let generator: Arc<dyn TextGenerator> = Arc::clone(generator) as Arc<dyn TextGenerator>;
    Arc::new(ConversationHandler::new(generator, registry, assembler))
}

async fn log_of(handler: &ConversationHandler, id: i64) -> Vec<Message> {
    let guard = handler.registry().resolve(&id.to_string()).await;
    let memory = guard.lock().await;
    memory.log().to_vec()
}

#[tokio::test]
async fn test_reply_then_recorded_turn() {
    let generator = Arc::new(EchoGenerator::default());
    let handler = handler(&generator, MemoryKind::Basic);

    let reply = handler
        .respond(&IncomingMessage::new("test", "alice", 245))
        .await;
    assert_eq!(reply.as_deref(), Some("structured: test"));

    handler.drain().await;
    let log = log_of(&handler, 245).await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].role, Role::User);
    assert_eq!(log[0].content, "test");
    assert_eq!(log[1].role, Role::Assistant);
    assert_eq!(log[1].content, "structured: test");
    assert!(log.iter().all(|m| m.tokens > 0));
}

#[tokio::test]
async fn test_same_conversation_sees_previous_turn() {
    let generator = Arc::new(EchoGenerator::delayed(50));
    let handler = handler(&generator, MemoryKind::Basic);

    let first = IncomingMessage::new("test", "alice", 1);
    let second = IncomingMessage::new("again", "alice", 1);
    let (a, b) = tokio::join!(handler.respond(&first), handler.respond(&second));
    assert_eq!(a.as_deref(), Some("structured: test"));
    assert_eq!(b.as_deref(), Some("structured: again"));

    handler.drain().await;
    let contents: Vec<String> = log_of(&handler, 1)
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(
        contents,
        vec!["test", "structured: test", "again", "structured: again"]
    );

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("structured: test"));
    assert!(prompts[1].contains("User: test\nZipp: structured: test\nUser: again"));
}

#[tokio::test]
async fn test_conversations_do_not_share_history() {
    let generator = Arc::new(EchoGenerator::delayed(20));
    let handler = handler(&generator, MemoryKind::Basic);

    let first = IncomingMessage::new("one", "alice", 245);
    let second = IncomingMessage::new("two", "bob", 14_793_028_534_287_569);
    let (a, b) = tokio::join!(handler.respond(&first), handler.respond(&second));
    assert_eq!(a.as_deref(), Some("structured: one"));
    assert_eq!(b.as_deref(), Some("structured: two"));

    handler.drain().await;
    assert_eq!(handler.registry().len().await, 2);
    assert_eq!(log_of(&handler, 245).await.len(), 2);
    assert_eq!(log_of(&handler, 14_793_028_534_287_569).await.len(), 2);
    assert!(generator.prompts().iter().all(|p| !p.contains("structured")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_messages_across_conversations() {
    let generator = Arc::new(EchoGenerator::delayed(5));
    let handler = handler(&generator, MemoryKind::Basic);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..30_i64 {
        let handler = Arc::clone(&handler);
        tasks.spawn(async move {
            let message = IncomingMessage::new(format!("m{i}"), "user", i % 3);
            handler.respond(&message).await
        });
    }
    while let Some(result) = tasks.join_next().await {
        let reply = result.expect("respond task panicked");
        assert!(reply.is_some_and(|r| r.starts_with("structured: m")));
    }

    handler.drain().await;
    for id in 0..3 {
        let log = log_of(&handler, id).await;
        assert_eq!(log.len(), 20);
        for pair in log.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].content, format!("structured: {}", pair[0].content));
            assert!(pair.iter().all(|m| m.tokens > 0));
        }
    }
}

#[tokio::test]
async fn test_whitespace_reply_is_replaced() {
    for raw in [" ", "\t", "\r\n", ""] {
        let generator = Arc::new(EchoGenerator::replying(raw));
        let handler = handler(&generator, MemoryKind::Basic);

        let reply = handler
            .respond(&IncomingMessage::new("hello", "alice", 3))
            .await;
        assert_eq!(reply.as_deref(), Some(NO_RESPONSE_REPLY));

        handler.drain().await;
        let log = log_of(&handler, 3).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].content, raw);
    }
}

#[tokio::test]
async fn test_uncounted_history_is_internal_error() {
    let generator = Arc::new(EchoGenerator::default());
    let handler = handler(&generator, MemoryKind::Basic);

    {
        let guard = handler.registry().resolve("7").await;
        guard
            .lock()
            .await
            .add_log(Message::new(Role::User, "pending"));
    }

    let reply = handler
        .respond(&IncomingMessage::new("hello", "alice", 7))
        .await;
    assert_eq!(reply.as_deref(), Some(INTERNAL_ERROR_REPLY));

    handler.drain().await;
    assert_eq!(log_of(&handler, 7).await.len(), 1);
    assert!(generator.prompts().is_empty());
}

#[tokio::test]
async fn test_backend_failure_is_reported_and_not_recorded() {
    let generator = Arc::new(EchoGenerator::default());
    *generator.failure.lock().expect("failure lock") =
        Some(GenerationError::Transport("boom".to_string()));
    let handler = handler(&generator, MemoryKind::Basic);

    let reply = handler
        .respond(&IncomingMessage::new("hello", "alice", 9))
        .await
        .expect("error replies are not suppressed");
    assert!(reply.starts_with('['));
    assert!(reply.contains("boom"));

    handler.drain().await;
    assert!(log_of(&handler, 9).await.is_empty());

    // the lock was released, so the conversation keeps working
    *generator.failure.lock().expect("failure lock") = None;
    let reply = handler
        .respond(&IncomingMessage::new("hello", "alice", 9))
        .await;
    assert_eq!(reply.as_deref(), Some("structured: hello"));
}

#[tokio::test]
async fn test_busy_backend_reply() {
    let generator = Arc::new(EchoGenerator::default());
    *generator.failure.lock().expect("failure lock") = Some(GenerationError::Busy(503));
    let handler = handler(&generator, MemoryKind::Basic);

    let reply = handler
        .respond(&IncomingMessage::new("hello", "alice", 9))
        .await;
    assert_eq!(
        reply.as_deref(),
        Some("[Error 503. The server is likely busy]")
    );
}

#[tokio::test]
async fn test_suppressed_errors_send_nothing() {
    let generator = Arc::new(EchoGenerator::default());
    *generator.failure.lock().expect("failure lock") =
        Some(GenerationError::Transport("boom".to_string()));
    let registry = Arc::new(MemoryRegistry::new(MemoryKind::Basic.factory()));
    let generator_dyn: Arc<dyn TextGenerator> = Arc::clone(&generator) as Arc<dyn TextGenerator>;
    let handler = ConversationHandler::new(
        generator_dyn,
        registry,
        PromptAssembler::new(PromptConfig::default()),
    )
    .with_config(HandlerConfig {
        suppress_errors: true,
    });

    let reply = handler
        .respond(&IncomingMessage::new("hello", "alice", 1))
        .await;
    assert_eq!(reply, None);
}

#[tokio::test]
async fn test_failed_token_count_falls_back_to_estimate() {
    let generator = Arc::new(EchoGenerator {
        fail_counts: true,
        ..EchoGenerator::default()
    });
    let handler = handler(&generator, MemoryKind::Basic);

    let reply = handler
        .respond(&IncomingMessage::new("hello", "alice", 4))
        .await;
    assert_eq!(reply.as_deref(), Some("structured: hello"));

    handler.drain().await;
    let log = log_of(&handler, 4).await;
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|m| m.tokens > 0));
}

#[tokio::test]
async fn test_generation_options_pass_through() {
    let generator = Arc::new(EchoGenerator::default());
    let handler = handler(&generator, MemoryKind::Basic);

    handler
        .set_option(5, "temperature", json!(0.1))
        .await
        .expect("known option");
    assert_eq!(
        handler.set_option(5, "warp", json!(9)).await,
        Err(OptionError::Unknown("warp".to_string()))
    );

    handler
        .respond(&IncomingMessage::new("hello", "alice", 5))
        .await;
    let options = generator.last_options();
    assert_eq!(options.max_length, 512);
    assert_eq!(options.stop_sequences, vec!["User:".to_string()]);
    assert_eq!(options.sampling["temperature"], json!(0.1));

    // other conversations keep the defaults
    assert_eq!(handler.default_options()["temperature"], json!(0.7));
    assert_eq!(handler.active_options(6).await["temperature"], json!(0.7));
    handler
        .respond(&IncomingMessage::new("hello", "bob", 6))
        .await;
    assert_eq!(generator.last_options().sampling["temperature"], json!(0.7));
}

#[tokio::test]
async fn test_no_memory_records_nothing() {
    let generator = Arc::new(EchoGenerator::default());
    let handler = handler(&generator, MemoryKind::None);

    for text in ["first", "second"] {
        let reply = handler
            .respond(&IncomingMessage::new(text, "alice", 2))
            .await;
        assert_eq!(reply, Some(format!("structured: {text}")));
    }

    handler.drain().await;
    assert!(log_of(&handler, 2).await.is_empty());
    assert!(generator.prompts().iter().all(|p| !p.contains("first\nZipp: structured")));
}

#[tokio::test]
async fn test_reset_forgets_history() {
    let generator = Arc::new(EchoGenerator::default());
    let handler = handler(&generator, MemoryKind::Basic);

    handler
        .respond(&IncomingMessage::new("remember me", "alice", 8))
        .await;
    handler.drain().await;
    assert_eq!(log_of(&handler, 8).await.len(), 2);

    assert!(handler.reset(8).await);
    assert!(log_of(&handler, 8).await.is_empty());

    handler
        .respond(&IncomingMessage::new("hello", "alice", 8))
        .await;
    let prompts = generator.prompts();
    assert!(!prompts[1].contains("remember me"));
}

#[tokio::test]
async fn test_reply_returns_before_counts_are_recorded() {
    let generator = Arc::new(EchoGenerator {
        count_delay: Duration::from_millis(400),
        ..EchoGenerator::default()
    });
    let handler = handler(&generator, MemoryKind::Basic);

    let started = Instant::now();
    let reply = handler
        .respond(&IncomingMessage::new("test", "alice", 11))
        .await;
    let first_elapsed = started.elapsed();
    assert_eq!(reply.as_deref(), Some("structured: test"));
    assert!(
        first_elapsed < Duration::from_millis(200),
        "reply waited for token counts: {first_elapsed:?}"
    );

    // the next request on this conversation waits for the counts
    let reply = handler
        .respond(&IncomingMessage::new("again", "alice", 11))
        .await;
    let second_elapsed = started.elapsed();
    assert_eq!(reply.as_deref(), Some("structured: again"));
    assert!(
        second_elapsed >= Duration::from_millis(350),
        "second request did not wait for recording: {second_elapsed:?}"
    );
    assert!(generator.prompts()[1].contains("Zipp: structured: test"));

    handler.drain().await;
    let log = log_of(&handler, 11).await;
    assert_eq!(log.len(), 4);
    assert!(log.iter().all(|m| m.tokens > 0));
}

#[tokio::test]
async fn test_other_conversations_do_not_wait_for_recording() {
    let generator = Arc::new(EchoGenerator {
        count_delay: Duration::from_millis(400),
        ..EchoGenerator::default()
    });
    let handler = handler(&generator, MemoryKind::Basic);

    handler
        .respond(&IncomingMessage::new("slow", "alice", 12))
        .await;
    let started = Instant::now();
    let reply = handler
        .respond(&IncomingMessage::new("fast", "bob", 13))
        .await;
    assert_eq!(reply.as_deref(), Some("structured: fast"));
    assert!(started.elapsed() < Duration::from_millis(200));
    handler.drain().await;
}

#[tokio::test]
async fn test_panicking_recording_is_drained_and_releases_lock() {
    let generator = Arc::new(EchoGenerator {
        panic_counts: true,
        ..EchoGenerator::default()
    });
    let handler = handler(&generator, MemoryKind::Basic);

    let reply = handler
        .respond(&IncomingMessage::new("hello", "alice", 14))
        .await;
    assert_eq!(reply.as_deref(), Some("structured: hello"));

    // drain surfaces the panic in the log instead of propagating it
    handler.drain().await;

    // the lock is free again; the uncounted turn is reported as an internal error
    let reply = tokio::time::timeout(
        Duration::from_secs(5),
        handler.respond(&IncomingMessage::new("again", "alice", 14)),
    )
    .await
    .expect("conversation stayed locked after a panic");
    assert_eq!(reply.as_deref(), Some(INTERNAL_ERROR_REPLY));
}

#[tokio::test]
async fn test_sampling_options_survive_restart() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("state").join("options.json");

    let generator = Arc::new(EchoGenerator::default());
    let before = handler(&generator, MemoryKind::Basic);
    before
        .set_option(-100_245, "temperature", json!(0.2))
        .await
        .expect("known option");
    before
        .save_options_to(&path)
        .await
        .expect("Failed to save options");

    let after = handler(&generator, MemoryKind::Basic);
    assert_eq!(after.load_options_from(&path).await, 1);
    assert_eq!(after.active_options(-100_245).await["temperature"], json!(0.2));
    assert_eq!(after.active_options(1).await["temperature"], json!(0.7));

    after
        .respond(&IncomingMessage::new("hello", "alice", -100_245))
        .await;
    assert_eq!(generator.last_options().sampling["temperature"], json!(0.2));
}

#[tokio::test]
async fn test_unreadable_options_file_keeps_defaults() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let missing = dir.path().join("missing.json");
    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, "[1, 2").expect("Failed to write corrupt file");

    let generator = Arc::new(EchoGenerator::default());
    let handler = handler(&generator, MemoryKind::Basic);
    handler
        .set_option(3, "temperature", json!(0.1))
        .await
        .expect("known option");

    assert_eq!(handler.load_options_from(&missing).await, 0);
    assert_eq!(handler.load_options_from(&corrupt).await, 0);
    assert_eq!(handler.active_options(3).await["temperature"], json!(0.7));
}
