use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use charla::auth::StaticTokenSource;
use charla::chat::{ChatService, ChatSettings};
use charla::config::ApiConfig;
use charla::entitlement::Plan;
use charla::ledger::UsageLedger;
use charla::local_state::{KeyValueStore, MemoryStore};
use charla::locale::Language;
use charla::providers::HttpChatBackend;
use charla::session::SessionStore;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Streamed body with one frame per delta and the terminal sentinel
#[allow(dead_code)]
pub fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        body.push_str(&format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": delta}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[allow(dead_code)]
pub fn settings(plan: Plan, free_daily_limit: u32) -> ChatSettings {
    ChatSettings {
        model: "venice-uncensored".to_string(),
        character: Some("luna".to_string()),
        stream: true,
        max_message_chars: 4000,
        free_daily_limit,
        plan,
        language: Language::En,
    }
}

/// Service talking to `base_url` with a fixed token and in-memory state
#[allow(dead_code)]
pub fn http_service(base_url: &str, settings: ChatSettings) -> (ChatService, Arc<dyn KeyValueStore>) {
    let state: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let backend = HttpChatBackend::new(&ApiConfig {
        base_url: base_url.to_string(),
        ..ApiConfig::default()
    })
    .expect("failed to build backend");
    let service = ChatService::new(
        settings,
        SessionStore::new(),
        UsageLedger::new(state.clone()),
        Box::new(StaticTokenSource::new("test-token")),
        Box::new(backend),
    );
    (service, state)
}
