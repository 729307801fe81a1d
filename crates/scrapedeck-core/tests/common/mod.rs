#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use scrapedeck_core::auth::{CredentialStore, MemoryCredentialStore, Navigator};
use scrapedeck_core::{Config, Console};
use serde_json::{json, Value};
use wiremock::MockServer;

/// Navigator that remembers every redirect.
#[derive(Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        self.visits.lock().unwrap().push(path.to_string());
    }
}

pub struct Harness {
    pub console: Console,
    pub credentials: Arc<MemoryCredentialStore>,
    pub navigator: Arc<RecordingNavigator>,
}

pub fn config_for(server: &MockServer) -> Config {
    let mut config = Config::with_base_url(format!("{}/api", server.uri()));
    config.initial_backoff_ms = 10;
    config.timeout_secs = 5;
    config
}

pub fn harness(server: &MockServer, token: Option<&str>) -> Harness {
    let credentials = Arc::new(match token {
        Some(token) => MemoryCredentialStore::with_token(token),
        None => MemoryCredentialStore::default(),
    });
    let navigator = Arc::new(RecordingNavigator::default());
    let console = Console::new(
        &config_for(server),
        credentials.clone() as Arc<dyn CredentialStore>,
        navigator.clone() as Arc<dyn Navigator>,
    )
    .expect("console should build");
    Harness {
        console,
        credentials,
        navigator,
    }
}

pub fn admin_user() -> Value {
    json!({"id": 1, "username": "admin", "role": "admin"})
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
