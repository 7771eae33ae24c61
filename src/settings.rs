use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use url::Url;

const SETTINGS_KEY: &str = "settings";
const HISTORY_KEY: &str = "history";
pub const HISTORY_LIMIT: usize = 20;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored state is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

// ── Settings value ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    #[default]
    Ollama,
    OpenaiCompatible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub api_url: String,
    pub model_name: String,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:11434".to_string(),
            model_name: "kevin_qwen:latest".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: String::new(),
            model_name: "deepseek-chat".to_string(),
        }
    }
}

/// Query parameters forwarded to the image service, in wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageParams {
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    pub model: String,
    pub nologo: bool,
    pub enhance: bool,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            seed: 100,
            model: "flux".to_string(),
            nologo: true,
            enhance: false,
        }
    }
}

impl ImageParams {
    pub fn to_query(&self) -> String {
        format!(
            "width={}&height={}&seed={}&model={}&nologo={}&enhance={}",
            self.width, self.height, self.seed, self.model, self.nologo, self.enhance
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioParams {
    pub model: String,
    pub voice: String,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            model: "openai-audio".to_string(),
            voice: "nova".to_string(),
        }
    }
}

impl AudioParams {
    pub fn to_query(&self) -> String {
        format!("model={}&voice={}", self.model, self.voice)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub selected_service: Service,
    pub ollama: OllamaSettings,
    pub openai: OpenAiSettings,
    pub image_params: ImageParams,
    pub audio_params: AudioParams,
}

impl Settings {
    pub fn validate(&self) -> Result<(), StoreError> {
        validate_endpoint("ollama.api_url", &self.ollama.api_url)?;
        validate_endpoint("openai.base_url", &self.openai.base_url)?;

        let active_model = match self.selected_service {
            Service::Ollama => &self.ollama.model_name,
            Service::OpenaiCompatible => &self.openai.model_name,
        };
        if active_model.trim().is_empty() {
            return Err(StoreError::Invalid("Model name must not be empty".to_string()));
        }
        if self.image_params.width == 0 || self.image_params.height == 0 {
            return Err(StoreError::Invalid(
                "Image dimensions must be greater than zero".to_string(),
            ));
        }
        validate_query_value("image_params.model", &self.image_params.model)?;
        validate_query_value("audio_params.model", &self.audio_params.model)?;
        validate_query_value("audio_params.voice", &self.audio_params.voice)?;
        Ok(())
    }
}

/// Values spliced raw into a `key=value&...` query must not carry URL syntax.
fn validate_query_value(field: &str, value: &str) -> Result<(), StoreError> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::Invalid(format!(
            "{} may only contain letters, digits, '-', '_', '.' or ':'",
            field
        )))
    }
}

fn validate_endpoint(field: &str, value: &str) -> Result<(), StoreError> {
    let parsed = Url::parse(value)
        .map_err(|_| StoreError::Invalid(format!("{} is not a valid URL", field)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(StoreError::Invalid(format!(
            "{} must use http or https",
            field
        ))),
    }
}

// ── History ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub kind: MediaKind,
    pub prompt: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(kind: MediaKind, prompt: &str, url: &str, text: Option<String>) -> Self {
        let created_at = Utc::now();
        Self {
            id: created_at.timestamp_millis(),
            kind,
            prompt: prompt.to_string(),
            url: url.to_string(),
            text,
            created_at,
        }
    }
}

// ── Persistence ──────────────────────────────────────────────────────────────

/// String key/value persistence injected into [`SettingsStore`].
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// All keys kept in one JSON object on disk, rewritten on every `set`.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "state file is unreadable, starting empty"
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write to a sibling temp file, then rename over the real one.
    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

// ── Typed facade ─────────────────────────────────────────────────────────────

pub struct SettingsStore {
    kv: Arc<dyn KeyValueStore>,
    history_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            history_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    pub fn load_settings(&self) -> Result<Settings, StoreError> {
        let Some(raw) = self.kv.get(SETTINGS_KEY)? else {
            return Ok(Settings::default());
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                tracing::warn!(error = %e, "stored settings are unreadable, using defaults");
                Ok(Settings::default())
            }
        }
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        settings.validate()?;
        self.kv.set(SETTINGS_KEY, serde_json::to_string(settings)?)
    }

    pub fn history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        let Some(raw) = self.kv.get(HISTORY_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(history) => Ok(history),
            Err(e) => {
                tracing::warn!(error = %e, "stored history is unreadable, starting empty");
                Ok(Vec::new())
            }
        }
    }

    /// Prepend `entry`, keeping only the newest [`HISTORY_LIMIT`] items.
    /// Ids stay strictly increasing even when entries share a millisecond.
    pub fn push_history(&self, mut entry: HistoryEntry) -> Result<(), StoreError> {
        let _guard = self.history_lock.lock();
        let mut history = self.history()?;
        if let Some(newest) = history.first() {
            entry.id = entry.id.max(newest.id + 1);
        }
        history.insert(0, entry);
        history.truncate(HISTORY_LIMIT);
        self.kv.set(HISTORY_KEY, serde_json::to_string(&history)?)
    }
}
