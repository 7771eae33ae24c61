use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub download_dir: PathBuf,
    pub request_timeout: Duration,
    pub insecure_ssl: bool,
    pub ephemeral: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = lookup("PROMPT_STUDIO_BIND").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let data_dir = lookup("PROMPT_STUDIO_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));
        let download_dir = lookup("PROMPT_STUDIO_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./downloads"));
        // Local models can take minutes on a cold start.
        let timeout_secs = lookup("PROMPT_STUDIO_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);
        let insecure_ssl = lookup("PROMPT_STUDIO_INSECURE_SSL").as_deref() == Some("1");
        let ephemeral = lookup("PROMPT_STUDIO_EPHEMERAL").as_deref() == Some("1");

        Self {
            bind_addr,
            data_dir,
            download_dir,
            request_timeout: Duration::from_secs(timeout_secs),
            insecure_ssl,
            ephemeral,
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.state_file(), PathBuf::from("./data/state.json"));
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert!(!config.insecure_ssl);
        assert!(!config.ephemeral);
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let vars: HashMap<&str, &str> = [
            ("PROMPT_STUDIO_BIND", "127.0.0.1:9000"),
            ("PROMPT_STUDIO_DOWNLOAD_DIR", "/tmp/pics"),
            ("PROMPT_STUDIO_TIMEOUT_SECS", "soon"),
            ("PROMPT_STUDIO_INSECURE_SSL", "1"),
            ("PROMPT_STUDIO_EPHEMERAL", "0"),
        ]
        .into_iter()
        .collect();
        let config = AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.download_dir, PathBuf::from("/tmp/pics"));
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert!(config.insecure_ssl);
        assert!(!config.ephemeral);
    }
}
