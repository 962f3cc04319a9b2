use config::{Config, ConfigError, Environment, File};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use feedrelay_core::{FingerprintRules, LinkExtractor, SourceRef, DEFAULT_LINK_PATTERN};
use feedrelay_pipeline::{DedupConfig, DedupMode, ForwarderConfig};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DedupModeSetting {
    Reconcile,
    Persisted,
}

impl From<DedupModeSetting> for DedupMode {
    fn from(value: DedupModeSetting) -> Self {
        match value {
            DedupModeSetting::Reconcile => DedupMode::Reconcile,
            DedupModeSetting::Persisted => DedupMode::Persisted,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(deserialize_with = "deserialize_list")]
    pub sources: Vec<String>,
    pub destination: String,
    #[serde(deserialize_with = "deserialize_list")]
    pub blacklist: Vec<String>,
    pub dedup_enabled: bool,
    pub dedup_mode: DedupModeSetting,
    pub dedup_prefix_len: usize,
    pub dedup_cache_size: usize,
    pub concurrency: usize,
    pub history_page_size: usize,
    pub state_dir: PathBuf,
    pub spool_dir: PathBuf,
    pub link_pattern: String,
    #[serde(default, with = "humantime_serde")]
    pub lock_stale_after: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub watch_interval: Duration,
}

fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value
                .split(|c| c == ',' || c == ';')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect())
        }

        // A lone numeric channel id arrives already parsed from the environment.
        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_string()])
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_string()])
        }

        fn visit_seq<S>(self, mut seq: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(element) = seq.next_element::<ListElement>()? {
                vec.push(element.0);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

/// List entry that may be written as a string or a bare number.
struct ListElement(String);

impl<'de> Deserialize<'de> for ListElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ElementVisitor;

        impl<'de> Visitor<'de> for ElementVisitor {
            type Value = ListElement;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or an integer")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(ListElement(value.trim().to_string()))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                Ok(ListElement(value.to_string()))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(ListElement(value.to_string()))
            }
        }

        deserializer.deserialize_any(ElementVisitor)
    }
}

impl AppConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("sources", Vec::<String>::new())?
            .set_default("destination", "")?
            .set_default("blacklist", Vec::<String>::new())?
            .set_default("dedup_enabled", true)?
            .set_default("dedup_mode", "reconcile")?
            .set_default("dedup_prefix_len", 50)?
            .set_default("dedup_cache_size", 1_000)?
            .set_default("concurrency", 4)?
            .set_default("history_page_size", 100)?
            .set_default("state_dir", "cache")?
            .set_default("spool_dir", "spool")?
            .set_default("link_pattern", DEFAULT_LINK_PATTERN)?
            .set_default("watch_interval", "5m")?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                // .env files feed the FEEDRELAY_ environment source below.
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        if let Ok(legacy) = std::env::var("CHANNEL_IDENTIFIERS") {
            if !legacy.trim().is_empty() {
                builder = builder.set_default("sources", legacy)?;
            }
        }
        if let Ok(legacy) = std::env::var("DESTINATION_CHANNEL") {
            if !legacy.trim().is_empty() {
                builder = builder.set_default("destination", legacy.trim())?;
            }
        }

        builder = builder.add_source(Environment::with_prefix("FEEDRELAY").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    /// Validates the raw settings into the pipeline's immutable config.
    pub fn forwarder_config(&self) -> Result<ForwarderConfig, ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Message("no sources configured".into()));
        }
        if self.destination.trim().is_empty() {
            return Err(ConfigError::Message("no destination configured".into()));
        }
        let sources = self
            .sources
            .iter()
            .map(|raw| parse_reference(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let destination = parse_reference(&self.destination)?;

        let mut cfg = ForwarderConfig::new(sources, destination);
        cfg.blacklist = self.blacklist.clone();
        cfg.dedup = if self.dedup_enabled {
            let links = LinkExtractor::new(&self.link_pattern)
                .map_err(|err| ConfigError::Message(format!("link_pattern: {err}")))?;
            Some(DedupConfig {
                mode: self.dedup_mode.into(),
                cache_size: self.dedup_cache_size,
                rules: FingerprintRules::new(links, self.dedup_prefix_len),
            })
        } else {
            None
        };
        cfg.concurrency = self.concurrency;
        cfg.history_page_size = self.history_page_size;
        cfg.state_dir = self.state_dir.clone();
        cfg.lock_stale_after = self.lock_stale_after;
        cfg.validate()
            .map_err(|err| ConfigError::Message(err.to_string()))?;
        Ok(cfg)
    }
}

fn parse_reference(raw: &str) -> Result<SourceRef, ConfigError> {
    raw.parse::<SourceRef>()
        .map_err(|err| ConfigError::Message(err.to_string()))
}
