use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::{LazyLock, RwLock};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::user_data::{RegexAccess, ValidationLimits};

fn camel_to_snake_case(input: &str) -> String {
    let mut snake = String::new();
    for (i, ch) in input.char_indices() {
        if i > 0 && ch.is_uppercase() {
            snake.push('_');
        }
        snake.push(ch.to_ascii_lowercase());
    }
    snake
}

fn short_type_name<T>() -> &'static str {
    let name = type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}

#[derive(Debug)]
pub enum ValidationError {
    Bounds,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ValidationError::Bounds => "bounds",
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ValidationError {}

/// One configuration knob. Values resolve with priority cli > env > config
/// file > default; the env key defaults to the SCREAMING_SNAKE type name.
pub trait ConfigValue:
    'static + Send + Sync + Default + Clone + Serialize + DeserializeOwned
{
    const ENV_KEY: Option<&'static str> = None;

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SettingValue<T> {
    default: T,
    config: Option<T>,
    cli: Option<T>,
    env: Option<T>,
}

impl<T: ConfigValue> SettingValue<T> {
    fn new(val: T) -> Self {
        use std::env::var;
        let env_key = T::ENV_KEY
            .map(str::to_owned)
            .unwrap_or_else(|| camel_to_snake_case(short_type_name::<T>()).to_uppercase());
        let env = var(&env_key).ok().and_then(|raw| {
            match serde_plain::from_str(&raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(
                        found = raw,
                        "Found env value {env_key} but could not parse it as {}. {e}",
                        type_name::<T>()
                    );
                    None
                }
            }
        });
        Self {
            default: val,
            config: None,
            cli: None,
            env,
        }
    }

    /// Setting value with respect to its source priority
    fn customized(&self) -> &T {
        self.cli
            .as_ref()
            .or(self.env.as_ref())
            .or(self.config.as_ref())
            .unwrap_or(&self.default)
    }
}

trait AnySettingValue: 'static + Send + Sync {
    fn key(&self) -> String;
    fn customized_value(&self) -> &dyn Any;
    fn cli_mut(&mut self) -> &mut dyn Any;
    fn reset_config_value(&mut self);
    fn deserialize_toml(&mut self, from: toml::Value) -> Result<(), toml::de::Error>;
}

impl<T: ConfigValue> AnySettingValue for SettingValue<T> {
    fn key(&self) -> String {
        camel_to_snake_case(short_type_name::<T>())
    }

    fn customized_value(&self) -> &dyn Any {
        self.customized()
    }

    fn cli_mut(&mut self) -> &mut dyn Any {
        &mut self.cli
    }

    fn reset_config_value(&mut self) {
        self.config = None;
    }

    fn deserialize_toml(&mut self, from: toml::Value) -> Result<(), toml::de::Error> {
        let value = T::deserialize(from)?;
        if value.validate().is_ok() {
            self.config = Some(value);
        }
        Ok(())
    }
}

pub static CONFIG: LazyLock<ConfigStore> = LazyLock::new(ConfigStore::construct);

pub struct ConfigStore {
    settings: RwLock<HashMap<TypeId, Box<dyn AnySettingValue>>>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore").finish()
    }
}

impl ConfigStore {
    pub fn construct() -> Self {
        let store = Self {
            settings: RwLock::new(HashMap::new()),
        };

        store.register_value::<Port>();
        store.register_value::<TmdbKey>();
        store.register_value::<TvdbKey>();
        store.register_value::<TraktKey>();
        store.register_value::<DebridExcludePrivateTrackers>();
        store.register_value::<LibraryCacheTtl>();
        store.register_value::<LibraryStaleThreshold>();
        store.register_value::<ResolveErrorCacheTtl>();
        store.register_value::<PlaybackLinkCacheTtl>();
        store.register_value::<PlaybackLinkValidity>();
        store.register_value::<AvailabilityCacheTtl>();
        store.register_value::<MetadataCacheTtl>();
        store.register_value::<LibraryPageSize>();
        store.register_value::<LibraryPageLimit>();
        store.register_value::<MaxStreamExpressions>();
        store.register_value::<MaxStreamExpressionsTotalCharacters>();
        store.register_value::<MaxKeywordFilters>();
        store.register_value::<RegexFilterAccess>();

        store
    }

    fn register_value<T: ConfigValue>(&self) {
        let setting = SettingValue::new(T::default());
        self.settings
            .write()
            .unwrap()
            .insert(TypeId::of::<T>(), Box::new(setting));
    }

    pub fn get_value<T: ConfigValue>(&self) -> T {
        let settings = self.settings.read().unwrap();
        let setting = settings
            .get(&TypeId::of::<T>())
            .expect("every knob is registered in construct");
        setting
            .customized_value()
            .downcast_ref::<T>()
            .expect("setting type matches its key")
            .clone()
    }

    pub fn set_cli_value<T: ConfigValue>(&self, value: T) {
        let mut settings = self.settings.write().unwrap();
        let setting = settings
            .get_mut(&TypeId::of::<T>())
            .expect("every knob is registered in construct");
        if let Some(slot) = setting.cli_mut().downcast_mut::<Option<T>>() {
            *slot = Some(value);
        }
    }

    /// Apply a toml config file; unknown keys are ignored, unparsable values
    /// keep their previous source.
    pub fn apply_config_file(&self, raw: &str) -> anyhow::Result<()> {
        let table: toml::Table = raw.parse().context("parse config file")?;
        let mut settings = self.settings.write().unwrap();
        for setting in settings.values_mut() {
            setting.reset_config_value();
            if let Some(value) = table.get(&setting.key()) {
                if let Err(e) = setting.deserialize_toml(value.clone()) {
                    tracing::warn!(key = setting.key(), "Config value ignored: {e}");
                }
            }
        }
        Ok(())
    }

    pub async fn load_config_file(&self, path: Option<PathBuf>) -> anyhow::Result<()> {
        let path = match path {
            Some(path) => path,
            None => {
                let Some(dir) = dirs::config_dir() else {
                    return Ok(());
                };
                dir.join("streamgate").join("config.toml")
            }
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                tracing::info!(?path, "Loading config file");
                self.apply_config_file(&raw)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("read config file {path:?}")),
        }
    }

    /// The validation caps handed to user-data ingestion.
    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_stream_expressions: self.get_value::<MaxStreamExpressions>().0,
            max_stream_expressions_total_characters: self
                .get_value::<MaxStreamExpressionsTotalCharacters>()
                .0,
            max_keyword_filters: self.get_value::<MaxKeywordFilters>().0,
            regex_access: self.get_value::<RegexFilterAccess>().0,
        }
    }
}

macro_rules! config_value {
    ($name:ident, $inner:ty, $default:expr $(, env = $env:literal)?) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl Default for $name {
            fn default() -> Self {
                Self($default)
            }
        }

        impl ConfigValue for $name {
            $(const ENV_KEY: Option<&'static str> = Some($env);)?
        }
    };
}

config_value!(Port, u16, 8469);
config_value!(TmdbKey, String, String::new());
config_value!(TvdbKey, String, String::new());
config_value!(TraktKey, String, String::new());
config_value!(
    DebridExcludePrivateTrackers,
    bool,
    false,
    env = "DEBRID_EXCLUDE_PRIVATE_TRACKERS"
);
config_value!(LibraryCacheTtl, u64, 300, env = "LIBRARY_CACHE_TTL");
config_value!(LibraryStaleThreshold, u64, 60, env = "LIBRARY_STALE_THRESHOLD");
config_value!(ResolveErrorCacheTtl, u64, 30, env = "RESOLVE_ERROR_CACHE_TTL");
config_value!(PlaybackLinkCacheTtl, u64, 600, env = "PLAYBACK_LINK_CACHE_TTL");
config_value!(PlaybackLinkValidity, u64, 600, env = "PLAYBACK_LINK_VALIDITY");
config_value!(AvailabilityCacheTtl, u64, 120, env = "AVAILABILITY_CACHE_TTL");
config_value!(MetadataCacheTtl, u64, 3600, env = "METADATA_CACHE_TTL");
config_value!(LibraryPageSize, usize, 500, env = "LIBRARY_PAGE_SIZE");
config_value!(LibraryPageLimit, usize, 20, env = "LIBRARY_PAGE_LIMIT");
config_value!(MaxStreamExpressions, usize, 50, env = "MAX_STREAM_EXPRESSIONS");
config_value!(
    MaxStreamExpressionsTotalCharacters,
    usize,
    10_000,
    env = "MAX_STREAM_EXPRESSIONS_TOTAL_CHARACTERS"
);
config_value!(MaxKeywordFilters, usize, 200, env = "MAX_KEYWORD_FILTERS");
config_value!(
    RegexFilterAccess,
    RegexAccess,
    RegexAccess::All,
    env = "REGEX_FILTER_ACCESS"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let store = ConfigStore::construct();
        assert_eq!(store.get_value::<Port>().0, 8469);
        assert_eq!(store.get_value::<LibraryPageSize>().0, 500);
    }

    #[test]
    fn config_file_overrides_default() {
        let store = ConfigStore::construct();
        store
            .apply_config_file("port = 9000\nlibrary_cache_ttl = 42\n")
            .unwrap();
        assert_eq!(store.get_value::<Port>().0, 9000);
        assert_eq!(store.get_value::<LibraryCacheTtl>().0, 42);
        // untouched knobs keep defaults
        assert_eq!(store.get_value::<LibraryPageLimit>().0, 20);
    }

    #[test]
    fn cli_beats_config_file() {
        let store = ConfigStore::construct();
        store.apply_config_file("port = 9000\n").unwrap();
        store.set_cli_value(Port(9001));
        assert_eq!(store.get_value::<Port>().0, 9001);
    }

    #[test]
    fn unknown_keys_ignored() {
        let store = ConfigStore::construct();
        assert!(store.apply_config_file("who_knows = true\n").is_ok());
    }

    #[test]
    fn snake_case_keys() {
        assert_eq!(camel_to_snake_case("LibraryCacheTtl"), "library_cache_ttl");
        assert_eq!(camel_to_snake_case("Port"), "port");
    }
}
