//! Compiler configuration: dialect, application data and enum hooks.
use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::{EnumCache, EnumItem, EnumProvider, EnumRequest};

const DEFAULT_ENUM_TIMEOUT: Duration = Duration::from_secs(10);

/// Schema dialect; decides where local definitions live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    Draft4,
    #[default]
    Draft7,
    Draft2019,
}

impl Dialect {
    /// Definitions namespaces searched, in order.
    pub fn definitions_keywords(self) -> &'static [&'static str] {
        match self {
            Dialect::Draft4 | Dialect::Draft7 => &["definitions"],
            Dialect::Draft2019 => &["$defs", "definitions"],
        }
    }
}

pub type EnumRequestHook = Box<dyn FnMut(EnumRequest)>;

pub struct CompilerConfig {
    pub dialect: Dialect,
    pub user_data: Value,
    pub enum_provider: Option<Box<dyn EnumProvider>>,
    pub enum_cache: EnumCache,
    pub enum_requests: Option<EnumRequestHook>,
    pub enum_timeout: Duration,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            user_data: Value::Null,
            enum_provider: None,
            enum_cache: EnumCache::new(),
            enum_requests: None,
            enum_timeout: DEFAULT_ENUM_TIMEOUT,
        }
    }
}

impl fmt::Debug for CompilerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerConfig")
            .field("dialect", &self.dialect)
            .field("user_data", &self.user_data)
            .field("enum_provider", &self.enum_provider.is_some())
            .field("enum_cache", &self.enum_cache)
            .field("enum_requests", &self.enum_requests.is_some())
            .field("enum_timeout", &self.enum_timeout)
            .finish()
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_user_data(mut self, user_data: Value) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn with_enum_provider(mut self, provider: impl EnumProvider + 'static) -> Self {
        self.enum_provider = Some(Box::new(provider));
        self
    }

    pub fn with_enum_cache(mut self, cache: EnumCache) -> Self {
        self.enum_cache = cache;
        self
    }

    pub fn on_enum_request(mut self, hook: impl FnMut(EnumRequest) + 'static) -> Self {
        self.enum_requests = Some(Box::new(hook));
        self
    }

    pub fn with_enum_timeout(mut self, timeout: Duration) -> Self {
        self.enum_timeout = timeout;
        self
    }

    /// Provider first, then settled requests; otherwise raise a request.
    pub(crate) fn lookup_enum(&mut self, name: &str) -> Option<Vec<EnumItem>> {
        if let Some(items) = self.enum_provider.as_ref().and_then(|p| p.items(name)) {
            return Some(items);
        }
        if let Some(items) = self.enum_cache.ready(name) {
            return Some(items);
        }
        if let Some(hook) = self.enum_requests.as_mut() {
            if let Some(request) = self.enum_cache.begin(name, self.enum_timeout) {
                hook(request);
            }
            // the hook may have answered synchronously
            return self.enum_cache.ready(name);
        }
        None
    }
}

/// On-disk form of [`CompilerConfig`], read by the CLI.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub dialect: Dialect,
    #[serde(default)]
    pub user_data: Value,
    #[serde(default)]
    pub enums: IndexMap<String, Vec<EnumItem>>,
    #[serde(default)]
    pub enum_timeout_ms: Option<u64>,
}

impl ConfigFile {
    pub fn into_config(self) -> CompilerConfig {
        let mut config = CompilerConfig::new()
            .with_dialect(self.dialect)
            .with_user_data(self.user_data)
            .with_enum_provider(self.enums);
        if let Some(ms) = self.enum_timeout_ms {
            config = config.with_enum_timeout(Duration::from_millis(ms));
        }
        config
    }
}
