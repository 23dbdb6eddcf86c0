//! The registry of HTTP plugins the proxy knows how to run.

use ahash::AHashMap as HashMap;
use serde_json::Value;
use std::{fmt, sync::Arc};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    #[error("no plugin is configured")]
    Empty,

    #[error("unknown http filter: {0}")]
    Unknown(String),

    #[error("invalid config for plugin {plugin}: {reason}")]
    InvalidConfig { plugin: String, reason: String },
}

/// A plugin's validation and ordering rules.
pub trait Plugin: Send + Sync {
    /// Position in the filter chain. Lower values run first.
    fn order(&self) -> i32 {
        0
    }

    fn validate(&self, config: &Value) -> Result<(), String>;
}

#[derive(Clone, Default)]
pub struct Registry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

// === impl Registry ===

impl Registry {
    /// Returns a registry holding every plugin shipped with the proxy.
    pub fn with_builtins() -> Self {
        Self::default()
            .register("debugMode", DebugMode)
            .register("limitReq", LimitReq)
            .register("demo", Demo)
    }

    pub fn register(mut self, name: impl ToString, plugin: impl Plugin + 'static) -> Self {
        self.plugins.insert(name.to_string(), Arc::new(plugin));
        self
    }

    /// Unknown plugins sort last.
    pub fn order(&self, name: &str) -> i32 {
        self.plugins.get(name).map_or(i32::MAX, |p| p.order())
    }

    pub fn validate(&self, name: &str, config: &Value) -> Result<(), PluginError> {
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| PluginError::Unknown(name.to_string()))?;
        plugin
            .validate(config)
            .map_err(|reason| PluginError::InvalidConfig {
                plugin: name.to_string(),
                reason,
            })
    }

    /// Validates a filter set. A set is valid when it names at least one plugin
    /// and every entry is valid.
    pub fn validate_all<'a>(
        &self,
        filters: impl IntoIterator<Item = (&'a String, &'a Value)>,
    ) -> Result<(), PluginError> {
        let mut empty = true;
        for (name, config) in filters {
            empty = false;
            self.validate(name, config)?;
        }
        if empty {
            return Err(PluginError::Empty);
        }
        Ok(())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.plugins.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("Registry").field("plugins", &names).finish()
    }
}

fn as_object<'v>(config: &'v Value) -> Result<&'v serde_json::Map<String, Value>, String> {
    config
        .as_object()
        .ok_or_else(|| "config must be an object".to_string())
}

/// Logs slow requests with their full context.
#[derive(Clone, Copy, Debug)]
struct DebugMode;

impl Plugin for DebugMode {
    fn order(&self) -> i32 {
        -100
    }

    fn validate(&self, config: &Value) -> Result<(), String> {
        let config = as_object(config)?;
        let Some(slow_log) = config.get("slowLog") else {
            return Ok(());
        };
        let threshold = slow_log
            .get("threshold")
            .and_then(Value::as_str)
            .ok_or("slowLog.threshold must be a duration string")?;
        match threshold.strip_suffix('s').map(str::parse::<f64>) {
            Some(Ok(secs)) if secs > 0.0 => Ok(()),
            _ => Err(format!("invalid slowLog.threshold: {threshold:?}")),
        }
    }
}

/// Token-bucket rate limiting.
#[derive(Clone, Copy, Debug)]
struct LimitReq;

impl Plugin for LimitReq {
    fn order(&self) -> i32 {
        10
    }

    fn validate(&self, config: &Value) -> Result<(), String> {
        let config = as_object(config)?;
        match config.get("average").and_then(Value::as_f64) {
            Some(avg) if avg > 0.0 => Ok(()),
            _ => Err("average must be a positive number".to_string()),
        }
    }
}

/// Echoes the configured host name back in a response header.
#[derive(Clone, Copy, Debug)]
struct Demo;

impl Plugin for Demo {
    fn order(&self) -> i32 {
        100
    }

    fn validate(&self, config: &Value) -> Result<(), String> {
        let config = as_object(config)?;
        match config.get("hostName").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => Ok(()),
            _ => Err("hostName is required".to_string()),
        }
    }
}
