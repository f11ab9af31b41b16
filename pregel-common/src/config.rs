use crate::error::{PregelError, PregelResult};
use std::collections::HashMap;
use std::str::FromStr;

pub const MAX_GSS: &str = "pregel.max_gss";
pub const SUPERSTEP_TIMEOUT_MS: &str = "pregel.superstep_timeout_ms";
pub const MESSAGE_BATCH_SIZE: &str = "pregel.message_batch_size";
pub const MAX_RECOVERY_ATTEMPTS: &str = "pregel.max_recovery_attempts";
pub const STORE_RESULTS: &str = "pregel.store_results";
pub const TRANSPORT_RETRIES: &str = "pregel.transport_retries";

#[derive(Debug, Clone, Default)]
pub struct Configuration {
    config: HashMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self {
            config: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.put(key, value.to_string());
        self
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.config.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.config.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get_string(&self, key: &str, default_value: &str) -> String {
        self.config
            .get(key)
            .cloned()
            .unwrap_or_else(|| default_value.to_string())
    }

    pub fn get_u64(&self, key: &str, default_value: u64) -> PregelResult<u64> {
        self.parse(key, default_value)
    }

    pub fn get_usize(&self, key: &str, default_value: usize) -> PregelResult<usize> {
        self.parse(key, default_value)
    }

    pub fn get_f64(&self, key: &str, default_value: f64) -> PregelResult<f64> {
        self.parse(key, default_value)
    }

    pub fn get_bool(&self, key: &str, default_value: bool) -> PregelResult<bool> {
        self.parse(key, default_value)
    }

    fn parse<T>(&self, key: &str, default_value: T) -> PregelResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.config.get(key) {
            None => Ok(default_value),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| PregelError::Config(format!("{key}={raw}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_fall_back_to_defaults() {
        let config = Configuration::new().with(MAX_GSS, 12);
        assert_eq!(config.get_u64(MAX_GSS, 500).unwrap(), 12);
        assert_eq!(config.get_u64(SUPERSTEP_TIMEOUT_MS, 7).unwrap(), 7);
        assert!(config.get_bool(STORE_RESULTS, true).unwrap());
    }

    #[test]
    fn malformed_value_is_a_config_error() {
        let config = Configuration::new().with(MESSAGE_BATCH_SIZE, "lots");
        let err = config.get_usize(MESSAGE_BATCH_SIZE, 1).unwrap_err();
        assert!(matches!(err, PregelError::Config(_)));
        assert!(err.is_configuration());
    }
}
