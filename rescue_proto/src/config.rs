use std::collections::BTreeMap;

use thiserror::Error;

use crate::codec::{string_bytes_length, write_i32, write_string, ByteReader, ProtoError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no such config key: {0}")]
    NoSuchKey(String),
    #[error("config key {key} has value {value:?}, expected {expected}")]
    BadValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Flat string key/value configuration, wire-encodable so a snapshot can be
/// logged or sent to connecting components.
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: BTreeMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn value(&self, key: &str) -> Result<&str, ConfigError> {
        self.entries
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::NoSuchKey(key.to_string()))
    }

    pub fn get_int(&self, key: &str) -> Result<i64, ConfigError> {
        let value = self.value(key)?;
        value.parse().map_err(|_| ConfigError::BadValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "integer",
        })
    }

    pub fn get_double(&self, key: &str) -> Result<f64, ConfigError> {
        let value = self.value(key)?;
        value.parse().map_err(|_| ConfigError::BadValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "float",
        })
    }

    /// Boolean lookup with a default for missing or unparseable values.
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.entries.get(key) {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" => false,
                _ => default,
            },
            None => default,
        }
    }

    /// Whitespace- or comma-separated list value; empty when the key is
    /// missing.
    pub fn get_array(&self, key: &str) -> Vec<String> {
        match self.entries.get(key) {
            Some(value) => value
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes_length(&self) -> usize {
        let mut total = 4;
        for (key, value) in &self.entries {
            total += string_bytes_length(key);
            total += string_bytes_length(value);
        }
        total
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        write_i32(self.entries.len() as i32, out);
        for (key, value) in &self.entries {
            write_string(key, out);
            write_string(value, out);
        }
    }

    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, ProtoError> {
        let count = reader.read_len()?;
        let mut config = Config::new();
        for _ in 0..count {
            let key = reader.read_string()?;
            let value = reader.read_string()?;
            config.set_value(key, value);
        }
        Ok(config)
    }
}
