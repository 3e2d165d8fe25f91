use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default number of units a strategy returns
pub const DEFAULT_TOP_K: usize = 5;

/// Flat key-value parameters read by strategies at construction time.
///
/// Keys may be spelled in camelCase or snake_case. Typed getters fall back
/// to the caller's default when a key is missing or has the wrong type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyConfig(Map<String, Value>);

impl StrategyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0
            .get(key)
            .or_else(|| self.0.get(&to_snake_case(key)))
            .or_else(|| self.0.get(&to_camel_case(key)))
    }

    pub fn top_k(&self) -> usize {
        self.usize_or("topK", DEFAULT_TOP_K).max(1)
    }

    pub fn f32_or(&self, key: &str, default: f32) -> f32 {
        self.get(key)
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(default)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> usize {
        self.get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    pub fn optional_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(Value::as_str).map(str::to_string)
    }

    pub fn usize_list_or(&self, key: &str, default: &[usize]) -> Vec<usize> {
        let parsed: Option<Vec<usize>> = self.get(key).and_then(Value::as_array).and_then(|items| {
            items
                .iter()
                .map(|v| v.as_u64().map(|n| n as usize))
                .collect()
        });

        match parsed {
            Some(list) if !list.is_empty() => list,
            _ => default.to_vec(),
        }
    }
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
