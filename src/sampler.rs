// ABOUTME: JSON-Schema argument generation for tool calls, deterministic and seeded-random
// ABOUTME: Includes the Mulberry32 PRNG so a seed plus schema always replays identically
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

/// Small word pools used to synthesise plausible string arguments
const NOUNS: &[&str] = &["report", "widget", "document", "server", "query", "session"];
const VERBS: &[&str] = &["create", "update", "search", "inspect", "merge", "export"];
const ADJECTIVES: &[&str] = &["quick", "stale", "primary", "remote", "batch", "hidden"];
const PHRASES: &[&str] = &[
    "status of the build",
    "latest deploy notes",
    "open issues by label",
    "weekly usage totals",
];

const ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Mulberry32 pseudo-random number generator
///
/// 32-bit state, bit-exact with the reference algorithm. Every random
/// choice in argument generation routes through this so a run seed
/// reproduces the exact same workload.
#[derive(Debug, Clone)]
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    /// Create a generator from a seed; a zero seed derives one from the clock
    #[must_use]
    pub fn new(seed: u32) -> Self {
        let mut rng = Self { state: 0 };
        rng.set_seed(seed);
        rng
    }

    /// Reset the generator state; a zero seed derives one from the clock
    pub fn set_seed(&mut self, seed: u32) {
        self.state = if seed == 0 {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0x9E37_79B9);
            nanos | 1
        } else {
            seed
        };
    }

    /// Advance the state and return a value in `[0, 1)`
    pub fn next_f01(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut z = self.state;
        z = (z ^ (z >> 15)).wrapping_mul(z | 1);
        z ^= z.wrapping_add((z ^ (z >> 7)).wrapping_mul(z | 61));
        f64::from(z ^ (z >> 14)) / 4_294_967_296.0
    }

    /// Uniform integer in `[low, high]` inclusive
    pub fn next_range(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        let span = (high - low + 1) as f64;
        low + (self.next_f01() * span) as i64
    }

    /// Pick one element of a non-empty slice
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        let idx = (self.next_f01() * items.len() as f64) as usize;
        &items[idx.min(items.len() - 1)]
    }
}

/// Generator for tool-call arguments driven by JSON-Schema input descriptors
#[derive(Debug, Clone)]
pub struct SchemaSampler {
    rng: Mulberry32,
    min_string_len: usize,
}

impl SchemaSampler {
    /// Create a sampler with the given seed (zero derives one from the clock)
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self {
            rng: Mulberry32::new(seed),
            min_string_len: 0,
        }
    }

    /// Reseed the underlying PRNG
    pub fn set_seed(&mut self, seed: u32) {
        self.rng.set_seed(seed);
    }

    /// Minimum length for randomly generated strings
    #[must_use]
    pub const fn with_min_string_len(mut self, len: usize) -> Self {
        self.min_string_len = len;
        self
    }

    /// Deterministic argument object for a tool-input schema
    ///
    /// Only required properties are populated; the same schema always
    /// produces the identical object.
    #[must_use]
    pub fn generate_args(schema: &Value) -> Value {
        let mut out = Map::new();
        for (name, prop) in required_properties(schema) {
            out.insert(name.to_owned(), Self::deterministic_value(prop));
        }
        Value::Object(out)
    }

    fn deterministic_value(prop: &Value) -> Value {
        if let Some(options) = prop.get("enum").and_then(Value::as_array) {
            return options.first().cloned().unwrap_or(Value::Null);
        }

        match prop.get("type").and_then(Value::as_str).unwrap_or("string") {
            "string" => Value::String(Self::deterministic_string(prop)),
            "integer" => Value::from(midpoint(prop)),
            "number" => Value::from(midpoint(prop)),
            "boolean" => Value::Bool(true),
            "array" => {
                let item = prop
                    .get("items")
                    .map_or(Value::String("test".to_owned()), Self::deterministic_value);
                Value::Array(vec![item])
            }
            "object" => Self::generate_args(prop),
            _ => Value::String("test".to_owned()),
        }
    }

    fn deterministic_string(prop: &Value) -> String {
        match prop.get("format").and_then(Value::as_str) {
            Some("uri" | "url") => return "https://example.com".to_owned(),
            Some("email") => return "test@example.com".to_owned(),
            Some("date") => return "2025-01-01".to_owned(),
            Some("date-time") => return "2025-01-01T00:00:00Z".to_owned(),
            _ => {}
        }

        let mut value = "test".to_owned();
        if let Some(min_len) = prop.get("minLength").and_then(Value::as_u64) {
            while value.len() < min_len as usize {
                value.push('x');
            }
        }
        value
    }

    /// Randomised argument object for a tool-input schema
    ///
    /// Same shape rules as [`generate_args`](Self::generate_args), but every
    /// leaf draws from the seeded PRNG.
    pub fn generate_random_args(&mut self, schema: &Value) -> Value {
        let mut out = Map::new();
        let props: Vec<(String, Value)> = required_properties(schema)
            .map(|(name, prop)| (name.to_owned(), prop.clone()))
            .collect();
        for (name, prop) in props {
            let value = self.random_value(&name, &prop);
            out.insert(name, value);
        }
        Value::Object(out)
    }

    fn random_value(&mut self, name: &str, prop: &Value) -> Value {
        if let Some(options) = prop.get("enum").and_then(Value::as_array) {
            if options.is_empty() {
                return Value::Null;
            }
            return self.rng.pick(options).clone();
        }

        match prop.get("type").and_then(Value::as_str).unwrap_or("string") {
            "string" => Value::String(self.random_string(name, prop)),
            "integer" => {
                let low = prop.get("minimum").and_then(Value::as_i64).unwrap_or(0);
                let high = prop
                    .get("maximum")
                    .and_then(Value::as_i64)
                    .unwrap_or(low + 100);
                Value::from(self.rng.next_range(low, high))
            }
            "number" => {
                let low = prop.get("minimum").and_then(Value::as_f64).unwrap_or(0.0);
                let high = prop
                    .get("maximum")
                    .and_then(Value::as_f64)
                    .unwrap_or(low + 100.0);
                Value::from(low + self.rng.next_f01() * (high - low))
            }
            "boolean" => Value::Bool(self.rng.next_f01() < 0.5),
            "array" => {
                let len = self.rng.next_range(1, 3) as usize;
                let item_schema = prop.get("items").cloned();
                let items: Vec<Value> = (0..len)
                    .map(|_| match &item_schema {
                        Some(schema) => self.random_value(name, schema),
                        None => Value::String(self.random_string(name, &Value::Null)),
                    })
                    .collect();
                Value::Array(items)
            }
            "object" => self.generate_random_args(prop),
            _ => Value::String(self.random_string(name, prop)),
        }
    }

    fn random_string(&mut self, name: &str, prop: &Value) -> String {
        match prop.get("format").and_then(Value::as_str) {
            Some("uri" | "url") => return "https://example.com".to_owned(),
            Some("email") => return "test@example.com".to_owned(),
            Some("date") => return "2025-01-01".to_owned(),
            Some("date-time") => return "2025-01-01T00:00:00Z".to_owned(),
            _ => {}
        }

        if looks_like_id(name) {
            return self.random_id();
        }

        let word_count = self.rng.next_range(1, 4) as usize;
        let mut parts = Vec::with_capacity(word_count);
        for _ in 0..word_count {
            let pool = *self.rng.pick(&[NOUNS, VERBS, ADJECTIVES, PHRASES]);
            parts.push((*self.rng.pick(pool)).to_owned());
        }
        let mut value = parts.join(" ");

        let min_len = prop
            .get("minLength")
            .and_then(Value::as_u64)
            .map_or(self.min_string_len, |m| m as usize);
        while value.len() < min_len {
            value.push('x');
        }
        value
    }

    /// Lowercase-alphanumeric identifier of 8 to 23 characters
    fn random_id(&mut self) -> String {
        let len = self.rng.next_range(8, 23) as usize;
        (0..len)
            .map(|_| *self.rng.pick(ID_CHARS) as char)
            .collect()
    }
}

/// Iterate the required properties of an object schema, in declaration order
fn required_properties<'a>(schema: &'a Value) -> impl Iterator<Item = (&'a str, &'a Value)> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let props = schema.get("properties").and_then(Value::as_object);

    required.into_iter().filter_map(move |name| {
        props
            .and_then(|p| p.get(name))
            .map(|prop| (name, prop))
    })
}

/// Midpoint of `(minimum, minimum + 100)`, rounded down
fn midpoint(prop: &Value) -> i64 {
    let low = prop.get("minimum").and_then(Value::as_i64).unwrap_or(0);
    low + 50
}

/// True when a property name denotes an identifier
fn looks_like_id(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "id" || lower.ends_with("_id") || lower.ends_with("id")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(props: Value, required: &[&str]) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": props,
            "required": required,
        })
    }

    #[test]
    fn prng_is_deterministic_for_any_seed() {
        for seed in [1u32, 42, 0xDEAD_BEEF] {
            let mut a = Mulberry32::new(seed);
            let mut b = Mulberry32::new(seed);
            for _ in 0..100 {
                assert!((a.next_f01() - b.next_f01()).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn prng_outputs_stay_in_unit_interval() {
        let mut rng = Mulberry32::new(7);
        for _ in 0..1000 {
            let x = rng.next_f01();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn zero_seed_derives_nonzero_state() {
        let mut rng = Mulberry32::new(0);
        // Not asserting the value, only that the generator runs
        let _ = rng.next_f01();
    }

    #[test]
    fn deterministic_args_are_idempotent() {
        let schema = schema(
            serde_json::json!({
                "title": {"type": "string", "minLength": 8},
                "count": {"type": "integer", "minimum": 10},
                "flag": {"type": "boolean"},
                "mode": {"type": "string", "enum": ["fast", "slow"]},
                "tags": {"type": "array", "items": {"type": "string"}},
            }),
            &["title", "count", "flag", "mode", "tags"],
        );

        let first = SchemaSampler::generate_args(&schema);
        let second = SchemaSampler::generate_args(&schema);
        assert_eq!(first, second);

        assert_eq!(first["title"], "testxxxx");
        assert_eq!(first["count"], 60);
        assert_eq!(first["flag"], true);
        assert_eq!(first["mode"], "fast");
        assert_eq!(first["tags"], serde_json::json!(["test"]));
    }

    #[test]
    fn deterministic_args_skip_optional_properties() {
        let schema = schema(
            serde_json::json!({
                "needed": {"type": "string"},
                "extra": {"type": "string"},
            }),
            &["needed"],
        );
        let args = SchemaSampler::generate_args(&schema);
        assert!(args.get("needed").is_some());
        assert!(args.get("extra").is_none());
    }

    #[test]
    fn format_aware_string_defaults() {
        let schema = schema(
            serde_json::json!({
                "homepage": {"type": "string", "format": "uri"},
                "contact": {"type": "string", "format": "email"},
                "day": {"type": "string", "format": "date"},
                "stamp": {"type": "string", "format": "date-time"},
            }),
            &["homepage", "contact", "day", "stamp"],
        );
        let args = SchemaSampler::generate_args(&schema);
        assert_eq!(args["homepage"], "https://example.com");
        assert_eq!(args["contact"], "test@example.com");
        assert_eq!(args["day"], "2025-01-01");
        assert_eq!(args["stamp"], "2025-01-01T00:00:00Z");
    }

    #[test]
    fn nested_objects_recurse_on_required() {
        let schema = schema(
            serde_json::json!({
                "filter": {
                    "type": "object",
                    "properties": {
                        "field": {"type": "string"},
                        "optional": {"type": "string"},
                    },
                    "required": ["field"],
                },
            }),
            &["filter"],
        );
        let args = SchemaSampler::generate_args(&schema);
        assert_eq!(args["filter"]["field"], "test");
        assert!(args["filter"].get("optional").is_none());
    }

    #[test]
    fn random_enum_draws_vary_but_replay_with_seed() {
        let schema = schema(
            serde_json::json!({
                "lang": {"type": "string", "enum": ["a", "b", "c", "d", "e", "f"]},
            }),
            &["lang"],
        );

        let mut sampler = SchemaSampler::new(42);
        let first: Vec<Value> = (0..20)
            .map(|_| sampler.generate_random_args(&schema)["lang"].clone())
            .collect();

        let distinct: std::collections::HashSet<String> = first
            .iter()
            .filter_map(|v| v.as_str().map(ToOwned::to_owned))
            .collect();
        assert!(distinct.len() >= 2, "expected spread, got {distinct:?}");

        let mut replay = SchemaSampler::new(42);
        let second: Vec<Value> = (0..20)
            .map(|_| replay.generate_random_args(&schema)["lang"].clone())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn random_numbers_respect_bounds() {
        let schema = schema(
            serde_json::json!({
                "n": {"type": "integer", "minimum": 5, "maximum": 9},
                "x": {"type": "number", "minimum": 0.5, "maximum": 1.5},
            }),
            &["n", "x"],
        );
        let mut sampler = SchemaSampler::new(9);
        for _ in 0..50 {
            let args = sampler.generate_random_args(&schema);
            let n = args["n"].as_i64().expect("integer");
            assert!((5..=9).contains(&n));
            let x = args["x"].as_f64().expect("number");
            assert!((0.5..=1.5).contains(&x));
        }
    }

    #[test]
    fn random_ids_are_lowercase_alphanumeric() {
        let schema = schema(
            serde_json::json!({"user_id": {"type": "string"}}),
            &["user_id"],
        );
        let mut sampler = SchemaSampler::new(3);
        for _ in 0..20 {
            let args = sampler.generate_random_args(&schema);
            let id = args["user_id"].as_str().expect("string");
            assert!((8..=23).contains(&id.len()), "bad length: {id}");
            assert!(id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn random_arrays_have_one_to_three_items() {
        let schema = schema(
            serde_json::json!({
                "tags": {"type": "array", "items": {"type": "string"}},
            }),
            &["tags"],
        );
        let mut sampler = SchemaSampler::new(11);
        for _ in 0..30 {
            let args = sampler.generate_random_args(&schema);
            let len = args["tags"].as_array().expect("array").len();
            assert!((1..=3).contains(&len));
        }
    }
}
