//! Template engine for dynamic responses.
//!
//! Response bodies are JSON values whose strings may embed `{{...}}` tokens.
//! The template is serialized to JSON text, every token is replaced
//! textually, and the result is parsed back into a JSON value.

use chrono::{Duration, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(.+?)\}\}").expect("token pattern"));

/// A random-data generator bound to a fixed token name.
pub type Generator = fn() -> String;

/// Errors produced while rendering a template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to serialize template: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("substitution produced invalid JSON: {0}")]
    InvalidOutput(#[source] serde_json::Error),
}

/// Request data available to tokens.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    /// Parsed request body
    pub body: &'a Value,
    /// Query parameters
    pub query: &'a HashMap<String, String>,
    /// Path parameters from route matching
    pub params: &'a HashMap<String, String>,
}

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    generators: HashMap<&'static str, Generator>,
}

impl TemplateEngine {
    /// Create a new template engine with the built-in generators.
    pub fn new() -> Self {
        let mut engine = Self {
            generators: HashMap::new(),
        };

        engine.register_generator("$randomId", random_id);
        engine.register_generator("$randomName", random_name);
        engine.register_generator("$randomEmail", random_email);
        engine.register_generator("$randomCity", random_city);
        engine.register_generator("$randomDate", random_date);
        engine.register_generator("$randomImage", random_image);

        engine
    }

    /// Register a generator for an exact token text.
    pub fn register_generator(&mut self, token: &'static str, generator: Generator) {
        self.generators.insert(token, generator);
    }

    /// Render a JSON template, resolving every token.
    pub fn render_json(&self, template: &Value, ctx: &TemplateContext<'_>) -> Result<Value, TemplateError> {
        let text = serde_json::to_string(template).map_err(TemplateError::Serialize)?;

        let rendered = TOKEN.replace_all(&text, |caps: &Captures<'_>| {
            self.resolve(caps[1].trim(), ctx)
                .unwrap_or_else(|| caps[0].to_string())
        });

        serde_json::from_str(&rendered).map_err(TemplateError::InvalidOutput)
    }

    /// Resolve a single token's trimmed content, or `None` to leave it unreplaced.
    pub fn resolve(&self, token: &str, ctx: &TemplateContext<'_>) -> Option<String> {
        if let Some(field) = token.strip_prefix("body.") {
            return lookup_body(ctx.body, field).and_then(substitution_text);
        }
        if let Some(field) = token.strip_prefix("query.") {
            return ctx.query.get(field).filter(|v| !v.is_empty()).cloned();
        }
        if let Some(field) = token.strip_prefix("params.") {
            return ctx.params.get(field).filter(|v| !v.is_empty()).cloned();
        }
        self.generators.get(token).map(|generate| generate())
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk a dotted path (`user.name`) into the request body.
fn lookup_body<'a>(body: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(body, |value, key| value.as_object()?.get(key))
}

/// Text substituted for a body value.
///
/// Falsy scalars, objects and arrays yield `None` and keep the token.
fn substitution_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

// Built-in generators

const FIRST_NAMES: &[&str] = &[
    "Ava", "Liam", "Noah", "Emma", "Olivia", "Mateo", "Yuki", "Amara", "Omar", "Sofia",
    "Lucas", "Priya", "Elena", "Kwame", "Chloe", "Ahmed", "Ines", "Hiro", "Maya", "Diego",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Garcia", "Okafor", "Tanaka", "Muller", "Rossi", "Nguyen", "Kowalski", "Haddad",
    "Silva", "Johansson", "Patel", "Dubois", "Kim", "Novak", "Mensah", "Ivanova", "Clarke",
];

const CITIES: &[&str] = &[
    "Lisbon", "Nairobi", "Osaka", "Toronto", "Valparaiso", "Krakow", "Marrakesh", "Auckland",
    "Bergen", "Cusco", "Tbilisi", "Hanoi", "Montreal", "Seville", "Adelaide", "Accra",
];

const EMAIL_DOMAINS: &[&str] = &["example.com", "example.org", "example.net", "mail.test"];

fn pick(items: &'static [&'static str]) -> &'static str {
    items.choose(&mut rand::thread_rng()).copied().unwrap_or_default()
}

fn random_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn random_name() -> String {
    format!("{} {}", pick(FIRST_NAMES), pick(LAST_NAMES))
}

fn random_email() -> String {
    let number: u16 = rand::thread_rng().gen_range(1..1000);
    format!(
        "{}.{}{}@{}",
        pick(FIRST_NAMES).to_lowercase(),
        pick(LAST_NAMES).to_lowercase(),
        number,
        pick(EMAIL_DOMAINS)
    )
}

fn random_city() -> String {
    pick(CITIES).to_string()
}

/// A timestamp within the last day.
fn random_date() -> String {
    let seconds_ago = rand::thread_rng().gen_range(0..86_400);
    (Utc::now() - Duration::seconds(seconds_ago)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn random_image() -> String {
    let user: u32 = rand::thread_rng().gen_range(1..100_000_000);
    format!("https://avatars.githubusercontent.com/u/{}", user)
}
