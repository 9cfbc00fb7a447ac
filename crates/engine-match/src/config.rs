//! Match file loading and saving.
//!
//! A match file is JSON:
//!
//! ```json
//! {
//!     "engines": [
//!         { "name": "Alpha", "path": "/engines/alpha", "options": { "Hash": 64 }, "results": "+1 =1" },
//!         { "path": "/engines/beta", "args": ["--uci"], "results": "-0 =0" }
//!     ],
//!     "movetime": 3000,
//!     "book": "openings.pgn",
//!     "outpgn": "games.pgn"
//! }
//! ```
//!
//! Loading is lenient: a field of the wrong type falls back to its default,
//! except an engine `path`, which is required. Fields this crate does not
//! know about are kept and written back on save.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Think time per move when the file does not give a usable one.
pub const DEFAULT_MOVETIME: u64 = 3000;

/// Errors that can occur when loading or saving a match file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read or write the file.
    #[error("Failed to access match file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON, or not a JSON object.
    #[error("Failed to parse match file: {0}")]
    Parse(#[from] serde_json::Error),
    /// The top level of the file is not an object.
    #[error("Match file must contain a JSON object")]
    NotAnObject,
    /// An engine entry is not an object.
    #[error("Engine {0} is not an object")]
    BadEngine(usize),
    /// An engine entry has no string `path`.
    #[error("Bad path in engine {0} options")]
    MissingPath(usize),
}

/// One engine entry of a match file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// UCI options sent at the start of every game, in key order.
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Space-separated result tokens, see [`crate::pairing`].
    #[serde(default)]
    pub results: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EngineConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            path: path.into(),
            args: Vec::new(),
            options: Map::new(),
            results: String::new(),
            extra: Map::new(),
        }
    }

    /// The configured name, or the executable's file name.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string()),
        }
    }
}

/// Renders an option value the way `setoption` expects it: strings bare,
/// everything else as JSON text.
pub fn option_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A whole match file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MatchConfig {
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
    #[serde(default = "default_movetime")]
    pub movetime: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outpgn: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_movetime() -> u64 {
    DEFAULT_MOVETIME
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            engines: Vec::new(),
            movetime: DEFAULT_MOVETIME,
            book: None,
            outpgn: None,
            extra: Map::new(),
        }
    }
}

impl MatchConfig {
    /// Reads and validates a match file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, and the
    /// parse/validation variants for malformed content.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let mut value: Value = serde_json::from_str(content)?;
        normalize(&mut value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Writes the file as tab-indented JSON, replacing the old file only once
    /// the new content is fully on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        buf.push(b'\n');

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Wipes every engine's results log.
    pub fn clear_results(&mut self) {
        for engine in &mut self.engines {
            engine.results.clear();
        }
    }
}

fn normalize(value: &mut Value) -> Result<(), ConfigError> {
    let config = value.as_object_mut().ok_or(ConfigError::NotAnObject)?;

    if !config.get("engines").is_some_and(Value::is_array) {
        config.insert("engines".into(), json!([]));
    }
    if let Some(Value::Array(engines)) = config.get_mut("engines") {
        for (index, engine) in engines.iter_mut().enumerate() {
            normalize_engine(index, engine)?;
        }
    }

    let movetime = config
        .get("movetime")
        .and_then(Value::as_f64)
        .filter(|ms| *ms >= 1.0)
        .map(|ms| ms.round() as u64)
        .unwrap_or(DEFAULT_MOVETIME);
    config.insert("movetime".into(), json!(movetime));

    for key in ["book", "outpgn"] {
        if config.get(key).is_some_and(|v| !v.is_string()) {
            config.remove(key);
        }
    }
    Ok(())
}

fn normalize_engine(index: usize, engine: &mut Value) -> Result<(), ConfigError> {
    let engine = engine
        .as_object_mut()
        .ok_or(ConfigError::BadEngine(index))?;

    if !engine.get("path").is_some_and(Value::is_string) {
        return Err(ConfigError::MissingPath(index));
    }
    if engine.get("name").is_some_and(|v| !v.is_string()) {
        engine.remove("name");
    }

    let args_ok = engine
        .get("args")
        .and_then(Value::as_array)
        .is_some_and(|args| args.iter().all(Value::is_string));
    if !args_ok {
        engine.insert("args".into(), json!([]));
    }
    if !engine.get("options").is_some_and(Value::is_object) {
        engine.insert("options".into(), json!({}));
    }
    if !engine.get("results").is_some_and(Value::is_string) {
        engine.insert("results".into(), json!(""));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_applied() {
        let config =
            MatchConfig::from_json_str(r#"{"engines": [{"path": "/e/alpha"}, {"path": "beta"}]}"#)
                .unwrap();
        assert_eq!(config.movetime, 3000);
        assert_eq!(config.engines.len(), 2);
        let alpha = &config.engines[0];
        assert!(alpha.args.is_empty());
        assert!(alpha.options.is_empty());
        assert_eq!(alpha.results, "");
        assert_eq!(alpha.display_name(), "alpha");
        assert!(config.book.is_none());
        assert!(config.outpgn.is_none());
    }

    #[test]
    fn test_wrong_types_fall_back() {
        let config = MatchConfig::from_json_str(
            r#"{
                "engines": [{"name": 5, "path": "x", "args": "nope", "options": [], "results": 3}],
                "movetime": "fast",
                "book": 12
            }"#,
        )
        .unwrap();
        let engine = &config.engines[0];
        assert_eq!(engine.name, None);
        assert!(engine.args.is_empty());
        assert!(engine.options.is_empty());
        assert_eq!(engine.results, "");
        assert_eq!(config.movetime, DEFAULT_MOVETIME);
        assert_eq!(config.book, None);
    }

    #[test]
    fn test_non_positive_movetime_uses_default() {
        let zero = MatchConfig::from_json_str(r#"{"movetime": 0}"#).unwrap();
        assert_eq!(zero.movetime, DEFAULT_MOVETIME);
        let negative = MatchConfig::from_json_str(r#"{"movetime": -5}"#).unwrap();
        assert_eq!(negative.movetime, DEFAULT_MOVETIME);
        let set = MatchConfig::from_json_str(r#"{"movetime": 250}"#).unwrap();
        assert_eq!(set.movetime, 250);
    }

    #[test]
    fn test_missing_engines_is_empty() {
        let config = MatchConfig::from_json_str(r#"{"engines": "none"}"#).unwrap();
        assert!(config.engines.is_empty());
    }

    #[test]
    fn test_missing_path_is_error() {
        let err = MatchConfig::from_json_str(r#"{"engines": [{"path": "a"}, {"name": "b"}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingPath(1)));
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(matches!(
            MatchConfig::from_json_str("{engines"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            MatchConfig::from_json_str("[1, 2]"),
            Err(ConfigError::NotAnObject)
        ));
    }

    #[test]
    fn test_option_value_rendering() {
        assert_eq!(option_value(&json!("Skill Level")), "Skill Level");
        assert_eq!(option_value(&json!(64)), "64");
        assert_eq!(option_value(&json!(true)), "true");
    }

    #[test]
    fn test_save_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("match.json");
        fs::write(
            &path,
            r#"{"engines": [{"path": "a", "colour": "red"}], "title": "Final", "movetime": 100}"#,
        )
        .unwrap();

        let mut config = MatchConfig::load(&path).unwrap();
        config.engines[0].results = "+1".to_string();
        config.save(&path).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["title"], "Final");
        assert_eq!(raw["engines"][0]["colour"], "red");
        assert_eq!(raw["engines"][0]["results"], "+1");
        assert_eq!(raw["movetime"], 100);
        assert!(!dir.path().join("match.json.tmp").exists());
    }

    #[test]
    fn test_clear_results() {
        let mut config =
            MatchConfig::from_json_str(r#"{"engines": [{"path": "a", "results": "+1 =1"}]}"#)
                .unwrap();
        config.clear_results();
        assert_eq!(config.engines[0].results, "");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            MatchConfig::load(dir.path().join("absent.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
