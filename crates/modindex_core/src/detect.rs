use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ResolveError;
use crate::host::{RepoEntry, RepositoryApi};

pub const MANIFEST_FILENAME: &str = "manifest.json";
pub const HEADER_DELIMITER: &str = "--- STEAMODDED HEADER";

const STRUCTURED_EXTENSION: &str = "json";
const SCRIPT_EXTENSION: &str = "lua";

/// The three upstream metadata conventions a repository can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaFormat {
    #[serde(rename = "smods")]
    Smods,
    #[serde(rename = "thunderstore")]
    Thunderstore,
    #[serde(rename = "smods-header")]
    SmodsHeader,
}

impl MetaFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Smods => "smods",
            Self::Thunderstore => "thunderstore",
            Self::SmodsHeader => "smods-header",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "smods" => Some(Self::Smods),
            "thunderstore" => Some(Self::Thunderstore),
            "smods-header" => Some(Self::SmodsHeader),
            _ => None,
        }
    }

    /// Declared preference when a repository exposes more than one shape.
    /// Higher wins.
    pub fn priority(self) -> u8 {
        match self {
            Self::Thunderstore => 3,
            Self::Smods => 2,
            Self::SmodsHeader => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMeta {
    pub format: MetaFormat,
    pub fields: Map<String, Value>,
}

impl RemoteMeta {
    pub fn new(format: MetaFormat, fields: Map<String, Value>) -> Self {
        Self { format, fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Structured,
    Script,
}

#[derive(Debug, Clone, Copy)]
enum JsonType {
    String,
    Array,
}

impl JsonType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
        }
    }
}

const SMODS_SCHEMA: &[(&str, JsonType)] = &[
    ("id", JsonType::String),
    ("name", JsonType::String),
    ("author", JsonType::Array),
    ("description", JsonType::String),
    ("prefix", JsonType::String),
    ("main_file", JsonType::String),
];

const THUNDERSTORE_SCHEMA: &[(&str, JsonType)] = &[
    ("name", JsonType::String),
    ("version_number", JsonType::String),
    ("website_url", JsonType::String),
    ("description", JsonType::String),
    ("dependencies", JsonType::Array),
];

#[derive(Debug, Clone, Copy)]
enum HeaderValue {
    Text,
    List,
}

const HEADER_KEYS: &[(&str, &str, HeaderValue)] = &[
    ("MOD_ID", "id", HeaderValue::Text),
    ("MOD_NAME", "name", HeaderValue::Text),
    ("VERSION", "version", HeaderValue::Text),
    ("MOD_DESCRIPTION", "description", HeaderValue::Text),
    ("MOD_AUTHOR", "author", HeaderValue::List),
    ("DEPS", "dependencies", HeaderValue::List),
    ("DEPENDENCIES", "dependencies", HeaderValue::List),
    ("DEPENDS", "dependencies", HeaderValue::List),
    ("CONFLICTS", "conflicts", HeaderValue::List),
];

/// Decide whether a listing entry is worth downloading at all.
pub fn candidate_kind(name: &str, entry_type: &str) -> Option<FileKind> {
    if entry_type != "file" || name.starts_with('.') {
        return None;
    }
    let extension = Path::new(name).extension()?.to_str()?;
    if extension.eq_ignore_ascii_case(STRUCTURED_EXTENSION) {
        return Some(FileKind::Structured);
    }
    if extension.eq_ignore_ascii_case(SCRIPT_EXTENSION) {
        return Some(FileKind::Script);
    }
    None
}

/// Fetch a listing entry and run detection on its content. Entries that are
/// not candidates are skipped without a request.
pub fn detect_entry(
    api: &dyn RepositoryApi,
    entry: &RepoEntry,
    no_pad: bool,
) -> Result<Option<RemoteMeta>, ResolveError> {
    let Some(kind) = candidate_kind(&entry.name, &entry.entry_type) else {
        return Ok(None);
    };
    let Some(url) = entry.download_url.as_deref() else {
        return Ok(None);
    };
    let content = api.fetch_raw(url)?;
    Ok(match kind {
        FileKind::Structured => detect_structured(&entry.name, &content),
        FileKind::Script => parse_header(&content, no_pad),
    })
}

/// Detect by file name alone, for content that is already in memory.
pub fn detect_content(name: &str, content: &str, no_pad: bool) -> Option<RemoteMeta> {
    match candidate_kind(name, "file")? {
        FileKind::Structured => detect_structured(name, content),
        FileKind::Script => parse_header(content, no_pad),
    }
}

pub fn detect_structured(name: &str, content: &str) -> Option<RemoteMeta> {
    let parsed = match parse_relaxed(content) {
        Ok(parsed) => parsed,
        Err(error) => {
            debug!(file = name, %error, "skipping unparsable metadata candidate");
            return None;
        }
    };
    let Value::Object(object) = parsed else {
        return None;
    };

    if satisfies(&object, SMODS_SCHEMA) {
        return Some(RemoteMeta::new(MetaFormat::Smods, object));
    }
    if name == MANIFEST_FILENAME && satisfies(&object, THUNDERSTORE_SCHEMA) {
        return Some(RemoteMeta::new(MetaFormat::Thunderstore, object));
    }
    None
}

/// Parse the `--- KEY: VALUE` comment block at the top of a script.
///
/// With `no_pad` unset the first line must be [`HEADER_DELIMITER`]. With it
/// set, a leading delimiter is skipped when present and otherwise tolerated.
/// Scanning stops at the first line that is not a header line. Header-shaped
/// lines with unknown keys are skipped but do not make a match on their own.
pub fn parse_header(content: &str, no_pad: bool) -> Option<RemoteMeta> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.lines().peekable();

    let starts_with_delimiter = lines
        .peek()
        .is_some_and(|line| line.trim_end() == HEADER_DELIMITER);
    if starts_with_delimiter {
        lines.next();
    } else if !no_pad {
        return None;
    }

    let mut fields = Map::new();
    let mut recognized = 0usize;
    for line in lines {
        let Some((key, value)) = parse_header_line(line) else {
            break;
        };
        let Some((_, target, kind)) = HEADER_KEYS.iter().find(|(name, _, _)| *name == key) else {
            continue;
        };
        recognized += 1;
        let value = match kind {
            HeaderValue::Text => Value::String(value.to_string()),
            HeaderValue::List => Value::Array(parse_header_list(value)),
        };
        fields.insert((*target).to_string(), value);
    }

    if recognized == 0 {
        return None;
    }
    Some(RemoteMeta::new(MetaFormat::SmodsHeader, fields))
}

/// JSON5 superset parse: comments, trailing commas and unquoted keys are fine.
pub fn parse_relaxed(content: &str) -> Result<Value, json5::Error> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    json5::from_str::<Value>(content)
}

fn satisfies(object: &Map<String, Value>, schema: &[(&str, JsonType)]) -> bool {
    schema.iter().all(|(key, expected)| {
        object
            .get(*key)
            .is_some_and(|value| expected.matches(value))
    })
}

fn parse_header_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix("---")?.trim_start();
    let (key, value) = rest.split_once(':')?;
    let key = key.trim_end();
    if key.is_empty() || !key.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return None;
    }
    Some((key, value.trim()))
}

fn parse_header_list(value: &str) -> Vec<Value> {
    let inner = value.strip_prefix('[').unwrap_or(value);
    let inner = inner.strip_suffix(']').unwrap_or(inner);
    inner
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| Value::String(item.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        FileKind, MetaFormat, candidate_kind, detect_content, detect_structured, parse_header,
    };

    const SMODS_JSON: &str = r#"{
        // steamodded json manifest
        "id": "bar",
        "name": "Bar",
        "author": ["someone"],
        "description": "does bar things",
        "prefix": "bar",
        "main_file": "bar.lua",
        "version": "1.2.0",
    }"#;

    const THUNDERSTORE_JSON: &str = r#"{
        "name": "foo-mod",
        "version_number": "2.1.0",
        "website_url": "https://github.com/acme/foo",
        "description": "foo",
        "dependencies": []
    }"#;

    #[test]
    fn candidate_kind_filters_hidden_and_non_files() {
        assert_eq!(candidate_kind("meta.json", "file"), Some(FileKind::Structured));
        assert_eq!(candidate_kind("Main.LUA", "file"), Some(FileKind::Script));
        assert_eq!(candidate_kind(".luarc.json", "file"), None);
        assert_eq!(candidate_kind("assets.json", "dir"), None);
        assert_eq!(candidate_kind("README.md", "file"), None);
        assert_eq!(candidate_kind("Makefile", "file"), None);
    }

    #[test]
    fn relaxed_smods_manifest_is_detected() {
        let meta = detect_structured("bar.json", SMODS_JSON).expect("smods match");
        assert_eq!(meta.format, MetaFormat::Smods);
        assert_eq!(meta.get_str("id"), Some("bar"));
        assert_eq!(meta.get_str("version"), Some("1.2.0"));
    }

    #[test]
    fn smods_manifest_missing_a_required_key_is_not_detected() {
        let missing_prefix = r#"{
            "id": "bar", "name": "Bar", "author": ["a"],
            "description": "d", "main_file": "bar.lua"
        }"#;
        assert!(detect_structured("bar.json", missing_prefix).is_none());

        let author_not_array = r#"{
            "id": "bar", "name": "Bar", "author": "a", "prefix": "bar",
            "description": "d", "main_file": "bar.lua"
        }"#;
        assert!(detect_structured("bar.json", author_not_array).is_none());
    }

    #[test]
    fn thunderstore_requires_exact_manifest_filename() {
        let meta = detect_structured("manifest.json", THUNDERSTORE_JSON).expect("thunderstore");
        assert_eq!(meta.format, MetaFormat::Thunderstore);
        assert_eq!(meta.get_str("version_number"), Some("2.1.0"));

        assert!(detect_structured("thunderstore.json", THUNDERSTORE_JSON).is_none());
        assert!(detect_structured("Manifest.json", THUNDERSTORE_JSON).is_none());
    }

    #[test]
    fn unparsable_or_non_object_json_is_not_a_match() {
        assert!(detect_structured("x.json", "{ not json at all").is_none());
        assert!(detect_structured("x.json", "[1, 2, 3]").is_none());
    }

    #[test]
    fn header_with_delimiter_is_parsed() {
        let content = "--- STEAMODDED HEADER\n--- MOD_ID: bar\n--- VERSION: 1.0\n\nlocal x = 1\n";
        let meta = parse_header(content, false).expect("header");
        assert_eq!(meta.format, MetaFormat::SmodsHeader);
        assert_eq!(meta.get_str("id"), Some("bar"));
        assert_eq!(meta.get_str("version"), Some("1.0"));
    }

    #[test]
    fn header_stops_at_first_non_header_line() {
        let content = "--- STEAMODDED HEADER\n--- MOD_ID: bar\n-- plain comment\n--- VERSION: 9.9\n";
        let meta = parse_header(content, false).expect("header");
        assert_eq!(meta.get_str("id"), Some("bar"));
        assert!(meta.get("version").is_none());
    }

    #[test]
    fn header_requires_delimiter_unless_no_pad() {
        let content = "--- MOD_ID: bar\n--- VERSION: 1.0\n";
        assert!(parse_header(content, false).is_none());
        let meta = parse_header(content, true).expect("no_pad header");
        assert_eq!(meta.get_str("id"), Some("bar"));
    }

    #[test]
    fn header_without_recognized_lines_is_not_a_match() {
        assert!(parse_header("--- STEAMODDED HEADER\nreturn {}\n", false).is_none());
        assert!(parse_header("local mod = {}\n", true).is_none());
    }

    #[test]
    fn header_with_only_unknown_keys_is_not_a_match() {
        let doc_comment = "--- Copyright: 2024 someone\n--- Usage: require 'util'\nlocal x = 1\n";
        assert!(parse_header(doc_comment, true).is_none());

        let delimited = "--- STEAMODDED HEADER\n--- PRIORITY: -10\n";
        assert!(parse_header(delimited, false).is_none());
    }

    #[test]
    fn header_lists_strip_brackets_and_ignore_unknown_keys() {
        let content = concat!(
            "--- STEAMODDED HEADER\n",
            "--- MOD_ID:   bar  \n",
            "--- MOD_AUTHOR: [alice, bob]\n",
            "--- DEPENDENCIES: [Steamodded>=1.0.0~ALPHA, Talisman]\n",
            "--- CONFLICTS: [Other]\n",
            "--- PRIORITY: -10\n",
            "--- BADGE_COLOUR: ff0000\n",
        );
        let meta = parse_header(content, false).expect("header");
        assert_eq!(meta.get_str("id"), Some("bar"));
        assert_eq!(meta.get("author"), Some(&json!(["alice", "bob"])));
        assert_eq!(
            meta.get("dependencies"),
            Some(&json!(["Steamodded>=1.0.0~ALPHA", "Talisman"]))
        );
        assert_eq!(meta.get("conflicts"), Some(&json!(["Other"])));
        assert!(meta.get("PRIORITY").is_none());
        assert_eq!(meta.fields.len(), 4);
    }

    #[test]
    fn header_tolerates_crlf_and_spacing() {
        let content = "--- STEAMODDED HEADER\r\n---MOD_ID : bar\r\n---   VERSION:1.0\r\n";
        let meta = parse_header(content, false).expect("header");
        assert_eq!(meta.get_str("id"), Some("bar"));
        assert_eq!(meta.get_str("version"), Some("1.0"));
    }

    #[test]
    fn detect_content_dispatches_on_extension() {
        let meta = detect_content("main.lua", "--- MOD_ID: bar\n", true).expect("lua");
        assert_eq!(meta.format, MetaFormat::SmodsHeader);
        assert!(detect_content("notes.txt", SMODS_JSON, true).is_none());
    }

    #[test]
    fn format_labels_round_trip() {
        for format in [
            MetaFormat::Smods,
            MetaFormat::Thunderstore,
            MetaFormat::SmodsHeader,
        ] {
            assert_eq!(MetaFormat::parse(format.as_str()), Some(format));
        }
        assert!(MetaFormat::Thunderstore.priority() > MetaFormat::Smods.priority());
        assert!(MetaFormat::Smods.priority() > MetaFormat::SmodsHeader.priority());
    }
}
