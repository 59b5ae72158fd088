//! Front-matter parsing and metadata normalization.
//!
//! A post file is an optional metadata block followed by a markdown body.
//! Two block flavours are recognized:
//!
//! | Fence | Format | Seen in |
//! |-------|--------|---------|
//! | `---` | YAML   | native exports, Jekyll, Ghost, most static generators |
//! | `+++` | TOML   | Hugo |
//!
//! [`normalize`] maps the field spellings used by third-party platforms
//! onto one canonical [`PostMetadata`] record. It returns `None` only when
//! no usable title exists, and it is idempotent: normalizing the JSON form
//! of an already-canonical record returns the same record.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

const SLUG_KEYS: &[&str] = &["slug", "url", "permalink"];
const SUMMARY_KEYS: &[&str] = &["summary", "description", "excerpt"];
const TAG_KEYS: &[&str] = &["tags", "categories"];
const PUBLISHED_KEYS: &[&str] = &["publishedAt", "published_at", "date", "publishDate"];
const CREATED_KEYS: &[&str] = &["createdAt", "created_at", "created"];
const UPDATED_KEYS: &[&str] = &["updatedAt", "updated_at", "lastmod", "modified", "updated"];
const READ_TIME_KEYS: &[&str] = &["readTimeInMinutes", "readingTime", "readTime", "read_time"];

/// Publication state of a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    #[default]
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
        }
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(PostStatus::Draft),
            "published" => Ok(PostStatus::Published),
            other => Err(format!("unknown post status: {}", other)),
        }
    }
}

/// Canonical, dialect-independent post metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMetadata {
    pub title: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default = "default_read_time")]
    pub read_time_in_minutes: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_read_time() -> u32 {
    1
}

/// A post file split into its raw metadata fields and markdown body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub metadata: Map<String, Value>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Fence {
    Yaml,
    Toml,
}

/// Split a leading metadata block from the body.
///
/// Never fails: a missing, unterminated, or malformed block yields empty
/// metadata and the full text as body.
pub fn parse(raw: &str) -> ParsedDocument {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let fallback = || ParsedDocument {
        metadata: Map::new(),
        body: text.to_string(),
    };

    let Some((fence, block, body)) = split_block(text) else {
        return fallback();
    };
    let parsed = match fence {
        Fence::Yaml => parse_yaml(block),
        Fence::Toml => parse_toml(block),
    };
    match parsed {
        Ok(metadata) => ParsedDocument {
            metadata,
            body: body.to_string(),
        },
        Err(reason) => {
            warn!(%reason, "ignoring malformed front matter");
            fallback()
        }
    }
}

fn split_block(text: &str) -> Option<(Fence, &str, &str)> {
    let first_end = text.find('\n')?;
    let fence = match text[..first_end].trim_end() {
        "---" => Fence::Yaml,
        "+++" => Fence::Toml,
        _ => return None,
    };
    let closers: &[&str] = match fence {
        Fence::Yaml => &["---", "..."],
        Fence::Toml => &["+++"],
    };

    let block_start = first_end + 1;
    let mut offset = block_start;
    while offset <= text.len() {
        let line_end = text[offset..]
            .find('\n')
            .map(|i| offset + i)
            .unwrap_or(text.len());
        let line = text[offset..line_end].trim_end();
        if closers.contains(&line) {
            let block = &text[block_start..offset];
            let rest = if line_end < text.len() {
                &text[line_end + 1..]
            } else {
                ""
            };
            let body = rest
                .strip_prefix("\r\n")
                .or_else(|| rest.strip_prefix('\n'))
                .unwrap_or(rest);
            return Some((fence, block, body));
        }
        if line_end >= text.len() {
            break;
        }
        offset = line_end + 1;
    }
    None
}

fn parse_yaml(block: &str) -> Result<Map<String, Value>, String> {
    if block.trim().is_empty() {
        return Ok(Map::new());
    }
    let value: serde_yaml::Value = serde_yaml::from_str(block).map_err(|e| e.to_string())?;
    let serde_yaml::Value::Mapping(mapping) = value else {
        return Err("front matter is not a mapping".to_string());
    };
    let mut out = Map::new();
    for (key, value) in mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => return Err(format!("unsupported front matter key: {:?}", other)),
        };
        let value = serde_json::to_value(value).map_err(|e| format!("{}: {}", key, e))?;
        out.insert(key, value);
    }
    Ok(out)
}

fn parse_toml(block: &str) -> Result<Map<String, Value>, String> {
    let table: toml::Table = block.parse().map_err(|e: toml::de::Error| e.to_string())?;
    Ok(table
        .into_iter()
        .map(|(k, v)| (k, toml_to_json(v)))
        .collect())
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Map raw front-matter fields onto the canonical record.
pub fn normalize(fields: &Map<String, Value>) -> Option<PostMetadata> {
    let title = fields
        .get("title")
        .and_then(scalar_string)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())?;

    let slug = first(fields, SLUG_KEYS)
        .and_then(scalar_string)
        .map(|raw| slugify(last_path_segment(&raw)))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| slug_or_default(&title));

    let summary = first(fields, SUMMARY_KEYS)
        .and_then(scalar_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Some(PostMetadata {
        slug,
        summary,
        status: status_of(fields),
        published_at: first(fields, PUBLISHED_KEYS).and_then(parse_timestamp),
        created_at: first(fields, CREATED_KEYS).and_then(parse_timestamp),
        updated_at: first(fields, UPDATED_KEYS).and_then(parse_timestamp),
        read_time_in_minutes: first(fields, READ_TIME_KEYS)
            .and_then(parse_minutes)
            .unwrap_or(1),
        tags: first(fields, TAG_KEYS).map(tag_list).unwrap_or_default(),
        title,
    })
}

/// Render metadata and body back into a post file with a YAML block.
pub fn stringify(metadata: &PostMetadata, body: &str) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(metadata)?;
    Ok(format!("---\n{}---\n\n{}", yaml, body))
}

/// Canonical slug: lowercase ASCII alphanumerics joined by single hyphens.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_hyphen = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

fn slug_or_default(title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        "post".to_string()
    } else {
        slug
    }
}

fn last_path_segment(raw: &str) -> &str {
    let path = raw.split(['?', '#']).next().unwrap_or(raw);
    path.rsplit('/')
        .find(|segment| !segment.trim().is_empty())
        .unwrap_or(path)
}

fn first<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| fields.get(*k))
        .find(|v| !v.is_null())
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

fn status_of(fields: &Map<String, Value>) -> PostStatus {
    if fields.get("draft").map(truthy).unwrap_or(false) {
        return PostStatus::Draft;
    }
    fields
        .get("status")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

fn tag_list(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(obj) => obj.get("name").and_then(scalar_string),
                other => scalar_string(other),
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut tags: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            tags.push(tag.to_string());
        }
    }
    tags
}

fn parse_minutes(value: &Value) -> Option<u32> {
    let minutes = match value {
        Value::Number(n) => n.as_f64()?.round(),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<f64>().ok()?
        }
        _ => return None,
    };
    if minutes >= 1.0 && minutes <= u32::MAX as f64 {
        Some(minutes as u32)
    } else {
        None
    }
}

/// Accepts RFC 3339, naive date-times (taken as UTC), bare dates, and
/// Unix timestamps in seconds or milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw.abs() >= 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
