//! Markdown note parsing: YAML frontmatter, inline tags, wiki links

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use crate::logging::*;

/// Frontmatter keys mapped to dedicated fields
const KNOWN_KEYS: [&str; 6] = ["title", "tags", "aliases", "created", "modified", "publish"];

/// Date-time layouts tried after RFC 3339
const DATETIME_FORMATS: [&str; 4] =
	["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

/// Date-only layouts, interpreted as midnight UTC
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d-%m-%Y", "%d/%m/%Y"];

struct Patterns {
	frontmatter: Regex,
	wiki_link: Regex,
	inline_tag: Regex,
	code_block: Regex,
	inline_code: Regex,
}

fn patterns() -> Option<&'static Patterns> {
	static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
	PATTERNS
		.get_or_init(|| {
			Some(Patterns {
				frontmatter: Regex::new(r"(?s)\A---\n(.+?)\n---\n?").ok()?,
				wiki_link: Regex::new(r"\[\[([^\]|]+)(?:\|[^\]]+)?\]\]").ok()?,
				inline_tag: Regex::new(r"(?:^|[^&\w])#([a-zA-Z][a-zA-Z0-9_/-]*)").ok()?,
				code_block: Regex::new(r"(?s)```.*?```").ok()?,
				inline_code: Regex::new(r"`[^`]+`").ok()?,
			})
		})
		.as_ref()
}

/// Everything extracted from a note's text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedNote {
	pub title: String,
	pub frontmatter_tags: Vec<String>,
	pub inline_tags: Vec<String>,
	pub aliases: Vec<String>,
	pub created: Option<DateTime<Utc>>,
	pub modified: Option<DateTime<Utc>>,
	pub publish: bool,
	pub extra: Map<String, Value>,
	pub body: String,
	pub links: Vec<String>,
}

/// Parse note text; never fails
///
/// Without a parseable frontmatter mapping the whole text becomes the body.
/// The title falls back to the file stem.
pub fn parse_note(text: &str, rel_path: &str) -> ParsedNote {
	let mut note = ParsedNote { body: text.to_string(), ..Default::default() };

	if let Some((yaml, body_start)) = split_frontmatter(text) {
		match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
			Ok(serde_yaml::Value::Mapping(map)) => {
				apply_frontmatter(&mut note, &map);
				note.body = text[body_start..].to_string();
			}
			Ok(serde_yaml::Value::Null) => {
				note.body = text[body_start..].to_string();
			}
			Ok(_) => {
				debug!(path = %rel_path, "frontmatter is not a mapping, keeping it in the body");
			}
			Err(e) => {
				debug!(path = %rel_path, "malformed frontmatter ignored: {}", e);
			}
		}
	}

	note.links = extract_wiki_links(&note.body);
	note.inline_tags = extract_inline_tags(&note.body);

	if note.title.trim().is_empty() {
		note.title = Path::new(rel_path)
			.file_stem()
			.map(|s| s.to_string_lossy().to_string())
			.unwrap_or_default();
	}

	note
}

/// Locate the frontmatter block; returns the YAML text and where the body starts
fn split_frontmatter(text: &str) -> Option<(&str, usize)> {
	let caps = patterns()?.frontmatter.captures(text)?;
	let whole = caps.get(0)?;
	let yaml = caps.get(1)?;
	Some((yaml.as_str(), whole.end()))
}

fn apply_frontmatter(note: &mut ParsedNote, map: &serde_yaml::Mapping) {
	for (key, value) in map {
		let Some(key) = key.as_str() else {
			continue;
		};
		match key {
			"title" => note.title = scalar_to_string(value).unwrap_or_default(),
			"tags" => note.frontmatter_tags = string_list(value),
			"aliases" => note.aliases = string_list(value),
			"created" => note.created = scalar_to_string(value).and_then(|s| parse_date(&s)),
			"modified" => note.modified = scalar_to_string(value).and_then(|s| parse_date(&s)),
			"publish" => note.publish = value.as_bool().unwrap_or(false),
			_ => {}
		}
		if !KNOWN_KEYS.contains(&key) {
			match serde_json::to_value(value) {
				Ok(json) => {
					note.extra.insert(key.to_string(), json);
				}
				Err(e) => debug!(key = %key, "frontmatter value not representable as JSON: {}", e),
			}
		}
	}
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
	match value {
		serde_yaml::Value::String(s) => Some(s.clone()),
		serde_yaml::Value::Number(n) => Some(n.to_string()),
		serde_yaml::Value::Bool(b) => Some(b.to_string()),
		_ => None,
	}
}

/// A YAML string or sequence of strings, as a list
fn string_list(value: &serde_yaml::Value) -> Vec<String> {
	match value {
		serde_yaml::Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
		serde_yaml::Value::Sequence(items) => items.iter().filter_map(scalar_to_string).collect(),
		_ => Vec::new(),
	}
}

/// Parse the date layouts commonly found in vault frontmatter
///
/// Unparseable values yield `None` rather than an error.
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
	let s = input.trim();
	if s.is_empty() {
		return None;
	}

	if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
		return Some(dt.with_timezone(&Utc));
	}
	for format in DATETIME_FORMATS {
		if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
			return Some(Utc.from_utc_datetime(&naive));
		}
	}
	for format in DATE_FORMATS {
		if let Ok(date) = NaiveDate::parse_from_str(s, format) {
			return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
		}
	}
	if s.len() == 4 {
		if let Ok(year) = s.parse::<i32>() {
			return NaiveDate::from_ymd_opt(year, 1, 1)
				.and_then(|d| d.and_hms_opt(0, 0, 0))
				.map(|naive| Utc.from_utc_datetime(&naive));
		}
	}
	None
}

/// `[[Target]]`, `[[Target|Alias]]`, `[[Target#Heading]]` → `Target`, first-seen order
pub fn extract_wiki_links(body: &str) -> Vec<String> {
	let Some(p) = patterns() else {
		return Vec::new();
	};

	let mut seen = HashSet::new();
	let mut links = Vec::new();
	for caps in p.wiki_link.captures_iter(body) {
		let Some(m) = caps.get(1) else {
			continue;
		};
		let mut link = m.as_str().trim();
		if let Some(idx) = link.find('#') {
			link = link[..idx].trim();
		}
		if !link.is_empty() && seen.insert(link.to_string()) {
			links.push(link.to_string());
		}
	}
	links
}

/// `#tags` outside code, lowercased and deduplicated
pub fn extract_inline_tags(body: &str) -> Vec<String> {
	let Some(p) = patterns() else {
		return Vec::new();
	};

	let without_blocks = p.code_block.replace_all(body, "");
	let clean = p.inline_code.replace_all(&without_blocks, "");

	let mut seen = HashSet::new();
	let mut tags = Vec::new();
	for caps in p.inline_tag.captures_iter(&clean) {
		let Some(m) = caps.get(1) else {
			continue;
		};
		let tag = m.as_str().to_lowercase();
		if seen.insert(tag.clone()) {
			tags.push(tag);
		}
	}
	tags
}

/// Frontmatter tags first, then inline tags; lowercased, `#`-stripped, unique
pub fn merge_tags(frontmatter: &[String], inline: &[String]) -> Vec<String> {
	let mut seen = HashSet::new();
	frontmatter
		.iter()
		.chain(inline.iter())
		.map(|t| t.trim().trim_start_matches('#').to_lowercase())
		.filter(|t| !t.is_empty() && seen.insert(t.clone()))
		.collect()
}


// vim: ts=4
