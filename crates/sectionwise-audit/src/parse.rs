//! Strict parser for audit posts.
//!
//! Each field has an explicit fallback. Whenever one is taken the entry is
//! still returned, with `well_formed` cleared, so the log never hides a post
//! that carries the audit prefix.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::format::unescape_html;
use crate::{AuditEntry, AuditPost, Category, Severity, TITLE_PREFIX};

/// Action used when the title does not follow the grammar.
pub const UNKNOWN_ACTION: &str = "Unknown Action";

/// Actor used when the post has no author.
pub const SYSTEM_ACTOR: &str = "System";

// The timestamp never contains a space, so actions may contain " - ".
static TITLE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\[Audit\] (?P<action>.+) - (?P<timestamp>\S+)$").ok());

static FIELD: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?s)<p><strong>(?P<label>[^<:]+):</strong>\s*(?P<value>.*?)</p>").ok()
});

static ERRORS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)<h4>Errors:</h4>\s*<ul>(?P<items>.*?)</ul>").ok());

static ITEM: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)<li>(?P<item>.*?)</li>").ok());

static TAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"<[^>]*>").ok());

fn captures<'t>(re: &Lazy<Option<Regex>>, text: &'t str) -> Option<Captures<'t>> {
    re.as_ref()?.captures(text)
}

/// Strips markup and decodes entities.
fn clean(value: &str) -> String {
    let stripped = TAG
        .as_ref()
        .map_or_else(|| value.to_string(), |re| re.replace_all(value, "").into_owned());
    unescape_html(stripped.trim())
}

/// Returns whether a post title marks an audit entry.
#[must_use]
pub fn is_audit_title(title: &str) -> bool {
    title.starts_with(TITLE_PREFIX)
}

fn body_fields(message: &str) -> HashMap<String, String> {
    let Some(re) = FIELD.as_ref() else {
        return HashMap::new();
    };
    let mut fields = HashMap::new();
    for caps in re.captures_iter(message) {
        let label = caps["label"].trim().to_string();
        // first occurrence of a label wins
        fields.entry(label).or_insert_with(|| clean(&caps["value"]));
    }
    fields
}

fn body_errors(message: &str) -> Vec<String> {
    let Some(block) = captures(&ERRORS, message) else {
        return Vec::new();
    };
    let Some(item) = ITEM.as_ref() else {
        return Vec::new();
    };
    item.captures_iter(&block["items"])
        .map(|caps| clean(&caps["item"]))
        .collect()
}

/// Parses one audit post into an entry.
#[must_use]
pub fn parse_post(post: &AuditPost) -> AuditEntry {
    let mut well_formed = true;

    let title = captures(&TITLE, post.title.trim());
    let action = title
        .as_ref()
        .map(|caps| caps["action"].trim().to_string())
        .unwrap_or_else(|| {
            well_formed = false;
            UNKNOWN_ACTION.to_string()
        });

    let timestamp = title
        .as_ref()
        .and_then(|caps| DateTime::parse_from_rfc3339(caps["timestamp"].trim()).ok())
        .map(|t| t.with_timezone(&Utc));
    let timestamp = timestamp.unwrap_or_else(|| {
        well_formed = false;
        post.posted_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    });

    let mut fields = body_fields(&post.message);
    let details = fields.remove("Details").unwrap_or_else(|| {
        well_formed = false;
        action.clone()
    });
    let justification = fields.remove("Justification").filter(|j| !j.is_empty());
    let metadata = fields.remove("Metadata").and_then(|raw| {
        let parsed = serde_json::from_str(&raw).ok();
        if parsed.is_none() {
            well_formed = false;
        }
        parsed
    });

    let actor = post.author_name.clone().unwrap_or_else(|| {
        well_formed = false;
        SYSTEM_ACTOR.to_string()
    });

    AuditEntry {
        id: post.id,
        timestamp,
        actor,
        severity: Severity::from_action(&action),
        category: Category::from_action(&action),
        action,
        details,
        justification,
        metadata,
        errors: body_errors(&post.message),
        raw: post.message.clone(),
        well_formed,
    }
}

/// Keeps the posts carrying the audit prefix and parses them.
pub fn read_entries<I>(posts: I) -> Vec<AuditEntry>
where
    I: IntoIterator<Item = AuditPost>,
{
    posts
        .into_iter()
        .filter(|post| is_audit_title(&post.title))
        .map(|post| parse_post(&post))
        .collect()
}
