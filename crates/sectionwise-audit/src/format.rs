//! Rendering of audit records into LMS posts.
//!
//! A post title reads `[Audit] <action> - <RFC 3339 timestamp>`. The body is a
//! sequence of labeled paragraphs, `<p><strong>Label:</strong> value</p>`,
//! followed by an optional `<h4>Errors:</h4>` list. Every value is
//! HTML-escaped so the parser can recover it verbatim.

use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{AuditRecord, TITLE_PREFIX};

/// Renders one [`AuditRecord`] as a post title and body.
pub struct PostRenderer<'a> {
    record: &'a AuditRecord,
    at: DateTime<Utc>,
}

impl<'a> PostRenderer<'a> {
    /// Creates a renderer stamping the record with `at`.
    #[must_use]
    pub const fn new(record: &'a AuditRecord, at: DateTime<Utc>) -> Self {
        Self { record, at }
    }

    /// Returns the timestamp in the form written to titles and bodies.
    #[must_use]
    pub fn timestamp(&self) -> String {
        self.at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Generates the post title.
    #[must_use]
    pub fn title(&self) -> String {
        format!("{TITLE_PREFIX} {} - {}", self.record.action, self.timestamp())
    }

    /// Generates the post body.
    #[must_use]
    pub fn body(&self) -> String {
        let mut output = String::new();

        write_field(&mut output, "Action", &self.record.action);
        write_field(&mut output, "Details", &self.record.details);
        if let Some(justification) = &self.record.justification {
            write_field(&mut output, "Justification", justification);
        }
        write_field(&mut output, "Timestamp", &self.timestamp());
        if let Some(metadata) = &self.record.metadata {
            write_field(&mut output, "Metadata", &metadata.to_string());
        }
        self.write_errors(&mut output);

        output
    }

    fn write_errors(&self, output: &mut String) {
        if self.record.errors.is_empty() {
            return;
        }
        let _ = writeln!(output, "<h4>Errors:</h4>");
        let _ = writeln!(output, "<ul>");
        for error in &self.record.errors {
            let _ = writeln!(output, "<li>{}</li>", escape_html(error));
        }
        let _ = writeln!(output, "</ul>");
    }
}

fn write_field(output: &mut String, label: &str, value: &str) {
    let _ = writeln!(output, "<p><strong>{label}:</strong> {}</p>", escape_html(value));
}

/// Escapes `&`, `<`, `>` and `"` for inclusion in HTML text.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Reverses [`escape_html`]; `&amp;` is handled last so double escapes survive.
pub(crate) fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
