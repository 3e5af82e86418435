//! Webhook template rendering
//!
//! Rule templates are handlebars templates rendered against the parsed
//! request (`body`, `headers`). Bare dot-rooted paths (`{{.pull_request.
//! number}}`) are accepted for compatibility with payload-rooted templates
//! and resolve against the body.

use handlebars::Handlebars;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::tasks::types::Result;

lazy_static! {
    static ref HANDLEBARS: Handlebars<'static> = Handlebars::new();
    static ref DOT_ROOTED: Regex = Regex::new(r"\{\{\s*\.").expect("static regex");
}

/// Rewrite `{{.field}}` into `{{body.field}}` so payload-rooted templates
/// resolve against the request body.
#[must_use]
pub fn normalize_template(template: &str) -> String {
    DOT_ROOTED.replace_all(template, "{{body.").to_string()
}

/// Render a description template against the request data.
pub fn render_template(template: &str, data: &Value) -> Result<String> {
    let normalized = normalize_template(template);
    Ok(HANDLEBARS.render_template(&normalized, data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Value {
        json!({
            "body": {
                "action": "opened",
                "pull_request": {"number": 42, "title": "Fix retries"},
            },
            "headers": {"x-github-event": "pull_request"},
        })
    }

    #[test]
    fn body_rooted_paths_render() {
        let out = render_template("Review PR #{{body.pull_request.number}}", &data()).unwrap();
        assert_eq!(out, "Review PR #42");
    }

    #[test]
    fn dot_rooted_paths_resolve_against_body() {
        let out = render_template("Review PR #{{.pull_request.number}}", &data()).unwrap();
        assert_eq!(out, "Review PR #42");

        let out = render_template("{{ .action }}: {{ .pull_request.title }}", &data()).unwrap();
        assert_eq!(out, "opened: Fix retries");
    }

    #[test]
    fn headers_are_addressable() {
        let out = render_template("event={{headers.x-github-event}}", &data()).unwrap();
        assert_eq!(out, "event=pull_request");
    }

    #[test]
    fn missing_fields_render_empty() {
        let out = render_template("x{{body.nope}}x", &data()).unwrap();
        assert_eq!(out, "xx");
    }

    #[test]
    fn malformed_templates_error() {
        assert!(render_template("{{#if}}", &data()).is_err());
    }
}
