//! Template rendering against a JSON context.
//!
//! Supported syntax:
//! - `{{ path.to.value }}`: dotted lookup through objects and array indexes
//! - `{{ value|default:"fallback" }}`, `{{ value|upper }}`, `{{ value|lower }}`
//! - `{# comment #}`: removed from the output
//!
//! Missing keys and nulls render as an empty string. Values substituted into
//! HTML are escaped; subject and text are rendered verbatim.

use std::sync::LazyLock;

use serde_json::Value;
use thiserror::Error;

use herald_common::types::Template;

static TAG: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?s)\{\{(.*?)\}\}|\{#.*?#\}").expect("tag pattern is valid")
});

static PATH: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)*$").expect("path pattern is valid")
});

/// Rendering failures. Each template field renders independently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("malformed expression `{0}`")]
    Syntax(String),

    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    #[error("unclosed tag at byte {0}")]
    Unclosed(usize),

    #[error("cannot render {field}: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: Box<RenderError>,
    },
}

impl RenderError {
    pub(crate) fn in_field(self, field: &'static str) -> Self {
        RenderError::Field {
            field,
            source: Box::new(self),
        }
    }
}

/// Rendered subject, text and HTML of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Html,
}

#[derive(Debug)]
enum Filter {
    Default(String),
    Upper,
    Lower,
}

/// Stateless renderer; safe to share between tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentRenderer;

impl ContentRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render subject, text and HTML of `template` against `context`.
    pub fn render(
        &self,
        template: &Template,
        context: &Value,
    ) -> Result<RenderedContent, RenderError> {
        Ok(RenderedContent {
            subject: self.render_subject(&template.subject, context)?,
            text: self.render_text(&template.text, context)?,
            html: self.render_html(&template.html, context)?,
        })
    }

    pub fn render_subject(&self, source: &str, context: &Value) -> Result<String, RenderError> {
        Self::render_str(source, context, Escape::None).map_err(|e| e.in_field("subject"))
    }

    pub fn render_text(&self, source: &str, context: &Value) -> Result<String, RenderError> {
        Self::render_str(source, context, Escape::None).map_err(|e| e.in_field("text"))
    }

    pub fn render_html(&self, source: &str, context: &Value) -> Result<String, RenderError> {
        Self::render_str(source, context, Escape::Html).map_err(|e| e.in_field("html"))
    }

    /// Check that `source` parses without rendering it against real data.
    pub fn check_syntax(&self, source: &str) -> Result<(), RenderError> {
        Self::render_str(source, &Value::Null, Escape::None).map(|_| ())
    }

    fn render_str(source: &str, context: &Value, escape: Escape) -> Result<String, RenderError> {
        let mut out = String::with_capacity(source.len());
        let mut last = 0;

        for caps in TAG.captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            let literal = &source[last..whole.start()];
            Self::check_unclosed(literal, last)?;
            out.push_str(literal);
            last = whole.end();

            // Comments have no capture group
            let Some(expr) = caps.get(1) else { continue };
            let value = Self::evaluate(expr.as_str().trim(), context)?;
            match escape {
                Escape::None => out.push_str(&value),
                Escape::Html => out.push_str(&escape_html(&value)),
            }
        }

        let tail = &source[last..];
        Self::check_unclosed(tail, last)?;
        out.push_str(tail);
        Ok(out)
    }

    fn check_unclosed(literal: &str, offset: usize) -> Result<(), RenderError> {
        match literal.find("{{").or_else(|| literal.find("{#")) {
            Some(pos) => Err(RenderError::Unclosed(offset + pos)),
            None => Ok(()),
        }
    }

    fn evaluate(expr: &str, context: &Value) -> Result<String, RenderError> {
        let mut parts = split_pipes(expr).into_iter();
        let path = parts.next().unwrap_or_default().trim();
        if !PATH.is_match(path) {
            return Err(RenderError::Syntax(expr.to_string()));
        }

        let filters = parts
            .map(|f| Self::parse_filter(f.trim()))
            .collect::<Result<Vec<_>, _>>()?;

        let value = lookup(context, path);
        let mut rendered = value.map(display_value).unwrap_or_default();
        let falsy = value.is_none_or(is_falsy);

        for filter in filters {
            rendered = match filter {
                Filter::Default(fallback) if falsy => fallback,
                Filter::Default(_) => rendered,
                Filter::Upper => rendered.to_uppercase(),
                Filter::Lower => rendered.to_lowercase(),
            };
        }

        Ok(rendered)
    }

    fn parse_filter(filter: &str) -> Result<Filter, RenderError> {
        let (name, arg) = match filter.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (filter, None),
        };
        match (name, arg) {
            ("default", Some(arg)) => Ok(Filter::Default(unquote(arg).to_string())),
            ("upper", None) => Ok(Filter::Upper),
            ("lower", None) => Ok(Filter::Lower),
            ("default", None) => Err(RenderError::Syntax(filter.to_string())),
            _ => Err(RenderError::UnknownFilter(name.to_string())),
        }
    }
}

/// Split a tag expression on `|`, leaving pipes inside quoted arguments alone.
fn split_pipes(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(open), _) if c == open => quote = None,
            (None, '|') => {
                parts.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expr[start..]);
    parts
}

fn unquote(arg: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = arg
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    arg
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render_text(source: &str, context: Value) -> Result<String, RenderError> {
        ContentRenderer::new().render_text(source, &context)
    }

    #[test]
    fn test_substitutes_nested_values() {
        let out = render_text(
            "Hi {{ user.name }}, order #{{order.id}} has {{ items.1 }}",
            json!({"user": {"name": "Ann"}, "order": {"id": 42}, "items": ["a", "b"]}),
        )
        .unwrap();
        assert_eq!(out, "Hi Ann, order #42 has b");
    }

    #[test]
    fn test_missing_key_renders_empty() {
        let out = render_text("[{{ missing.key }}]", json!({})).unwrap();
        assert_eq!(out, "[]");
        let out = render_text("[{{ value }}]", json!({"value": null})).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_filters() {
        let out = render_text(
            r#"{{ name|default:"friend"|upper }} / {{ city|lower }}"#,
            json!({"city": "PARIS"}),
        )
        .unwrap();
        assert_eq!(out, "FRIEND / paris");
    }

    #[test]
    fn test_quoted_argument_keeps_pipes() {
        let out = render_text(
            r#"{{ x|default:"a|b" }} {{ y|default:'c|d'|upper }}"#,
            json!({}),
        )
        .unwrap();
        assert_eq!(out, "a|b C|D");
    }

    #[test]
    fn test_booleans_and_comments() {
        let out = render_text("{# note #}active={{ on }}", json!({"on": true})).unwrap();
        assert_eq!(out, "active=True");
    }

    #[test]
    fn test_html_escapes_values_only() {
        let out = ContentRenderer::new()
            .render_html("<b>{{ name }}</b>", &json!({"name": "<Tom & Jerry>"}))
            .unwrap();
        assert_eq!(out, "<b>&lt;Tom &amp; Jerry&gt;</b>");
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            render_text("{{ a|shout }}", json!({})).unwrap_err(),
            RenderError::Field {
                field: "text",
                source: Box::new(RenderError::UnknownFilter("shout".to_string())),
            }
        );
        assert!(matches!(
            render_text("{{ 1bad }}", json!({})),
            Err(RenderError::Field { .. })
        ));
        assert!(ContentRenderer::new().check_syntax("Hello {{ name").is_err());
    }

    #[test]
    fn test_render_fields_independently() {
        let mut template = Template::new("Welcome", "Hello {{ name }}");
        template.subject = "Hi {{ name|upper }}".to_string();
        template.html = "<p>{{ name }}</p>".to_string();

        let out = ContentRenderer::new()
            .render(&template, &json!({"name": "ann"}))
            .unwrap();
        assert_eq!(out.subject, "Hi ANN");
        assert_eq!(out.text, "Hello ann");
        assert_eq!(out.html, "<p>ann</p>");

        template.html = "<p>{{ name|bogus }}</p>".to_string();
        let renderer = ContentRenderer::new();
        assert!(renderer.render(&template, &json!({})).is_err());
        assert_eq!(
            renderer.render_subject(&template.subject, &json!({"name": "x"})).unwrap(),
            "Hi X"
        );
    }
}
