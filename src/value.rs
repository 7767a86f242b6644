//! Conversions from records to template [`Value`]s. Templates insert values
//! verbatim, so every string that reaches a template goes through [`text`] or
//! [`href`] here first. Every key a template may look up is always present;
//! optional parts are guarded by `has_*` booleans rather than by the
//! truthiness of a missing value.

use crate::config::Product;
use crate::mountain::{ExternalReference, TO_BE_CONFIRMED};
use gtmpl_value::Value;
use pulldown_cmark::escape::{escape_href, escape_html};
use std::collections::HashMap;

/// Escapes `s` for use as HTML text or inside a quoted attribute.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    // Writing into a `String` never fails.
    let _ = escape_html(&mut out, s);
    out.replace('\'', "&#39;")
}

/// Escapes `s` for use as a link target.
pub fn escape_url(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let _ = escape_href(&mut out, s);
    out.replace('\'', "%27")
}

pub fn text(s: &str) -> Value {
    Value::String(escape(s))
}

pub fn href(s: &str) -> Value {
    Value::String(escape_url(s))
}

/// Like [`text`], but empty or absent strings become the "to be confirmed"
/// placeholder.
pub fn text_or_placeholder(s: Option<&str>) -> Value {
    match s {
        Some(s) if !s.trim().is_empty() => text(s),
        _ => text(TO_BE_CONFIRMED),
    }
}

/// The first `limit` features, escaped.
pub fn features(features: &[String], limit: usize) -> Value {
    Value::Array(features.iter().take(limit).map(|f| text(f)).collect())
}

pub fn object<I>(entries: I) -> Value
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    Value::Object(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect::<HashMap<String, Value>>(),
    )
}

impl From<&ExternalReference> for Value {
    fn from(r: &ExternalReference) -> Value {
        object(vec![
            ("source_name", text(&r.source_name)),
            ("description", text(&r.description)),
            ("url", href(r.url.as_str())),
            ("has_expert_comment", Value::Bool(r.expert_comment.is_some())),
            (
                "expert_comment",
                text(r.expert_comment.as_deref().unwrap_or_default()),
            ),
            ("attribution", text(&r.attribution)),
        ])
    }
}

impl From<&Product> for Value {
    fn from(p: &Product) -> Value {
        object(vec![
            ("name", text(&p.name)),
            ("url", href(p.url.as_str())),
            ("has_price", Value::Bool(p.price.is_some())),
            ("price", text(p.price.as_deref().unwrap_or_default())),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(
            "O&#39;Brien&#39;s &lt;Peak&gt; &amp; &quot;Co&quot;",
            escape(r#"O'Brien's <Peak> & "Co""#)
        );
        assert_eq!("高尾山", escape("高尾山"));
    }

    #[test]
    fn test_escape_url() {
        let escaped = escape_url(r#"https://example.com/a"b<c>'d"#);
        assert!(!escaped.contains('"'));
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('\''));
        assert!(escaped.starts_with("https://example.com/a"));
    }

    #[test]
    fn test_features_limit() {
        let all: Vec<String> = vec!["a", "b", "<c>", "d"]
            .into_iter()
            .map(String::from)
            .collect();
        match features(&all, 3) {
            Value::Array(values) => {
                let strings: Vec<&str> = values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.as_str(),
                        other => panic!("wanted string; found {:?}", other),
                    })
                    .collect();
                assert_eq!(vec!["a", "b", "&lt;c&gt;"], strings);
            }
            other => panic!("wanted array; found {:?}", other),
        }
    }

    #[test]
    fn test_placeholder() {
        match text_or_placeholder(Some("  ")) {
            Value::String(s) => assert_eq!(TO_BE_CONFIRMED, s),
            other => panic!("wanted string; found {:?}", other),
        }
    }
}
