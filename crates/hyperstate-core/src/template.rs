//! # Path Templates
//!
//! Parsing, binding and matching of URI templates such as
//! `/customers/{id}/orders` or `/Customers('{id}')`.
//!
//! Only simple `{name}` placeholders are understood. Matching is segment
//! based: placeholders never capture a `/`.
//!
//! Bound values are percent-encoded as path segments and matched values are
//! decoded, so `match_path(t, &bind(t, v)?)` gives back `v`.

use crate::Parameters;
use crate::primitives::MAX_TEMPLATE_VARIABLES;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::collections::BTreeMap;

/// Characters escaped inside a bound path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Characters escaped inside a query parameter name or value.
const QUERY_COMPONENT: &AsciiSet = &SEGMENT.add(b'+').add(b'=');

/// Percent-encode one query parameter name or value.
#[must_use]
pub fn encode_query_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY_COMPONENT).to_string()
}

/// Decode a percent-encoded component. Invalid UTF-8 is replaced lossily.
#[must_use]
pub fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part<'a> {
    Literal(&'a str),
    Variable(&'a str),
}

/// Split a template into literal and `{variable}` parts.
///
/// An unterminated `{` is kept as literal text.
fn parts(template: &str) -> Vec<Part<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        if open > 0 {
            out.push(Part::Literal(&rest[..open]));
        }
        out.push(Part::Variable(&rest[open + 1..open + close]));
        rest = &rest[open + close + 1..];
    }
    if !rest.is_empty() {
        out.push(Part::Literal(rest));
    }
    out
}

/// Variable names in declaration order, without duplicates.
#[must_use]
pub fn variables(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for part in parts(template) {
        if let Part::Variable(name) = part {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names.truncate(MAX_TEMPLATE_VARIABLES);
    names
}

/// Bind every variable of `template` from `values`.
///
/// Values are percent-encoded. Returns the first variable with no value as
/// the error.
pub fn bind(template: &str, values: &BTreeMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    for part in parts(template) {
        match part {
            Part::Literal(text) => out.push_str(text),
            Part::Variable(name) => match values.get(name) {
                Some(value) => out.extend(utf8_percent_encode(value, SEGMENT)),
                None => return Err(name.to_string()),
            },
        }
    }
    Ok(out)
}

/// Replace the variables that have values; leave the others untouched.
///
/// Values are inserted verbatim. Use [`fill_path`] when the result is a path.
#[must_use]
pub fn replace(template: &str, values: &BTreeMap<String, String>) -> String {
    substitute(template, values, false)
}

/// Like [`replace`], but percent-encodes the inserted values.
#[must_use]
pub fn fill_path(template: &str, values: &BTreeMap<String, String>) -> String {
    substitute(template, values, true)
}

fn substitute(template: &str, values: &BTreeMap<String, String>, encode: bool) -> String {
    let mut out = String::with_capacity(template.len());
    for part in parts(template) {
        match part {
            Part::Literal(text) => out.push_str(text),
            Part::Variable(name) => match values.get(name) {
                Some(value) if encode => out.extend(utf8_percent_encode(value, SEGMENT)),
                Some(value) => out.push_str(value),
                None => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
            },
        }
    }
    out
}

/// True if any `{variable}` remains in `text`.
#[must_use]
pub fn has_variables(text: &str) -> bool {
    parts(text)
        .iter()
        .any(|part| matches!(part, Part::Variable(_)))
}

/// Match a concrete path against a template, extracting decoded variables.
///
/// Any query string on `path` is ignored.
#[must_use]
pub fn match_path(template: &str, path: &str) -> Option<Parameters> {
    let path = path.split('?').next().unwrap_or_default();
    let template = template.split('?').next().unwrap_or_default();
    let template_segments: Vec<&str> = template.trim_end_matches('/').split('/').collect();
    let path_segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    if template_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = Parameters::new();
    for (tpl, seg) in template_segments.iter().zip(&path_segments) {
        match_segment(tpl, seg, &mut params)?;
    }
    Some(params)
}

fn match_segment(template: &str, segment: &str, params: &mut Parameters) -> Option<()> {
    let parts = parts(template);
    let mut rest = segment;
    let mut iter = parts.iter().peekable();
    while let Some(part) = iter.next() {
        match part {
            Part::Literal(text) => {
                rest = rest.strip_prefix(text)?;
            }
            Part::Variable(name) => {
                let value = match iter.peek() {
                    Some(Part::Literal(next)) => {
                        let end = rest.find(next)?;
                        let (value, tail) = rest.split_at(end);
                        rest = tail;
                        value
                    }
                    // A variable followed by another variable (or nothing)
                    // takes the remainder of the segment.
                    _ => std::mem::take(&mut rest),
                };
                if value.is_empty() {
                    return None;
                }
                params.insert(*name, decode(value));
            }
        }
    }
    rest.is_empty().then_some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn variables_in_order() {
        assert_eq!(
            variables("/customers/{id}/orders/{orderId}/{id}"),
            vec!["id".to_string(), "orderId".to_string()]
        );
        assert!(variables("/customers").is_empty());
    }

    #[test]
    fn bind_reports_missing_variable() {
        assert_eq!(
            bind("/customers/{id}", &values(&[("id", "42")])),
            Ok("/customers/42".to_string())
        );
        assert_eq!(
            bind("/customers/{id}", &values(&[])),
            Err("id".to_string())
        );
    }

    #[test]
    fn replace_keeps_unknown_placeholders() {
        assert_eq!(
            replace("{a}-{b}", &values(&[("a", "1")])),
            "1-{b}".to_string()
        );
        assert!(has_variables("1-{b}"));
        assert!(!has_variables("plain"));
    }

    #[test]
    fn match_simple_segments() {
        let params = match_path("/customers/{id}", "/customers/42").expect("match");
        assert_eq!(params.first("id"), Some("42"));
        assert!(match_path("/customers/{id}", "/customers").is_none());
        assert!(match_path("/customers/{id}", "/orders/42").is_none());
        assert!(match_path("/customers", "/customers/").is_some());
    }

    #[test]
    fn match_embedded_variables() {
        let params = match_path("/Customers('{id}')", "/Customers('ALFKI')").expect("match");
        assert_eq!(params.first("id"), Some("ALFKI"));
        let href = bind("/Customers('{id}')", &values(&[("id", "O')Brien")])).expect("bind");
        let params = match_path("/Customers('{id}')", &href).expect("match");
        assert_eq!(params.first("id"), Some("O')Brien"));
        assert!(match_path("/Customers('{id}')", "/Customers(ALFKI)").is_none());
    }

    #[test]
    fn match_ignores_query() {
        let params = match_path("/customers/{id}", "/customers/7?expand=orders").expect("match");
        assert_eq!(params.first("id"), Some("7"));
    }

    #[test]
    fn bound_values_route_back() {
        for id in ["a/b", "x y", "k&v", "50%", "{id}", "café"] {
            let href = bind("/customers/{id}", &values(&[("id", id)])).expect("bind");
            assert_eq!(href.matches('/').count(), 2, "{href}");
            let params = match_path("/customers/{id}", &href).expect("match");
            assert_eq!(params.first("id"), Some(id));
        }
        assert_eq!(
            bind("/customers/{id}", &values(&[("id", "a/b")])),
            Ok("/customers/a%2Fb".to_string())
        );
        assert_eq!(
            fill_path("/c/{id}/{rest}", &values(&[("id", "x y")])),
            "/c/x%20y/{rest}".to_string()
        );
        assert_eq!(replace("{a}", &values(&[("a", "x y")])), "x y".to_string());
    }

    #[test]
    fn query_components_encode_separators() {
        assert_eq!(encode_query_component("k&v=1 +"), "k%26v%3D1%20%2B");
        assert_eq!(decode("k%26v%3D1%20%2B"), "k&v=1 +");
    }

    #[test]
    fn unterminated_brace_is_literal() {
        assert!(variables("/broken/{id").is_empty());
        assert!(match_path("/broken/{id", "/broken/{id").is_some());
    }
}
