//! Header codec.
//!
//! # Responsibilities
//! - Hold headers as an ordered multimap that keeps duplicates and name case
//! - Encode/decode the newline-joined `Name: value` form (request column)
//! - Encode/decode the JSON object form (response column)
//! - Convert to and from `http::HeaderMap` at the server/client boundary
//!
//! # Design Decisions
//! - Lookups are case-insensitive; storage keeps names exactly as supplied
//! - Malformed lines are dropped, never rejected
//! - JSON encoding never fails from the caller's point of view (`"{}"` fallback)

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Separator between a header name and its value in the line encoding.
const LINE_SEPARATOR: &str = ": ";

/// Ordered multimap of header name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    /// Create an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the newline-joined `Name: value` encoding.
    ///
    /// Empty lines are skipped. Each remaining line is split on the first
    /// `": "`; lines without that separator are dropped.
    pub fn parse_lines(text: &str) -> Self {
        let mut headers = Self::new();
        for line in text.split('\n') {
            if line.is_empty() {
                continue;
            }
            if let Some((name, value)) = line.split_once(LINE_SEPARATOR) {
                headers.append(name, value);
            }
        }
        headers
    }

    /// Encode as newline-joined `Name: value` lines, in insertion order.
    pub fn to_lines(&self) -> String {
        self.entries
            .iter()
            .map(|(name, value)| format!("{name}{LINE_SEPARATOR}{value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Encode as a JSON object mapping each name to the array of its values.
    ///
    /// Keys are emitted in sorted order. Encoding failure degrades to `"{}"`.
    pub fn to_json(&self) -> String {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, value) in &self.entries {
            grouped.entry(name.as_str()).or_default().push(value.as_str());
        }

        serde_json::to_string(&grouped).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to encode headers as JSON");
            "{}".to_string()
        })
    }

    /// Decode the JSON object form produced by [`HeaderList::to_json`].
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let grouped: BTreeMap<String, Vec<String>> = serde_json::from_str(text)?;
        let mut headers = Self::new();
        for (name, values) in grouped {
            for value in values {
                headers.append(&name, &value);
            }
        }
        Ok(headers)
    }

    /// Snapshot an `http::HeaderMap`, keeping repeated values in order.
    ///
    /// Names are stored in canonical form (`Content-Type`) and non-UTF-8
    /// values are converted lossily.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map.iter() {
            headers.append(
                &canonical_name(name.as_str()),
                &String::from_utf8_lossy(value.as_bytes()),
            );
        }
        headers
    }

    /// Build an `http::HeaderMap`, skipping entries that are not valid HTTP.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.append(name, value);
                }
                _ => {
                    tracing::debug!(header = %name, "Skipping invalid stored header");
                }
            }
        }
        map
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Replace every value for `name` with a single value.
    pub fn set(&mut self, name: &str, value: &str) {
        self.remove(name);
        self.append(name, value);
    }

    /// Remove every value for `name`. Returns how many entries were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Title-case a header name: `content-type` becomes `Content-Type`.
pub fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_separator_only() {
        let headers = HeaderList::parse_lines("X-Custom: a, b");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("X-Custom"), Some("a, b"));

        let headers = HeaderList::parse_lines("X-Time: 12: 30: 00");
        assert_eq!(headers.get("x-time"), Some("12: 30: 00"));
    }

    #[test]
    fn drops_empty_and_malformed_lines() {
        let text = "Host: example.com\n\nX-Broken:no-space\nnonsense\nAccept: */*\n";
        let headers = HeaderList::parse_lines(text);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("Host"), Some("example.com"));
        assert_eq!(headers.get("Accept"), Some("*/*"));
        assert!(!headers.contains("X-Broken"));
    }

    #[test]
    fn keeps_duplicates_in_order() {
        let headers = HeaderList::parse_lines("Set-Cookie: a=1\nVary: Accept\nSet-Cookie: b=2");
        let cookies: Vec<_> = headers.get_all("set-cookie").collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(headers.to_lines(), "Set-Cookie: a=1\nVary: Accept\nSet-Cookie: b=2");
    }

    #[test]
    fn json_groups_values_by_name() {
        let mut headers = HeaderList::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("Content-Type", "text/html");
        headers.append("Set-Cookie", "b=2");

        let json = headers.to_json();
        assert_eq!(
            json,
            r#"{"Content-Type":["text/html"],"Set-Cookie":["a=1","b=2"]}"#
        );

        let decoded = HeaderList::from_json(&json).unwrap();
        assert_eq!(decoded.get("content-type"), Some("text/html"));
        assert_eq!(decoded.get_all("Set-Cookie").count(), 2);
    }

    #[test]
    fn json_preserves_name_case() {
        let mut headers = HeaderList::new();
        headers.append("x-lower", "1");
        headers.append("X-Upper", "2");
        assert_eq!(headers.to_json(), r#"{"X-Upper":["2"],"x-lower":["1"]}"#);
    }

    #[test]
    fn empty_list_encodes_as_empty_object() {
        assert_eq!(HeaderList::new().to_json(), "{}");
        assert!(HeaderList::from_json("{}").unwrap().is_empty());
        assert!(HeaderList::from_json("not json").is_err());
    }

    #[test]
    fn remove_and_set_are_case_insensitive() {
        let mut headers = HeaderList::parse_lines("content-encoding: gzip\nContent-Type: a");
        assert_eq!(headers.remove("Content-Encoding"), 1);
        headers.set("CONTENT-TYPE", "b");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("content-type"), Some("b"));
    }

    #[test]
    fn header_map_conversion_skips_invalid_entries() {
        let mut headers = HeaderList::new();
        headers.append("X-Ok", "fine");
        headers.append("Bad Name", "value");
        headers.append("X-Multi", "1");
        headers.append("X-Multi", "2");

        let map = headers.to_header_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get_all("x-multi").iter().count(), 2);

        let back = HeaderList::from_header_map(&map);
        assert_eq!(back.get("X-OK"), Some("fine"));
    }

    #[test]
    fn header_map_snapshot_uses_canonical_names() {
        let mut map = HeaderMap::new();
        map.insert("content-type", "text/html".parse().unwrap());
        map.append("x-forwarded-for", "10.0.0.1".parse().unwrap());
        map.append("x-forwarded-for", "10.0.0.2".parse().unwrap());
        map.insert("etag", "\"abc\"".parse().unwrap());

        let headers = HeaderList::from_header_map(&map);
        let names: Vec<&str> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["Content-Type", "X-Forwarded-For", "X-Forwarded-For", "Etag"]
        );
        assert!(headers.to_json().contains("\"Content-Type\""));
        assert_eq!(headers.get("content-type"), Some("text/html"));
    }

    #[test]
    fn canonical_name_title_cases_each_segment() {
        assert_eq!(canonical_name("content-type"), "Content-Type");
        assert_eq!(canonical_name("WWW-AUTHENTICATE"), "Www-Authenticate");
        assert_eq!(canonical_name("x--y"), "X--Y");
        assert_eq!(canonical_name(""), "");
    }
}
