//! Incremental key/value table for step details.
//!
//! Rows are reused by position: a row whose key and value did not change keeps its
//! revision, so a rendering backend can skip it. Array and object values are always
//! re-rendered in full. Reserved keys never become rows; thought keys are pulled out separately.

use serde_json::{Map, Value};

use crate::markup::{escape_html, render_value_text};

/// Keys with dedicated presentation elsewhere.
pub const DEFAULT_RESERVED_KEYS: &[&str] = &["attachments", "finished", "tool_name", "headline"];

#[derive(Debug, Clone)]
pub struct KvpOptions {
    pub thought_keys: Vec<String>,
    pub reserved_keys: Vec<String>,
}

impl Default for KvpOptions {
    fn default() -> Self {
        Self {
            thought_keys: vec!["thoughts".to_string(), "reasoning".to_string()],
            reserved_keys: DEFAULT_RESERVED_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl KvpOptions {
    fn is_reserved(&self, key: &str) -> bool {
        key.starts_with('_') || self.reserved_keys.iter().any(|k| k == key)
    }

    fn is_thought(&self, key: &str) -> bool {
        self.thought_keys.iter().any(|k| k == key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KvpRow {
    pub key: String,
    pub value: Value,
    pub html: String,
    /// Bumped whenever the row's rendering changes.
    pub revision: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KvpDiff {
    pub unchanged: usize,
    pub patched: usize,
    pub rebuilt: usize,
    pub appended: usize,
    pub removed: usize,
    pub thoughts_changed: bool,
}

impl KvpDiff {
    pub fn is_empty(&self) -> bool {
        self.patched + self.rebuilt + self.appended + self.removed == 0 && !self.thoughts_changed
    }
}

#[derive(Debug, Default, Clone)]
pub struct KvpTable {
    rows: Vec<KvpRow>,
    thoughts: Option<String>,
}

impl KvpTable {
    pub fn rows(&self) -> &[KvpRow] {
        &self.rows
    }

    /// Rendered thoughts/reasoning, if the entry carried any.
    pub fn thoughts(&self) -> Option<&str> {
        self.thoughts.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.thoughts.is_none()
    }

    pub fn update(&mut self, kvps: &Map<String, Value>, options: &KvpOptions) -> KvpDiff {
        let mut diff = KvpDiff::default();

        let thoughts = collect_thoughts(kvps, options);
        if thoughts != self.thoughts {
            self.thoughts = thoughts;
            diff.thoughts_changed = true;
        }

        let visible = kvps
            .iter()
            .filter(|(key, _)| !options.is_reserved(key) && !options.is_thought(key));

        let mut position = 0;
        for (key, value) in visible {
            match self.rows.get_mut(position) {
                Some(row) if is_structured(value) => {
                    row.html = render_value(value);
                    if row.key == *key && row.value == *value {
                        diff.unchanged += 1;
                    } else {
                        row.key = key.clone();
                        row.value = value.clone();
                        row.revision += 1;
                        diff.rebuilt += 1;
                    }
                }
                Some(row) if row.key == *key && row.value == *value => {
                    diff.unchanged += 1;
                }
                Some(row) => {
                    row.key = key.clone();
                    row.value = value.clone();
                    row.html = render_value(value);
                    row.revision += 1;
                    diff.patched += 1;
                }
                None => {
                    self.rows.push(KvpRow {
                        key: key.clone(),
                        value: value.clone(),
                        html: render_value(value),
                        revision: 0,
                    });
                    diff.appended += 1;
                }
            }
            position += 1;
        }

        if self.rows.len() > position {
            diff.removed = self.rows.len() - position;
            self.rows.truncate(position);
        }

        diff
    }
}

fn is_structured(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

fn collect_thoughts(kvps: &Map<String, Value>, options: &KvpOptions) -> Option<String> {
    let mut parts = Vec::new();
    for key in &options.thought_keys {
        match kvps.get(key) {
            Some(Value::String(text)) if !text.trim().is_empty() => parts.push(text.clone()),
            Some(Value::Array(items)) => parts.extend(
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .filter(|text| !text.trim().is_empty())
                    .map(ToString::to_string),
            ),
            _ => {}
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(
        parts
            .iter()
            .map(|part| render_value_text(part))
            .collect::<Vec<_>>()
            .join("<br>"),
    )
}

/// Render a kvp value. Strings may carry image sentinels; nested values recurse.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(text) => render_value_text(text),
        Value::Array(items) => {
            let mut out = String::from(r#"<ul class="kvp-list">"#);
            for item in items {
                out.push_str("<li>");
                out.push_str(&render_value(item));
                out.push_str("</li>");
            }
            out.push_str("</ul>");
            out
        }
        Value::Object(map) => {
            let mut out = String::from(r#"<table class="kvp-object">"#);
            for (key, item) in map {
                out.push_str(&format!(
                    "<tr><th>{}</th><td>{}</td></tr>",
                    escape_html(key),
                    render_value(item)
                ));
            }
            out.push_str("</table>");
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn unchanged_rows_keep_their_revision() {
        let options = KvpOptions::default();
        let mut table = KvpTable::default();
        table.update(&map(json!({"query": "rust", "page": 1})), &options);

        let diff = table.update(&map(json!({"query": "rust", "page": 2})), &options);
        assert_eq!(diff.unchanged, 1);
        assert_eq!(diff.patched, 1);
        assert_eq!(table.rows()[0].revision, 0);
        assert_eq!(table.rows()[1].revision, 1);
        assert_eq!(table.rows()[1].html, "2");
    }

    #[test]
    fn structured_values_are_rebuilt_but_only_count_when_changed() {
        let options = KvpOptions::default();
        let mut table = KvpTable::default();
        let kvps = map(json!({"args": {"a": 1}, "list": [1, 2]}));
        table.update(&kvps, &options);

        let diff = table.update(&kvps, &options);
        assert!(diff.is_empty());
        assert_eq!(diff.unchanged, 2);
        assert_eq!(table.rows()[0].revision, 0);
        assert!(table.rows()[1].html.starts_with(r#"<ul class="kvp-list">"#));

        let diff = table.update(&map(json!({"args": {"a": 2}, "list": [1, 2]})), &options);
        assert_eq!(diff.rebuilt, 1);
        assert_eq!(diff.unchanged, 1);
        assert_eq!(table.rows()[0].revision, 1);
        assert!(table.rows()[0].html.contains("<td>2</td>"));
    }

    #[test]
    fn reserved_and_thought_keys_are_not_rows() {
        let options = KvpOptions::default();
        let mut table = KvpTable::default();
        table.update(
            &map(json!({
                "tool_name": "search_engine",
                "attachments": ["a.png"],
                "_internal": true,
                "thoughts": ["look it up", "then answer"],
                "query": "weather"
            })),
            &options,
        );

        assert_eq!(table.rows().len(), 1);
        assert_eq!(table.rows()[0].key, "query");
        assert_eq!(table.thoughts(), Some("look it up<br>then answer"));
    }

    #[test]
    fn shrinking_kvps_removes_trailing_rows() {
        let options = KvpOptions::default();
        let mut table = KvpTable::default();
        table.update(&map(json!({"a": 1, "b": 2, "c": 3})), &options);
        let diff = table.update(&map(json!({"a": 1})), &options);
        assert_eq!(diff.removed, 2);
        assert_eq!(table.rows().len(), 1);
    }

    #[test]
    fn image_sentinel_values_render_as_images() {
        let html = render_value(&json!("img:///tmp/screen.png"));
        assert!(html.starts_with("<img"));
        assert!(html.contains("/tmp/screen.png"));
    }
}
