//! Tool-result presentation: the compact
//! `PACK1` line encoding and its JSON twin, built from the same `Envelope`
//! so every tool handler emits one shape regardless of the configured
//! encoding.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Value};

use crate::search::TotalMode;

/// Identifiers (paths, symbol names) keep `/._-:@` unescaped; everything
/// else in an identifier is percent-encoded.
const IDENTIFIER_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'.')
    .remove(b'_')
    .remove(b'-')
    .remove(b':')
    .remove(b'@');

pub fn encode_identifier(s: &str) -> String {
    utf8_percent_encode(s, IDENTIFIER_ESCAPE).to_string()
}

/// Free text carries no safe set at all.
pub fn encode_text(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Pack1,
    Json,
}

impl Encoding {
    pub fn from_config_str(s: &str) -> Self {
        match s {
            "json" => Encoding::Json,
            _ => Encoding::Pack1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum RecordKind {
    /// `p:` path-only value.
    Path,
    /// `r:` record of key/value pairs (a search or repo hit).
    Record,
    /// `h:` symbol/header record.
    Header,
    /// `m:` metric/metadata line.
    Metric,
    /// `s:` symbol block (declaration line plus body).
    SymbolBlock,
    /// `c:` raw content block.
    Content,
    /// `d:` docstring block.
    Doc,
    /// `e:` error record.
    Error,
}

impl RecordKind {
    fn prefix(self) -> &'static str {
        match self {
            RecordKind::Path => "p",
            RecordKind::Record => "r",
            RecordKind::Header => "h",
            RecordKind::Metric => "m",
            RecordKind::SymbolBlock => "s",
            RecordKind::Content => "c",
            RecordKind::Doc => "d",
            RecordKind::Error => "e",
        }
    }

    fn json_tag(self) -> &'static str {
        match self {
            RecordKind::Path => "path",
            RecordKind::Record => "record",
            RecordKind::Header => "header",
            RecordKind::Metric => "metric",
            RecordKind::SymbolBlock => "symbol",
            RecordKind::Content => "content",
            RecordKind::Doc => "doc",
            RecordKind::Error => "error",
        }
    }
}

/// One record line: a kind plus its ordered key/value fields. Free-text
/// values (`content`, `doc`, `reason`...) are marked so PACK1 can apply the
/// no-safe-set escaping while identifiers keep the permissive one.
#[derive(Debug, Clone)]
pub struct Field {
    pub key: &'static str,
    pub value: String,
    pub free_text: bool,
}

pub fn id_field(key: &'static str, value: impl Into<String>) -> Field {
    Field { key, value: value.into(), free_text: false }
}

pub fn text_field(key: &'static str, value: impl Into<String>) -> Field {
    Field { key, value: value.into(), free_text: true }
}

#[derive(Debug, Clone)]
pub struct Record {
    pub kind: RecordKind,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone)]
pub struct Truncation {
    pub maybe: bool,
    pub offset: usize,
    pub limit: usize,
}

/// Everything one tool call returns, before it is rendered into either wire
/// shape.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub tool: String,
    pub ok: bool,
    pub kv: Vec<(&'static str, String)>,
    pub records: Vec<Record>,
    pub returned: Option<usize>,
    pub total: Option<usize>,
    pub total_mode: Option<TotalMode>,
    pub truncated: Option<Truncation>,
}

impl Envelope {
    pub fn new(tool: impl Into<String>, ok: bool) -> Self {
        Envelope {
            tool: tool.into(),
            ok,
            ..Default::default()
        }
    }

    pub fn with_kv(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.kv.push((key, value.into()));
        self
    }

    pub fn with_paging(mut self, returned: usize, total: usize, total_mode: TotalMode) -> Self {
        self.returned = Some(returned);
        self.total = Some(total);
        self.total_mode = Some(total_mode);
        self
    }

    pub fn with_truncation(mut self, maybe: bool, offset: usize, limit: usize) -> Self {
        self.truncated = Some(Truncation { maybe, offset, limit });
        self
    }

    pub fn push(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    pub fn encode(&self, encoding: Encoding) -> String {
        match encoding {
            Encoding::Pack1 => self.to_pack1(),
            Encoding::Json => serde_json::to_string(&self.to_json()).unwrap_or_default(),
        }
    }

    fn to_pack1(&self) -> String {
        let mut lines = Vec::new();

        let mut header = format!("PACK1 tool={} ok={}", encode_identifier(&self.tool), self.ok);
        for (k, v) in &self.kv {
            header.push_str(&format!(" {k}={}", encode_identifier(v)));
        }
        if let Some(n) = self.returned {
            header.push_str(&format!(" returned={n}"));
        }
        if let Some(n) = self.total {
            header.push_str(&format!(" total={n}"));
        }
        if let Some(mode) = self.total_mode {
            header.push_str(&format!(" total_mode={}", total_mode_str(mode)));
        }
        lines.push(header);

        for record in &self.records {
            let mut line = String::from(record.kind.prefix());
            line.push(':');
            let rendered = record
                .fields
                .iter()
                .map(|f| {
                    let escaped = if f.free_text { encode_text(&f.value) } else { encode_identifier(&f.value) };
                    format!("{}={escaped}", f.key)
                })
                .collect::<Vec<_>>()
                .join(" ");
            line.push_str(&rendered);
            lines.push(line);
        }

        if let Some(t) = &self.truncated {
            lines.push(format!(
                "m:truncated={} next=use_offset offset={} limit={}",
                if t.maybe { "maybe" } else { "true" },
                t.offset,
                t.limit
            ));
        }

        lines.join("\n")
    }

    fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("tool".into(), json!(self.tool));
        obj.insert("ok".into(), json!(self.ok));
        for (k, v) in &self.kv {
            obj.insert((*k).into(), json!(v));
        }
        if let Some(n) = self.returned {
            obj.insert("returned".into(), json!(n));
        }
        if let Some(n) = self.total {
            obj.insert("total".into(), json!(n));
        }
        if let Some(mode) = self.total_mode {
            obj.insert("total_mode".into(), json!(total_mode_str(mode)));
        }
        if let Some(t) = &self.truncated {
            obj.insert(
                "truncated".into(),
                json!({ "maybe": t.maybe, "offset": t.offset, "limit": t.limit }),
            );
        }
        let records: Vec<Value> = self
            .records
            .iter()
            .map(|r| {
                let mut m = serde_json::Map::new();
                m.insert("kind".into(), json!(r.kind.json_tag()));
                for f in &r.fields {
                    m.insert(f.key.into(), json!(f.value));
                }
                Value::Object(m)
            })
            .collect();
        obj.insert("records".into(), Value::Array(records));
        Value::Object(obj)
    }
}

fn total_mode_str(mode: TotalMode) -> &'static str {
    match mode {
        TotalMode::Exact => "exact",
        TotalMode::Approx => "approx",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack1_header_reports_paging_fields() {
        let env = Envelope::new("search", true).with_paging(2, 2, TotalMode::Exact);
        let out = env.encode(Encoding::Pack1);
        assert!(out.starts_with("PACK1 tool=search ok=true"));
        assert!(out.contains("returned=2 total=2 total_mode=exact"));
    }

    #[test]
    fn identifier_escaping_preserves_path_separators() {
        assert_eq!(encode_identifier("src/models.py"), "src/models.py");
        assert_eq!(encode_identifier("a b"), "a%20b");
    }

    #[test]
    fn text_escaping_has_no_safe_set() {
        assert_eq!(encode_text("a/b"), "a%2Fb");
    }

    #[test]
    fn truncation_trailer_is_appended_last() {
        let env = Envelope::new("list_files", true)
            .push(Record { kind: RecordKind::Path, fields: vec![id_field("path", "a.py")] })
            .with_truncation(true, 0, 200);
        let out = env.encode(Encoding::Pack1);
        let last = out.lines().last().unwrap();
        assert_eq!(last, "m:truncated=maybe next=use_offset offset=0 limit=200");
    }

    #[test]
    fn json_encoding_round_trips_records() {
        let env = Envelope::new("search", true)
            .push(Record { kind: RecordKind::Record, fields: vec![id_field("path", "a.py"), text_field("snippet", "L1:hit")] });
        let out = env.encode(Encoding::Json);
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["records"][0]["path"], "a.py");
    }
}
