//! Normalized span model and wire decoding
//!
//! Wire spans arrive as JSON with free-form `attributes`/`resource` maps.
//! Normalization keeps only the [`STANDARD_FIELDS`] with non-empty values,
//! flattened by display key, so downstream code never touches the raw maps.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::fields::{CommonField, FieldSource, SERVICE_NAME, STANDARD_FIELDS};

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum SpanKind {
    #[default]
    Unspecified,
    Interval,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    /// Kinds that receive a call (server side of a sync call, consumer of a message)
    pub fn is_called(&self) -> bool {
        matches!(self, SpanKind::Server | SpanKind::Consumer)
    }

    /// Kinds that initiate a call
    pub fn is_caller(&self) -> bool {
        matches!(self, SpanKind::Client | SpanKind::Producer)
    }

    /// The kind on the other end of a call; kinds without a peer map to themselves
    pub fn opposite(&self) -> SpanKind {
        match self {
            SpanKind::Client => SpanKind::Server,
            SpanKind::Server => SpanKind::Client,
            SpanKind::Producer => SpanKind::Consumer,
            SpanKind::Consumer => SpanKind::Producer,
            other => *other,
        }
    }
}

impl From<i32> for SpanKind {
    fn from(value: i32) -> Self {
        match value {
            1 => SpanKind::Interval,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }
}

impl From<SpanKind> for i32 {
    fn from(kind: SpanKind) -> Self {
        match kind {
            SpanKind::Unspecified => 0,
            SpanKind::Interval => 1,
            SpanKind::Server => 2,
            SpanKind::Client => 3,
            SpanKind::Producer => 4,
            SpanKind::Consumer => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

impl From<i32> for StatusCode {
    fn from(value: i32) -> Self {
        match value {
            1 => StatusCode::Ok,
            2 => StatusCode::Error,
            _ => StatusCode::Unset,
        }
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Unset => 0,
            StatusCode::Ok => 1,
            StatusCode::Error => 2,
        }
    }
}

// ============================================================================
// STANDARD SPAN
// ============================================================================

/// A span with uniformly extracted fields. Timestamps are microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardSpan {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub span_name: String,
    pub start_time: i64,
    pub end_time: i64,
    pub elapsed_time: i64,
    pub status_code: StatusCode,
    pub kind: SpanKind,
    /// Display key -> value, only non-empty standard fields
    pub collections: FxHashMap<String, String>,
    /// Loaded by replay rather than received in this window
    #[serde(skip)]
    pub from_history: bool,
}

impl StandardSpan {
    pub fn field(&self, field: &CommonField) -> Option<&str> {
        self.collections.get(field.display_key).map(String::as_str)
    }

    /// First present value among `fields`
    pub fn field_any(&self, fields: &[CommonField]) -> Option<&str> {
        fields.iter().find_map(|f| self.field(f))
    }

    /// Field value or empty string, for label building
    pub fn field_value(&self, field: &CommonField) -> &str {
        self.field(field).unwrap_or_default()
    }

    pub fn service_name(&self) -> Option<&str> {
        self.field(&SERVICE_NAME)
    }

    pub fn is_error(&self) -> bool {
        self.status_code == StatusCode::Error
    }

    /// Wall duration in microseconds (end - start)
    pub fn duration(&self) -> i64 {
        self.end_time - self.start_time
    }

    /// Map a document-store hit back to a span, marking it as replayed
    pub fn from_document(doc: Value) -> Option<Self> {
        let wire: WireSpan = match serde_json::from_value(doc) {
            Ok(w) => w,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping undecodable span document");
                return None;
            }
        };
        wire.into_standard().map(|mut span| {
            span.from_history = true;
            span
        })
    }
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

/// One queue message: `{ "data": [ ... ] }`
#[derive(Debug, Default, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub data: Vec<WireSpan>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireStatus {
    #[serde(default)]
    pub code: i32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireSpan {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub span_name: String,
    pub start_time: i64,
    pub end_time: i64,
    pub elapsed_time: i64,
    pub status: WireStatus,
    pub kind: i32,
    pub attributes: Map<String, Value>,
    pub resource: Map<String, Value>,
}

impl WireSpan {
    /// Normalize into a [`StandardSpan`]; `None` when the trace id is empty
    pub fn into_standard(self) -> Option<StandardSpan> {
        if self.trace_id.is_empty() {
            return None;
        }

        let kind = SpanKind::from(self.kind);
        let mut collections = FxHashMap::default();
        for field in STANDARD_FIELDS {
            let value = match field.source {
                FieldSource::Attributes => self.attributes.get(field.key).and_then(stringify),
                FieldSource::Resource => self.resource.get(field.key).and_then(stringify),
                FieldSource::Outer => match field.key {
                    "kind" => Some(i32::from(kind).to_string()),
                    "span_name" => Some(self.span_name.clone()),
                    _ => None,
                },
            };
            if let Some(value) = value
                && !value.is_empty()
            {
                collections.insert(field.display_key.to_string(), value);
            }
        }

        Some(StandardSpan {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            span_name: self.span_name,
            start_time: self.start_time,
            end_time: self.end_time,
            elapsed_time: self.elapsed_time,
            status_code: StatusCode::from(self.status.code),
            kind,
            collections,
            from_history: false,
        })
    }
}

/// Scalars become strings; objects, arrays and null are not standard values
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ============================================================================
// TEST HELPERS
// ============================================================================

#[cfg(test)]
pub(crate) fn test_span(span_id: &str, parent_span_id: &str, kind: SpanKind) -> StandardSpan {
    let mut collections = FxHashMap::default();
    collections.insert("kind".to_string(), i32::from(kind).to_string());
    collections.insert("span_name".to_string(), format!("op-{span_id}"));
    StandardSpan {
        trace_id: "trace-1".to_string(),
        span_id: span_id.to_string(),
        parent_span_id: parent_span_id.to_string(),
        span_name: format!("op-{span_id}"),
        start_time: 1_000,
        end_time: 2_000,
        elapsed_time: 1_000,
        status_code: StatusCode::Unset,
        kind,
        collections,
        from_history: false,
    }
}

#[cfg(test)]
impl StandardSpan {
    pub(crate) fn with_field(mut self, field: CommonField, value: &str) -> Self {
        self.collections
            .insert(field.display_key.to_string(), value.to_string());
        self
    }

    pub(crate) fn with_times(mut self, start: i64, end: i64) -> Self {
        self.start_time = start;
        self.end_time = end;
        self.elapsed_time = end - start;
        self
    }

    pub(crate) fn with_status(mut self, status: StatusCode) -> Self {
        self.status_code = status;
        self
    }

    pub(crate) fn with_trace_id(mut self, trace_id: &str) -> Self {
        self.trace_id = trace_id.to_string();
        self
    }
}
