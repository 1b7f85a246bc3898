//! Standard span fields, span categories and kind categories
//!
//! Every field a span carries after normalization is one of [`STANDARD_FIELDS`].
//! Fields are addressed by their display key: `attributes.<key>`,
//! `resource.<key>` or the bare key for outer span properties.

use serde::{Deserialize, Serialize};

use super::span::{SpanKind, StandardSpan};

// ============================================================================
// FIELDS
// ============================================================================

/// Where a field lives on the wire span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    Attributes,
    Resource,
    Outer,
}

/// A standard field with its wire key and flattened display key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonField {
    pub source: FieldSource,
    pub key: &'static str,
    pub display_key: &'static str,
}

macro_rules! attribute_field {
    ($key:literal) => {
        CommonField {
            source: FieldSource::Attributes,
            key: $key,
            display_key: concat!("attributes.", $key),
        }
    };
}

macro_rules! resource_field {
    ($key:literal) => {
        CommonField {
            source: FieldSource::Resource,
            key: $key,
            display_key: concat!("resource.", $key),
        }
    };
}

macro_rules! outer_field {
    ($key:literal) => {
        CommonField {
            source: FieldSource::Outer,
            key: $key,
            display_key: $key,
        }
    };
}

pub const HTTP_SCHEME: CommonField = attribute_field!("http.scheme");
pub const HTTP_FLAVOR: CommonField = attribute_field!("http.flavor");
pub const HTTP_METHOD: CommonField = attribute_field!("http.method");
pub const HTTP_STATUS_CODE: CommonField = attribute_field!("http.status_code");
pub const HTTP_HOST: CommonField = attribute_field!("http.host");
pub const HTTP_URL: CommonField = attribute_field!("http.url");
pub const NET_PEER_NAME: CommonField = attribute_field!("net.peer.name");
pub const PEER_SERVICE: CommonField = attribute_field!("peer.service");

pub const RPC_METHOD: CommonField = attribute_field!("rpc.method");
pub const RPC_SERVICE: CommonField = attribute_field!("rpc.service");
pub const RPC_SYSTEM: CommonField = attribute_field!("rpc.system");
pub const RPC_GRPC_STATUS_CODE: CommonField = attribute_field!("rpc.grpc.status_code");

pub const DB_NAME: CommonField = attribute_field!("db.name");
pub const DB_OPERATION: CommonField = attribute_field!("db.operation");
pub const DB_SYSTEM: CommonField = attribute_field!("db.system");
pub const DB_STATEMENT: CommonField = attribute_field!("db.statement");
pub const DB_TYPE: CommonField = attribute_field!("db.type");
pub const DB_INSTANCE: CommonField = attribute_field!("db.instance");

pub const MESSAGING_SYSTEM: CommonField = attribute_field!("messaging.system");
pub const MESSAGING_DESTINATION: CommonField = attribute_field!("messaging.destination");
pub const MESSAGING_DESTINATION_KIND: CommonField =
    attribute_field!("messaging.destination_kind");
pub const MESSAGING_RABBITMQ_ROUTING_KEY: CommonField =
    attribute_field!("messaging.rabbitmq.routing_key");
pub const MESSAGING_KAFKA_MESSAGE_KEY: CommonField =
    attribute_field!("messaging.kafka.message_key");
pub const MESSAGING_ROCKETMQ_MESSAGE_KEYS: CommonField =
    attribute_field!("messaging.rocketmq.message_keys");

pub const CELERY_ACTION: CommonField = attribute_field!("celery.action");
pub const CELERY_TASK_NAME: CommonField = attribute_field!("celery.task_name");

pub const SERVICE_NAME: CommonField = resource_field!("service.name");
pub const SERVICE_VERSION: CommonField = resource_field!("service.version");
pub const SERVICE_NAMESPACE: CommonField = resource_field!("service.namespace");
pub const SERVICE_INSTANCE_ID: CommonField = resource_field!("service.instance.id");
pub const TELEMETRY_SDK_LANGUAGE: CommonField = resource_field!("telemetry.sdk.language");
pub const TELEMETRY_SDK_NAME: CommonField = resource_field!("telemetry.sdk.name");
pub const TELEMETRY_SDK_VERSION: CommonField = resource_field!("telemetry.sdk.version");
pub const NET_HOST_IP: CommonField = resource_field!("net.host.ip");
pub const NET_HOST_PORT: CommonField = resource_field!("net.host.port");
pub const NET_HOST_NAME: CommonField = resource_field!("net.host.name");
pub const HOST_IP: CommonField = resource_field!("host.ip");
pub const BK_INSTANCE_ID: CommonField = resource_field!("bk.instance.id");
pub const K8S_BCS_CLUSTER_ID: CommonField = resource_field!("k8s.bcs.cluster.id");
pub const K8S_POD_NAME: CommonField = resource_field!("k8s.pod.name");
pub const K8S_NAMESPACE: CommonField = resource_field!("k8s.namespace.name");

pub const KIND: CommonField = outer_field!("kind");
pub const SPAN_NAME: CommonField = outer_field!("span_name");

/// Fields extracted onto every normalized span
pub const STANDARD_FIELDS: &[CommonField] = &[
    HTTP_SCHEME,
    HTTP_FLAVOR,
    HTTP_METHOD,
    HTTP_STATUS_CODE,
    HTTP_HOST,
    HTTP_URL,
    NET_PEER_NAME,
    PEER_SERVICE,
    RPC_METHOD,
    RPC_SERVICE,
    RPC_SYSTEM,
    RPC_GRPC_STATUS_CODE,
    DB_NAME,
    DB_OPERATION,
    DB_SYSTEM,
    DB_STATEMENT,
    DB_TYPE,
    DB_INSTANCE,
    MESSAGING_SYSTEM,
    MESSAGING_DESTINATION,
    MESSAGING_DESTINATION_KIND,
    MESSAGING_RABBITMQ_ROUTING_KEY,
    MESSAGING_KAFKA_MESSAGE_KEY,
    MESSAGING_ROCKETMQ_MESSAGE_KEYS,
    CELERY_ACTION,
    CELERY_TASK_NAME,
    SERVICE_NAME,
    SERVICE_VERSION,
    SERVICE_NAMESPACE,
    SERVICE_INSTANCE_ID,
    TELEMETRY_SDK_LANGUAGE,
    TELEMETRY_SDK_NAME,
    TELEMETRY_SDK_VERSION,
    NET_HOST_IP,
    NET_HOST_PORT,
    NET_HOST_NAME,
    HOST_IP,
    BK_INSTANCE_ID,
    K8S_BCS_CLUSTER_ID,
    K8S_POD_NAME,
    K8S_NAMESPACE,
    KIND,
    SPAN_NAME,
];

// ============================================================================
// CATEGORIES
// ============================================================================

/// Span category, inferred from which standard fields a span carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanCategory {
    Http,
    Rpc,
    Db,
    Messaging,
    AsyncBackend,
    Other,
}

impl SpanCategory {
    pub const ALL: [SpanCategory; 6] = [
        SpanCategory::Http,
        SpanCategory::Rpc,
        SpanCategory::Db,
        SpanCategory::Messaging,
        SpanCategory::AsyncBackend,
        SpanCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpanCategory::Http => "http",
            SpanCategory::Rpc => "rpc",
            SpanCategory::Db => "db",
            SpanCategory::Messaging => "messaging",
            SpanCategory::AsyncBackend => "async_backend",
            SpanCategory::Other => "other",
        }
    }
}

/// A category matches when any of `any_fields` is present and, if
/// `option_fields` is non-empty, at least one of those too.
pub struct CategoryPredicate {
    pub category: SpanCategory,
    pub any_fields: &'static [CommonField],
    pub option_fields: &'static [CommonField],
}

/// Predicates in match order; the first match wins
pub const CATEGORY_PREDICATES: &[CategoryPredicate] = &[
    CategoryPredicate {
        category: SpanCategory::Http,
        any_fields: &[
            HTTP_HOST,
            HTTP_URL,
            NET_PEER_NAME,
            PEER_SERVICE,
            HTTP_SCHEME,
            HTTP_FLAVOR,
            HTTP_METHOD,
            HTTP_STATUS_CODE,
        ],
        option_fields: &[],
    },
    CategoryPredicate {
        category: SpanCategory::Rpc,
        any_fields: &[RPC_METHOD, RPC_SERVICE, RPC_SYSTEM, RPC_GRPC_STATUS_CODE],
        option_fields: &[],
    },
    CategoryPredicate {
        category: SpanCategory::Db,
        any_fields: &[
            DB_NAME,
            DB_OPERATION,
            DB_SYSTEM,
            DB_STATEMENT,
            DB_TYPE,
            DB_INSTANCE,
        ],
        option_fields: &[],
    },
    CategoryPredicate {
        category: SpanCategory::Messaging,
        any_fields: &[
            MESSAGING_DESTINATION,
            MESSAGING_SYSTEM,
            MESSAGING_DESTINATION_KIND,
        ],
        option_fields: &[
            MESSAGING_RABBITMQ_ROUTING_KEY,
            MESSAGING_KAFKA_MESSAGE_KEY,
            MESSAGING_ROCKETMQ_MESSAGE_KEYS,
        ],
    },
    CategoryPredicate {
        category: SpanCategory::AsyncBackend,
        any_fields: &[
            MESSAGING_DESTINATION,
            MESSAGING_DESTINATION_KIND,
            MESSAGING_SYSTEM,
            CELERY_TASK_NAME,
            CELERY_ACTION,
        ],
        option_fields: &[],
    },
];

impl CategoryPredicate {
    pub fn matches(&self, span: &StandardSpan) -> bool {
        let has = |field: &CommonField| span.field(field).is_some();
        self.any_fields.iter().any(has)
            && (self.option_fields.is_empty() || self.option_fields.iter().any(has))
    }
}

/// Infer the category of a span. Spans matching no predicate are not
/// categorized and leave every statistic untouched.
pub fn infer_category(span: &StandardSpan) -> Option<SpanCategory> {
    CATEGORY_PREDICATES
        .iter()
        .find(|p| p.matches(span))
        .map(|p| p.category)
}

// ============================================================================
// KIND CATEGORIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKindCategory {
    Unspecified,
    Interval,
    Sync,
    Async,
}

impl SpanKindCategory {
    pub const ALL: [SpanKindCategory; 4] = [
        SpanKindCategory::Unspecified,
        SpanKindCategory::Interval,
        SpanKindCategory::Sync,
        SpanKindCategory::Async,
    ];
}

impl From<SpanKind> for SpanKindCategory {
    fn from(kind: SpanKind) -> Self {
        match kind {
            SpanKind::Unspecified => SpanKindCategory::Unspecified,
            SpanKind::Interval => SpanKindCategory::Interval,
            SpanKind::Server | SpanKind::Client => SpanKindCategory::Sync,
            SpanKind::Producer | SpanKind::Consumer => SpanKindCategory::Async,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traces::span::test_span;

    #[test]
    fn test_display_keys() {
        assert_eq!(HTTP_URL.display_key, "attributes.http.url");
        assert_eq!(SERVICE_NAME.display_key, "resource.service.name");
        assert_eq!(KIND.display_key, "kind");
        assert_eq!(SPAN_NAME.source, FieldSource::Outer);
    }

    #[test]
    fn test_standard_fields_unique() {
        let mut keys: Vec<_> = STANDARD_FIELDS.iter().map(|f| f.display_key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), STANDARD_FIELDS.len());
    }

    #[test]
    fn test_infer_http() {
        let span = test_span("s1", "", SpanKind::Server)
            .with_field(HTTP_METHOD, "GET")
            .with_field(DB_SYSTEM, "mysql");
        assert_eq!(infer_category(&span), Some(SpanCategory::Http));
    }

    #[test]
    fn test_infer_db() {
        let span = test_span("s1", "", SpanKind::Client).with_field(DB_SYSTEM, "redis");
        assert_eq!(infer_category(&span), Some(SpanCategory::Db));
    }

    #[test]
    fn test_messaging_requires_option_field() {
        let span = test_span("s1", "", SpanKind::Producer).with_field(MESSAGING_SYSTEM, "kafka");
        assert_eq!(infer_category(&span), Some(SpanCategory::AsyncBackend));

        let span = span.with_field(MESSAGING_KAFKA_MESSAGE_KEY, "order-1");
        assert_eq!(infer_category(&span), Some(SpanCategory::Messaging));
    }

    #[test]
    fn test_unmatched_span_has_no_category() {
        let span = test_span("s1", "", SpanKind::Interval);
        assert_eq!(infer_category(&span), None);
    }

    #[test]
    fn test_kind_category() {
        assert_eq!(
            SpanKindCategory::from(SpanKind::Client),
            SpanKindCategory::Sync
        );
        assert_eq!(
            SpanKindCategory::from(SpanKind::Consumer),
            SpanKindCategory::Async
        );
        assert_eq!(
            SpanKindCategory::from(SpanKind::Interval),
            SpanKindCategory::Interval
        );
    }

    #[test]
    fn test_category_serde() {
        let json = serde_json::to_string(&SpanCategory::AsyncBackend).unwrap();
        assert_eq!(json, r#""async_backend""#);
    }
}
