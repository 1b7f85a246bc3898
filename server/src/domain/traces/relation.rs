//! Relation and flow metrics derived from a finalized trace graph
//!
//! Relation samples describe static topology (service ↔ instance, instance ↔
//! pod or host) and are deduplicated per trace with value 1. Flow samples
//! describe calls between two endpoints and are emitted as histograms:
//! `{name}_count`, `{name}_sum` (seconds) and cumulative `{name}_bucket`
//! samples labelled with `le`.

use std::collections::{BTreeMap, BTreeSet};

use super::fields::{
    BK_INSTANCE_ID, DB_SYSTEM, HOST_IP, K8S_BCS_CLUSTER_ID, K8S_NAMESPACE, K8S_POD_NAME,
    MESSAGING_SYSTEM, NET_HOST_IP, NET_HOST_NAME, PEER_SERVICE,
};
use super::graph::DiGraph;
use super::span::{SpanKind, StandardSpan};
use crate::data::sink::MetricSample;

pub const SERVICE_INSTANCE_RELATION: &str = "apm_service_with_apm_service_instance_relation";
pub const INSTANCE_K8S_RELATION: &str = "apm_service_instance_with_k8s_address_relation";
pub const INSTANCE_SYSTEM_RELATION: &str = "apm_service_instance_with_system_relation";

pub const SERVICE_FLOW: &str = "apm_service_to_apm_service_flow";
pub const SYSTEM_SERVICE_FLOW: &str = "system_to_apm_service_flow";
pub const SERVICE_SYSTEM_FLOW: &str = "apm_service_to_system_flow";
pub const SYSTEM_FLOW: &str = "system_to_system_flow";

const VIRTUAL_CALLEE: &str = "bk_vServiceCallee";
const VIRTUAL_CALLER: &str = "bk_vServiceCaller";
const VIRTUAL_SPAN: &str = "bk_vSpan";

const CATEGORY_HTTP: &str = "http";
const CATEGORY_DB: &str = "db";
const CATEGORY_MESSAGING: &str = "messaging";

const KIND_SERVICE: &str = "service";
const KIND_VIRTUAL_SERVICE: &str = "virtual_service";
const KIND_COMPONENT: &str = "component";
const KIND_CUSTOM_SERVICE: &str = "custom_service";

type Labels = BTreeMap<String, String>;

/// One side of a flow
struct Endpoint {
    span_name: String,
    service: String,
    category: &'static str,
    kind: &'static str,
    span_kind: SpanKind,
}

impl Endpoint {
    fn service(span: &StandardSpan) -> Self {
        Self {
            span_name: span.span_name.clone(),
            service: span.service_name().unwrap_or_default().to_string(),
            category: CATEGORY_HTTP,
            kind: KIND_SERVICE,
            span_kind: span.kind,
        }
    }

    /// Synthetic peer standing in for the unseen side of `span`
    fn peer(
        span: &StandardSpan,
        service: String,
        category: &'static str,
        kind: &'static str,
    ) -> Self {
        Self {
            span_name: format!("{}-{}", span.span_name, VIRTUAL_SPAN),
            service,
            category,
            kind,
            span_kind: span.kind.opposite(),
        }
    }

    fn write(&self, prefix: &str, app_name: &str, labels: &mut Labels) {
        let mut put = |key: &str, value: String| {
            labels.insert(format!("{prefix}_{key}"), value);
        };
        put("span_name", self.span_name.clone());
        put("apm_service_name", self.service.clone());
        put("apm_application_name", app_name.to_string());
        put("apm_service_category", self.category.to_string());
        put("apm_service_kind", self.kind.to_string());
        put("apm_service_span_kind", i32::from(self.span_kind).to_string());
    }
}

fn labels_of<const N: usize>(pairs: [(&str, &str); N]) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Default)]
struct Discovery {
    relations: BTreeSet<(&'static str, Labels)>,
    /// Observed durations in microseconds per flow series
    flows: BTreeMap<(&'static str, Labels), Vec<i64>>,
    found: BTreeMap<&'static str, u64>,
}

impl Discovery {
    fn relation(&mut self, name: &'static str, labels: Labels) {
        if self.relations.insert((name, labels)) {
            *self.found.entry(name).or_default() += 1;
        }
    }

    fn flow(&mut self, name: &'static str, labels: Labels, duration_us: i64) {
        self.flows.entry((name, labels)).or_default().push(duration_us);
        *self.found.entry(name).or_default() += 1;
    }
}

/// Builds relation and flow samples for one data source
pub struct RelationMetricsBuilder {
    data_id: String,
    app_name: String,
    layer4_enabled: bool,
    /// Ascending bucket bounds in seconds
    duration_buckets: Vec<f64>,
}

impl RelationMetricsBuilder {
    pub fn new(
        data_id: &str,
        app_name: &str,
        layer4_enabled: bool,
        duration_buckets: Vec<f64>,
    ) -> Self {
        Self {
            data_id: data_id.to_string(),
            app_name: app_name.to_string(),
            layer4_enabled,
            duration_buckets,
        }
    }

    /// All samples for a graph whose edges are fresh
    pub fn build(&self, graph: &DiGraph, timestamp_ms: i64) -> Vec<MetricSample> {
        let mut discovery = Discovery::default();
        let mut flow_handled = BTreeSet::new();

        for span in graph.spans() {
            self.span_relations(span, &mut discovery);
            if self.component_flow(span, &mut discovery) {
                flow_handled.insert(span.span_id.as_str());
            }
            if self.custom_service_flow(span, &mut discovery) {
                flow_handled.insert(span.span_id.as_str());
            }
        }

        let (pairs, alone) = graph.find_call_pairs_and_alone();
        for (caller, callee) in pairs {
            self.pair_flows(caller, callee, &mut discovery);
        }
        for span in alone {
            if !flow_handled.contains(span.span_id.as_str()) {
                self.alone_flow(span, &mut discovery);
            }
        }

        for (name, count) in &discovery.found {
            metrics::counter!(
                "precalc_relation_metrics_found_total",
                "data_id" => self.data_id.clone(),
                "metric" => *name
            )
            .increment(*count);
        }

        let mut samples: Vec<MetricSample> = discovery
            .relations
            .into_iter()
            .map(|(name, labels)| MetricSample::new(name, labels, 1.0, timestamp_ms))
            .collect();
        for ((name, labels), durations) in discovery.flows {
            self.histogram(name, labels, &durations, timestamp_ms, &mut samples);
        }
        samples
    }

    fn span_relations(&self, span: &StandardSpan, discovery: &mut Discovery) {
        let service = span.service_name().unwrap_or_default();
        let instance = span.field_value(&BK_INSTANCE_ID);
        let app = self.app_name.as_str();

        discovery.relation(
            SERVICE_INSTANCE_RELATION,
            labels_of([
                ("apm_service_name", service),
                ("apm_application_name", app),
                ("apm_service_instance_name", instance),
            ]),
        );

        match span.field(&K8S_BCS_CLUSTER_ID) {
            Some(cluster_id) => {
                let pod = span
                    .field_any(&[K8S_POD_NAME, NET_HOST_NAME])
                    .unwrap_or_default();
                discovery.relation(
                    INSTANCE_K8S_RELATION,
                    labels_of([
                        ("apm_service_name", service),
                        ("apm_application_name", app),
                        ("apm_service_instance_name", instance),
                        ("bcs_cluster_id", cluster_id),
                        ("namespace", span.field_value(&K8S_NAMESPACE)),
                        ("pod", pod),
                    ]),
                );
            }
            None => {
                let ip = span.field_any(&[NET_HOST_IP, HOST_IP]).unwrap_or_default();
                discovery.relation(
                    INSTANCE_SYSTEM_RELATION,
                    labels_of([
                        ("apm_service_name", service),
                        ("apm_application_name", app),
                        ("apm_service_instance_name", instance),
                        ("bk_target_ip", ip),
                    ]),
                );
            }
        }
    }

    /// Calls into a db or message queue. Returns true when the span names a
    /// component system, even if no flow could be oriented.
    fn component_flow(&self, span: &StandardSpan, discovery: &mut Discovery) -> bool {
        let db_system = span.field(&DB_SYSTEM);
        let mq_system = span.field(&MESSAGING_SYSTEM);
        if db_system.is_none() && mq_system.is_none() {
            return false;
        }

        let service = span.service_name().unwrap_or_default();
        let (from, to) = match (db_system, mq_system) {
            (Some(db), _) if span.kind.is_caller() => {
                let peer = Endpoint::peer(
                    span,
                    format!("{service}-{db}"),
                    CATEGORY_DB,
                    KIND_COMPONENT,
                );
                (Endpoint::service(span), peer)
            }
            (_, Some(mq)) if span.kind.is_caller() => {
                let peer = Endpoint::peer(
                    span,
                    format!("{service}-{mq}"),
                    CATEGORY_MESSAGING,
                    KIND_COMPONENT,
                );
                (Endpoint::service(span), peer)
            }
            (_, Some(mq)) if span.kind.is_called() => {
                let peer = Endpoint::peer(
                    span,
                    format!("{service}-{mq}"),
                    CATEGORY_MESSAGING,
                    KIND_COMPONENT,
                );
                (peer, Endpoint::service(span))
            }
            _ => return true,
        };

        let labels = self.flow_labels(&from, &to, span.is_error(), span.is_error());
        discovery.flow(SERVICE_FLOW, labels, span.duration());
        true
    }

    /// Calls to a service named by `peer.service`
    fn custom_service_flow(&self, span: &StandardSpan, discovery: &mut Discovery) -> bool {
        let Some(peer) = span.field(&PEER_SERVICE) else {
            return false;
        };

        let to = Endpoint {
            span_name: span.span_name.clone(),
            service: format!("{CATEGORY_HTTP}:{peer}"),
            category: CATEGORY_HTTP,
            kind: KIND_CUSTOM_SERVICE,
            span_kind: span.kind.opposite(),
        };
        let labels = self.flow_labels(
            &Endpoint::service(span),
            &to,
            span.is_error(),
            span.is_error(),
        );
        discovery.flow(SERVICE_FLOW, labels, span.duration());
        true
    }

    fn pair_flows(&self, caller: &StandardSpan, callee: &StandardSpan, discovery: &mut Discovery) {
        let duration = if caller.kind == SpanKind::Client {
            caller.duration()
        } else {
            (callee.start_time - caller.start_time).abs()
        };
        let (caller_error, callee_error) = (caller.is_error(), callee.is_error());
        let from = Endpoint::service(caller);
        let to = Endpoint::service(callee);

        if !from.service.is_empty() && !to.service.is_empty() {
            let labels = self.flow_labels(&from, &to, caller_error, callee_error);
            discovery.flow(SERVICE_FLOW, labels, duration);
        }

        if !self.layer4_enabled {
            return;
        }

        let caller_ip = caller.field_any(&[NET_HOST_IP, HOST_IP]);
        let callee_ip = callee.field_any(&[NET_HOST_IP, HOST_IP]);

        if let Some(ip) = caller_ip {
            let mut labels = Labels::new();
            labels.insert("from_bk_target_ip".to_string(), ip.to_string());
            to.write("to", &self.app_name, &mut labels);
            add_errors(&mut labels, caller_error, callee_error);
            discovery.flow(SYSTEM_SERVICE_FLOW, labels, duration);
        }
        if let Some(ip) = callee_ip {
            let mut labels = Labels::new();
            from.write("from", &self.app_name, &mut labels);
            labels.insert("to_bk_target_ip".to_string(), ip.to_string());
            add_errors(&mut labels, caller_error, callee_error);
            discovery.flow(SERVICE_SYSTEM_FLOW, labels, duration);
        }
        if let (Some(from_ip), Some(to_ip)) = (caller_ip, callee_ip) {
            let mut labels =
                labels_of([("from_bk_target_ip", from_ip), ("to_bk_target_ip", to_ip)]);
            add_errors(&mut labels, caller_error, callee_error);
            discovery.flow(SYSTEM_FLOW, labels, duration);
        }
    }

    /// A caller or callee with no peer in this trace gets a virtual one
    fn alone_flow(&self, span: &StandardSpan, discovery: &mut Discovery) {
        let service = span.service_name().unwrap_or_default();
        let (from, to) = if span.kind.is_caller() {
            let peer = Endpoint::peer(
                span,
                format!("{service}-{VIRTUAL_CALLEE}"),
                CATEGORY_HTTP,
                KIND_VIRTUAL_SERVICE,
            );
            (Endpoint::service(span), peer)
        } else {
            let peer = Endpoint::peer(
                span,
                format!("{service}-{VIRTUAL_CALLER}"),
                CATEGORY_HTTP,
                KIND_VIRTUAL_SERVICE,
            );
            (peer, Endpoint::service(span))
        };

        let labels = self.flow_labels(&from, &to, span.is_error(), span.is_error());
        discovery.flow(SERVICE_FLOW, labels, span.duration());
    }

    fn flow_labels(
        &self,
        from: &Endpoint,
        to: &Endpoint,
        from_error: bool,
        to_error: bool,
    ) -> Labels {
        let mut labels = Labels::new();
        from.write("from", &self.app_name, &mut labels);
        to.write("to", &self.app_name, &mut labels);
        add_errors(&mut labels, from_error, to_error);
        labels
    }

    fn histogram(
        &self,
        name: &str,
        labels: Labels,
        durations_us: &[i64],
        timestamp_ms: i64,
        out: &mut Vec<MetricSample>,
    ) {
        let seconds: Vec<f64> = durations_us.iter().map(|&d| d as f64 / 1_000_000.0).collect();

        for &bound in &self.duration_buckets {
            let count = seconds.iter().filter(|&&s| s <= bound).count();
            let mut bucket_labels = labels.clone();
            bucket_labels.insert("le".to_string(), bound.to_string());
            out.push(MetricSample::new(
                format!("{name}_bucket"),
                bucket_labels,
                count as f64,
                timestamp_ms,
            ));
        }
        let mut inf_labels = labels.clone();
        inf_labels.insert("le".to_string(), "+Inf".to_string());
        out.push(MetricSample::new(
            format!("{name}_bucket"),
            inf_labels,
            seconds.len() as f64,
            timestamp_ms,
        ));

        out.push(MetricSample::new(
            format!("{name}_sum"),
            labels.clone(),
            seconds.iter().sum(),
            timestamp_ms,
        ));
        out.push(MetricSample::new(
            format!("{name}_count"),
            labels,
            seconds.len() as f64,
            timestamp_ms,
        ));
    }
}

fn add_errors(labels: &mut Labels, from_error: bool, to_error: bool) {
    labels.insert("from_span_error".to_string(), from_error.to_string());
    labels.insert("to_span_error".to_string(), to_error.to_string());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::traces::fields::SERVICE_NAME;
    use crate::domain::traces::span::{StatusCode, test_span};

    fn builder(layer4: bool) -> RelationMetricsBuilder {
        RelationMetricsBuilder::new("1001", "shop", layer4, vec![0.1, 1.0])
    }

    fn graph_of(spans: Vec<StandardSpan>) -> DiGraph {
        let mut graph = DiGraph::new();
        for span in spans {
            graph.add_node(Arc::new(span));
        }
        graph.refresh_edges();
        graph
    }

    fn service_span(id: &str, parent: &str, kind: SpanKind, service: &str) -> StandardSpan {
        test_span(id, parent, kind).with_field(SERVICE_NAME, service)
    }

    fn named<'a>(samples: &'a [MetricSample], name: &str) -> Vec<&'a MetricSample> {
        samples.iter().filter(|s| s.name == name).collect()
    }

    fn label<'a>(sample: &'a MetricSample, key: &str) -> &'a str {
        sample.labels.get(key).map(String::as_str).unwrap_or_default()
    }

    #[test]
    fn test_relations_deduplicated_per_trace() {
        let graph = graph_of(vec![
            service_span("a", "", SpanKind::Server, "api").with_field(NET_HOST_IP, "10.0.0.1"),
            service_span("b", "a", SpanKind::Interval, "api").with_field(NET_HOST_IP, "10.0.0.1"),
        ]);
        let samples = builder(false).build(&graph, 1);

        let instance = named(&samples, SERVICE_INSTANCE_RELATION);
        assert_eq!(instance.len(), 1);
        assert_eq!(instance[0].value, 1.0);

        let system = named(&samples, INSTANCE_SYSTEM_RELATION);
        assert_eq!(system.len(), 1);
        assert_eq!(label(system[0], "bk_target_ip"), "10.0.0.1");
        assert!(named(&samples, INSTANCE_K8S_RELATION).is_empty());
    }

    #[test]
    fn test_k8s_relation_pod_falls_back_to_host_name() {
        let graph = graph_of(vec![
            service_span("a", "", SpanKind::Server, "api")
                .with_field(K8S_BCS_CLUSTER_ID, "BCS-K8S-1")
                .with_field(NET_HOST_NAME, "node-1"),
        ]);
        let samples = builder(false).build(&graph, 1);

        let k8s = named(&samples, INSTANCE_K8S_RELATION);
        assert_eq!(k8s.len(), 1);
        assert_eq!(label(k8s[0], "pod"), "node-1");
        assert!(named(&samples, INSTANCE_SYSTEM_RELATION).is_empty());
    }

    #[test]
    fn test_client_server_pair_flow() {
        let graph = graph_of(vec![
            service_span("c", "", SpanKind::Client, "web").with_times(0, 200_000),
            service_span("s", "c", SpanKind::Server, "api").with_times(10_000, 150_000),
        ]);
        let samples = builder(false).build(&graph, 1);

        let count = named(&samples, "apm_service_to_apm_service_flow_count");
        assert_eq!(count.len(), 1);
        assert_eq!(count[0].value, 1.0);
        assert_eq!(label(count[0], "from_apm_service_name"), "web");
        assert_eq!(label(count[0], "to_apm_service_name"), "api");
        assert_eq!(label(count[0], "from_apm_service_span_kind"), "3");
        assert_eq!(label(count[0], "to_apm_service_span_kind"), "2");

        // Client duration 0.2s: above 0.1, within 1.0
        let sum = named(&samples, "apm_service_to_apm_service_flow_sum");
        assert!((sum[0].value - 0.2).abs() < 1e-9);
        let buckets = named(&samples, "apm_service_to_apm_service_flow_bucket");
        assert_eq!(buckets.len(), 3);
        let by_le: BTreeMap<&str, f64> = buckets
            .iter()
            .map(|s| (label(s, "le"), s.value))
            .collect();
        assert_eq!(by_le["0.1"], 0.0);
        assert_eq!(by_le["1"], 1.0);
        assert_eq!(by_le["+Inf"], 1.0);
    }

    #[test]
    fn test_async_pair_uses_start_gap() {
        let graph = graph_of(vec![
            service_span("p", "", SpanKind::Producer, "web").with_times(1_000_000, 1_000_100),
            service_span("q", "p", SpanKind::Consumer, "worker").with_times(1_500_000, 1_600_000),
        ]);
        let samples = builder(false).build(&graph, 1);

        let sum = named(&samples, "apm_service_to_apm_service_flow_sum");
        assert_eq!(sum.len(), 1);
        assert!((sum[0].value - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_db_component_flow_replaces_virtual_peer() {
        let graph = graph_of(vec![
            service_span("c", "", SpanKind::Client, "api").with_field(DB_SYSTEM, "mysql"),
        ]);
        let samples = builder(false).build(&graph, 1);

        let count = named(&samples, "apm_service_to_apm_service_flow_count");
        assert_eq!(count.len(), 1);
        assert_eq!(label(count[0], "to_apm_service_name"), "api-mysql");
        assert_eq!(label(count[0], "to_apm_service_kind"), KIND_COMPONENT);
        assert_eq!(label(count[0], "to_apm_service_category"), CATEGORY_DB);
    }

    #[test]
    fn test_messaging_consumer_component_flow() {
        let graph = graph_of(vec![
            service_span("q", "", SpanKind::Consumer, "worker")
                .with_field(MESSAGING_SYSTEM, "kafka"),
        ]);
        let samples = builder(false).build(&graph, 1);

        let count = named(&samples, "apm_service_to_apm_service_flow_count");
        assert_eq!(count.len(), 1);
        assert_eq!(label(count[0], "from_apm_service_name"), "worker-kafka");
        assert_eq!(label(count[0], "from_apm_service_span_kind"), "4");
        assert_eq!(label(count[0], "to_apm_service_name"), "worker");
    }

    #[test]
    fn test_alone_spans_get_virtual_peers() {
        let graph = graph_of(vec![
            service_span("s", "", SpanKind::Server, "api"),
            service_span("c", "s", SpanKind::Client, "api"),
        ]);
        let samples = builder(false).build(&graph, 1);

        let counts = named(&samples, "apm_service_to_apm_service_flow_count");
        assert_eq!(counts.len(), 2);
        assert!(counts.iter().any(|s| {
            label(s, "from_apm_service_name") == "api-bk_vServiceCaller"
                && label(s, "to_apm_service_name") == "api"
        }));
        assert!(counts.iter().any(|s| {
            label(s, "to_apm_service_name") == "api-bk_vServiceCallee"
                && label(s, "to_span_name") == "op-c-bk_vSpan"
                && label(s, "to_apm_service_kind") == KIND_VIRTUAL_SERVICE
        }));
    }

    #[test]
    fn test_custom_service_flow() {
        let graph = graph_of(vec![
            service_span("c", "", SpanKind::Client, "api")
                .with_field(PEER_SERVICE, "payments")
                .with_status(StatusCode::Error),
        ]);
        let samples = builder(false).build(&graph, 1);

        let counts = named(&samples, "apm_service_to_apm_service_flow_count");
        assert_eq!(counts.len(), 1);
        assert_eq!(label(counts[0], "to_apm_service_name"), "http:payments");
        assert_eq!(label(counts[0], "to_span_name"), "op-c");
        assert_eq!(label(counts[0], "from_span_error"), "true");
    }

    #[test]
    fn test_layer4_flows_only_when_enabled() {
        let spans = || {
            vec![
                service_span("c", "", SpanKind::Client, "web").with_field(NET_HOST_IP, "10.0.0.1"),
                service_span("s", "c", SpanKind::Server, "api").with_field(HOST_IP, "10.0.0.2"),
            ]
        };

        let samples = builder(false).build(&graph_of(spans()), 1);
        assert!(named(&samples, "system_to_system_flow_count").is_empty());

        let samples = builder(true).build(&graph_of(spans()), 1);
        let system = named(&samples, "system_to_system_flow_count");
        assert_eq!(system.len(), 1);
        assert_eq!(label(system[0], "from_bk_target_ip"), "10.0.0.1");
        assert_eq!(label(system[0], "to_bk_target_ip"), "10.0.0.2");
        assert_eq!(named(&samples, "system_to_apm_service_flow_count").len(), 1);
        assert_eq!(named(&samples, "apm_service_to_system_flow_count").len(), 1);
    }
}
