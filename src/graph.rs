//! Service-dependency graph builder.
//!
//! Aggregates spans over a window into a directed multigraph of services.
//! Server and internal spans are passive; client and producer spans emit an
//! edge toward their resolved peer, consumer spans emit the reversed edge so
//! the graph shows logical producer→consumer flow. A messaging destination
//! seen from both sides is collapsed into a direct producer→consumer edge.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::models::attr::AttributeValue;
use crate::models::span::{Span, KIND_CLIENT, KIND_CONSUMER, KIND_PRODUCER};
use crate::scan::ScanBudget;
use crate::store::{counters, IndexStore, KIND_SPAN};

pub const NODE_SERVICE: &str = "service";
pub const NODE_DATABASE: &str = "database";
pub const NODE_MESSAGING: &str = "messaging-system";
pub const NODE_EXTERNAL: &str = "external";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub call_count: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// How a peer was resolved; decides node-type marks and the collapse pass.
enum PeerKind {
    Service,
    Database(String),
    Messaging(String),
    Address,
}

/// Resolve the remote side of a span, in the documented precedence order.
fn resolve_peer(span: &Span) -> Option<(String, PeerKind)> {
    if let Some(peer) = span.attr("peer.service").and_then(AttributeValue::as_str) {
        return Some((peer.to_string(), PeerKind::Service));
    }
    if let Some(system) = span.attr("db.system").and_then(AttributeValue::as_str) {
        let id = match span.attr("db.name").and_then(AttributeValue::as_str) {
            Some(name) => format!("{name}:{system}"),
            None => system.to_string(),
        };
        return Some((id, PeerKind::Database(system.to_string())));
    }
    if let Some(system) = span.attr("messaging.system").and_then(AttributeValue::as_str) {
        let id = match span
            .attr("messaging.destination.name")
            .and_then(AttributeValue::as_str)
        {
            Some(dest) => format!("{dest}:{system}"),
            None => system.to_string(),
        };
        return Some((id, PeerKind::Messaging(system.to_string())));
    }
    for key in ["server.address", "net.peer.name", "http.host"] {
        if let Some(addr) = span.attr(key).and_then(AttributeValue::as_str) {
            return Some((addr.to_string(), PeerKind::Address));
        }
    }
    None
}

/// Build the graph from spans in `[since_ns, until_ns]`. Truncated scans
/// produce a graph over the spans seen so far.
pub fn build_service_graph(
    store: &IndexStore,
    since_ns: i64,
    until_ns: i64,
    budget: &mut ScanBudget,
) -> CoreResult<ServiceGraph> {
    let mut edges: HashMap<(String, String), (u64, u64)> = HashMap::new();
    let mut local_services: HashSet<String> = HashSet::new();
    let mut db_marks: HashMap<String, String> = HashMap::new();
    let mut messaging_marks: HashMap<String, String> = HashMap::new();
    let mut destinations: HashSet<String> = HashSet::new();

    let mut after: Option<(i64, String)> = None;
    'scan: loop {
        let page = store.range_by_time(KIND_SPAN, since_ns, until_ns, after.as_ref(), 512, true)?;
        if page.is_empty() {
            break;
        }
        after = page.last().cloned();

        for (_, span_id) in &page {
            if !budget.consume(1) {
                break 'scan;
            }
            let Some(span) = store.get_span(span_id)? else {
                continue;
            };
            let service = span.service_name().to_string();
            local_services.insert(service.clone());

            let (source, target) = match span.kind {
                KIND_CLIENT | KIND_PRODUCER | KIND_CONSUMER => {
                    let Some((peer, peer_kind)) = resolve_peer(&span) else {
                        store.incr_counter(counters::UNRESOLVED_PEER, 1)?;
                        tracing::debug!(span_id = %span.span_id, "edge dropped: unresolved peer");
                        continue;
                    };
                    match peer_kind {
                        PeerKind::Database(system) => {
                            db_marks.insert(peer.clone(), system);
                        }
                        PeerKind::Messaging(system) => {
                            messaging_marks.insert(peer.clone(), system);
                            destinations.insert(peer.clone());
                        }
                        PeerKind::Service | PeerKind::Address => {}
                    }
                    if span.kind == KIND_CONSUMER {
                        (peer, service)
                    } else {
                        (service, peer)
                    }
                }
                // server, internal, unspecified: passive
                _ => continue,
            };

            let entry = edges.entry((source, target)).or_insert((0, 0));
            entry.0 += 1;
            if span.is_error() {
                entry.1 += 1;
            }
        }
    }

    // Collapse messaging destinations seen from both sides into direct
    // producer→consumer edges; the consumer side carries the counts (one
    // consumption = one delivery).
    for dest in &destinations {
        let inbound: Vec<(String, String)> = edges
            .keys()
            .filter(|(_, t)| t == dest)
            .cloned()
            .collect();
        let outbound: Vec<(String, String)> = edges
            .keys()
            .filter(|(s, _)| s == dest)
            .cloned()
            .collect();
        if inbound.is_empty() || outbound.is_empty() {
            continue;
        }
        let consumed: Vec<(String, (u64, u64))> = outbound
            .iter()
            .map(|k| (k.1.clone(), edges[k]))
            .collect();
        for (producer, _) in &inbound {
            for (consumer, counts) in &consumed {
                let entry = edges
                    .entry((producer.clone(), consumer.clone()))
                    .or_insert((0, 0));
                entry.0 += counts.0;
                entry.1 += counts.1;
            }
        }
        edges.retain(|(s, t), _| s != dest && t != dest);
        messaging_marks.remove(dest);
    }

    // Node inventory: every local service plus every peer left in an edge.
    let mut node_ids: HashSet<String> = local_services.clone();
    let mut sources: HashSet<&String> = HashSet::new();
    let mut targets: HashSet<&String> = HashSet::new();
    for (s, t) in edges.keys() {
        node_ids.insert(s.clone());
        node_ids.insert(t.clone());
    }
    for (s, t) in edges.keys() {
        sources.insert(s);
        targets.insert(t);
    }

    let mut nodes: Vec<GraphNode> = node_ids
        .into_iter()
        .map(|id| {
            let mut attributes = HashMap::new();
            let node_type = if let Some(system) = db_marks.get(&id) {
                attributes.insert("db.system".to_string(), system.clone());
                NODE_DATABASE
            } else if let Some(system) = messaging_marks.get(&id) {
                attributes.insert("messaging.system".to_string(), system.clone());
                NODE_MESSAGING
            } else if !local_services.contains(&id)
                && targets.contains(&id)
                && !sources.contains(&id)
            {
                NODE_EXTERNAL
            } else {
                NODE_SERVICE
            };
            GraphNode { id, node_type: node_type.to_string(), attributes }
        })
        .collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut edge_list: Vec<GraphEdge> = edges
        .into_iter()
        .map(|((source, target), (call_count, error_count))| GraphEdge {
            source,
            target,
            call_count,
            error_count,
        })
        .collect();
    edge_list.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

    Ok(ServiceGraph { nodes, edges: edge_list })
}

/// Window-scoped cached build: consecutive requests inside the cache TTL get
/// the same structure back; invalidation is TTL-only.
pub fn service_graph_cached(
    store: &IndexStore,
    cache_ttl_s: u64,
    since_ns: i64,
    until_ns: i64,
    window_tag: &str,
    budget: &mut ScanBudget,
) -> CoreResult<ServiceGraph> {
    let cache_key = format!("graph:{window_tag}");
    if let Some(bytes) = store.cache_get(&cache_key)? {
        if let Ok(graph) = serde_json::from_slice::<ServiceGraph>(&bytes) {
            return Ok(graph);
        }
    }
    let graph = build_service_graph(store, since_ns, until_ns, budget)?;
    if let Ok(bytes) = serde_json::to_vec(&graph) {
        store.cache_put(&cache_key, bytes, cache_ttl_s)?;
    }
    Ok(graph)
}

/// Query-side self-telemetry filter: drops the named nodes and every incident
/// edge, after graph construction. Never applied at ingest.
pub fn hide_services(graph: ServiceGraph, hidden: &[String]) -> ServiceGraph {
    if hidden.is_empty() {
        return graph;
    }
    let hidden: HashSet<&str> = hidden.iter().map(String::as_str).collect();
    ServiceGraph {
        nodes: graph
            .nodes
            .into_iter()
            .filter(|n| !hidden.contains(n.id.as_str()))
            .collect(),
        edges: graph
            .edges
            .into_iter()
            .filter(|e| !hidden.contains(e.source.as_str()) && !hidden.contains(e.target.as_str()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::span::{KIND_INTERNAL, KIND_SERVER, STATUS_ERROR};
    use crate::serializer::Serializer;
    use crate::store::kv::Kv;
    use crate::test_support::{attr, span_with_attrs};
    use std::sync::Arc;

    fn store() -> IndexStore {
        IndexStore::new(Arc::new(Kv::new()), Serializer::new(512, 3), 60)
    }

    fn put(st: &IndexStore, span: &crate::models::span::Span) {
        let bytes = st.serializer().encode(span).unwrap();
        let mut p = st.pipeline();
        p.put_record(KIND_SPAN, &span.span_id, bytes);
        p.add_to_timeline(KIND_SPAN, &span.span_id, span.start_time_ns);
        st.commit(p).unwrap();
    }

    fn budget() -> ScanBudget {
        ScanBudget::new(100_000, None)
    }

    fn build(st: &IndexStore) -> ServiceGraph {
        build_service_graph(st, 0, i64::MAX, &mut budget()).unwrap()
    }

    #[test]
    fn client_span_edges_to_peer_service() {
        let st = store();
        let mut s = span_with_attrs("frontend", KIND_CLIENT, vec![attr("peer.service", "cart")]);
        s.span_id = "01".repeat(8);
        put(&st, &s);

        let g = build(&st);
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].source, "frontend");
        assert_eq!(g.edges[0].target, "cart");
        assert_eq!(g.edges[0].call_count, 1);
    }

    #[test]
    fn server_and_internal_spans_are_passive() {
        let st = store();
        let mut a = span_with_attrs("api", KIND_SERVER, vec![attr("peer.service", "x")]);
        a.span_id = "02".repeat(8);
        put(&st, &a);
        let mut b = span_with_attrs("api", KIND_INTERNAL, vec![]);
        b.span_id = "03".repeat(8);
        put(&st, &b);

        let g = build(&st);
        assert!(g.edges.is_empty());
        // the service still shows up as a node
        assert_eq!(g.nodes.len(), 1);
        assert_eq!(g.nodes[0].id, "api");
        assert_eq!(g.nodes[0].node_type, NODE_SERVICE);
    }

    #[test]
    fn kafka_pair_collapses_to_producer_consumer_edge() {
        // producer orders -> topic, consumer billing <- topic, either order
        for flip in [false, true] {
            let st = store();
            let mut producer = span_with_attrs(
                "orders",
                KIND_PRODUCER,
                vec![
                    attr("messaging.system", "kafka"),
                    attr("messaging.destination.name", "new-orders"),
                ],
            );
            producer.span_id = "aa".repeat(8);
            producer.start_time_ns = if flip { 2000 } else { 1000 };
            let mut consumer = span_with_attrs(
                "billing",
                KIND_CONSUMER,
                vec![
                    attr("messaging.system", "kafka"),
                    attr("messaging.destination.name", "new-orders"),
                ],
            );
            consumer.span_id = "bb".repeat(8);
            consumer.start_time_ns = if flip { 1000 } else { 2000 };

            put(&st, &producer);
            put(&st, &consumer);

            let g = build(&st);
            let ids: Vec<&str> = g.nodes.iter().map(|n| n.id.as_str()).collect();
            assert_eq!(ids, vec!["billing", "orders"], "flip={flip}");
            assert_eq!(g.edges.len(), 1, "flip={flip}");
            assert_eq!(g.edges[0].source, "orders");
            assert_eq!(g.edges[0].target, "billing");
            assert_eq!(g.edges[0].call_count, 1);
        }
    }

    #[test]
    fn lone_producer_keeps_messaging_node() {
        let st = store();
        let mut producer = span_with_attrs(
            "orders",
            KIND_PRODUCER,
            vec![
                attr("messaging.system", "kafka"),
                attr("messaging.destination.name", "new-orders"),
            ],
        );
        producer.span_id = "cc".repeat(8);
        put(&st, &producer);

        let g = build(&st);
        let topic = g.nodes.iter().find(|n| n.id == "new-orders:kafka").unwrap();
        assert_eq!(topic.node_type, NODE_MESSAGING);
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].target, "new-orders:kafka");
    }

    #[test]
    fn database_peer_is_typed_and_counted_for_errors() {
        let st = store();
        let mut ok = span_with_attrs(
            "api",
            KIND_CLIENT,
            vec![attr("db.system", "postgresql"), attr("db.name", "orders")],
        );
        ok.span_id = "dd".repeat(8);
        put(&st, &ok);
        let mut failed = ok.clone();
        failed.span_id = "ee".repeat(8);
        failed.status_code = STATUS_ERROR;
        put(&st, &failed);

        let g = build(&st);
        let db = g.nodes.iter().find(|n| n.id == "orders:postgresql").unwrap();
        assert_eq!(db.node_type, NODE_DATABASE);
        assert_eq!(db.attributes["db.system"], "postgresql");
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].call_count, 2);
        assert_eq!(g.edges[0].error_count, 1);
    }

    #[test]
    fn unresolved_peer_drops_edge_and_counts() {
        let st = store();
        let mut s = span_with_attrs("api", KIND_CLIENT, vec![]);
        s.span_id = "ff".repeat(8);
        put(&st, &s);

        let g = build(&st);
        assert!(g.edges.is_empty());
        assert_eq!(st.get_counter(counters::UNRESOLVED_PEER).unwrap(), 1);
    }

    #[test]
    fn address_peer_is_external() {
        let st = store();
        let mut s = span_with_attrs("api", KIND_CLIENT, vec![attr("server.address", "s3.amazonaws.com")]);
        s.span_id = "1a".repeat(8);
        put(&st, &s);

        let g = build(&st);
        let ext = g.nodes.iter().find(|n| n.id == "s3.amazonaws.com").unwrap();
        assert_eq!(ext.node_type, NODE_EXTERNAL);
    }

    #[test]
    fn hide_services_drops_nodes_and_incident_edges() {
        let st = store();
        let mut s = span_with_attrs("spyglass", KIND_CLIENT, vec![attr("peer.service", "api")]);
        s.span_id = "2b".repeat(8);
        put(&st, &s);
        let g = build(&st);
        assert_eq!(g.edges.len(), 1);

        let filtered = hide_services(g, &["spyglass".to_string()]);
        assert!(filtered.edges.is_empty());
        assert!(filtered.nodes.iter().all(|n| n.id != "spyglass"));
    }

    #[test]
    fn cached_build_is_stable_within_ttl() {
        let st = store();
        let mut s = span_with_attrs("a", KIND_CLIENT, vec![attr("peer.service", "b")]);
        s.span_id = "3c".repeat(8);
        put(&st, &s);

        let g1 =
            service_graph_cached(&st, 60, 0, i64::MAX, "w", &mut budget()).unwrap();
        // new span after the cache fill is invisible until the TTL lapses
        let mut s2 = span_with_attrs("a", KIND_CLIENT, vec![attr("peer.service", "c")]);
        s2.span_id = "4d".repeat(8);
        put(&st, &s2);
        let g2 =
            service_graph_cached(&st, 60, 0, i64::MAX, "w", &mut budget()).unwrap();
        assert_eq!(g1.edges.len(), g2.edges.len());
    }
}
