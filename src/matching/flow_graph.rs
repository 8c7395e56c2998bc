//! Flow-graph solver: the general-path row matcher.
//!
//! Slots become layers of a directed graph. Each row (single mode) or each
//! set of rows sharing identical reference annotations (merging mode) becomes
//! a node in its slot's layer. Edges connect compatible nodes of consecutive
//! layers, a virtual source feeds the first layer and the last layer drains
//! into a virtual sink. Nodes unreachable from the source or unable to reach
//! the sink are wired to them directly, so partially matching rows still
//! surface as (incomplete) groups instead of disappearing. Every simple
//! source-to-sink path is a candidate group.
//!
//! Compatibility follows the same wildcard rule as the dictionary solver:
//! a value missing on one side matches anything only when the wildcard is
//! active for that column. This path additionally supports a user-supplied
//! matching expression, which sees both annotation maps and the exact-match
//! verdict.

use super::{AnnotationMatchingMethod, GroupingConfig, RowGroup};
use crate::error::Result;
use crate::progress::ProgressInfo;
use crate::scripting::{CompiledExpression, ExpressionScope, ScriptEngine};
use crate::slot::Slot;
use petgraph::algo::{all_simple_paths, has_path_connecting};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
enum Node {
    Source,
    Sink,
    Rows {
        slot: usize,
        rows: BTreeSet<usize>,
        annotations: BTreeMap<String, String>,
        /// Stand-in for an empty slot, keeps the layer chain connected.
        placeholder: bool,
    },
}

pub(super) fn solve(
    slots: &[Slot],
    columns: &BTreeSet<String>,
    config: &GroupingConfig,
    engine: &ScriptEngine,
    progress: &ProgressInfo,
) -> Result<Vec<RowGroup>> {
    if slots.is_empty() {
        return Ok(Vec::new());
    }

    let wildcard_active = wildcard_columns(slots, columns, config);
    let custom_matcher = match config.annotation_matching_method {
        AnnotationMatchingMethod::CustomExpression => Some(engine.compile(
            "custom annotation matching",
            &config.custom_annotation_matching,
        )?),
        AnnotationMatchingMethod::ExactMatch => None,
    };

    let mut graph: DiGraph<Node, ()> = DiGraph::new();
    let source = graph.add_node(Node::Source);
    let sink = graph.add_node(Node::Sink);

    // One layer of nodes per slot.
    let mut layers: Vec<Vec<NodeIndex>> = Vec::with_capacity(slots.len());
    for (slot_index, slot) in slots.iter().enumerate() {
        let mut layer = Vec::new();
        if slot.is_empty() {
            layer.push(graph.add_node(Node::Rows {
                slot: slot_index,
                rows: BTreeSet::new(),
                annotations: BTreeMap::new(),
                placeholder: true,
            }));
        } else if config.apply_merging {
            // Merge rows with identical reference annotations into one node.
            let mut partitions: BTreeMap<BTreeMap<String, String>, BTreeSet<usize>> =
                BTreeMap::new();
            for row in 0..slot.row_count() {
                partitions
                    .entry(row_annotations(slot, row, columns))
                    .or_default()
                    .insert(row);
            }
            for (annotations, rows) in partitions {
                layer.push(graph.add_node(Node::Rows {
                    slot: slot_index,
                    rows,
                    annotations,
                    placeholder: false,
                }));
            }
        } else {
            for row in 0..slot.row_count() {
                layer.push(graph.add_node(Node::Rows {
                    slot: slot_index,
                    rows: BTreeSet::from([row]),
                    annotations: row_annotations(slot, row, columns),
                    placeholder: false,
                }));
            }
        }
        layers.push(layer);
    }

    // Compatibility edges between consecutive layers.
    for window in layers.windows(2) {
        for &left in &window[0] {
            for &right in &window[1] {
                if progress.is_cancelled() {
                    return Ok(Vec::new());
                }
                if compatible(
                    &graph[left],
                    &graph[right],
                    &wildcard_active,
                    custom_matcher.as_ref(),
                    engine,
                )? {
                    graph.add_edge(left, right, ());
                }
            }
        }
    }
    // Skip-layer edges: a node without a successor in the next layer may
    // still match a later one, e.g. when the intervening slot simply has no
    // row for its key. Connect it to the first later layer that offers
    // compatible nodes, keeping such keys joined the same way the
    // dictionary solver joins them.
    for start in 0..layers.len() {
        for &node in &layers[start] {
            if graph
                .neighbors_directed(node, Direction::Outgoing)
                .count()
                > 0
            {
                continue;
            }
            for later_layer in layers.iter().skip(start + 2) {
                let mut connected = false;
                for &candidate in later_layer {
                    if compatible(
                        &graph[node],
                        &graph[candidate],
                        &wildcard_active,
                        custom_matcher.as_ref(),
                        engine,
                    )? {
                        graph.add_edge(node, candidate, ());
                        connected = true;
                    }
                }
                if connected {
                    break;
                }
            }
        }
    }

    if let Some(first) = layers.first() {
        for &node in first {
            graph.add_edge(source, node, ());
        }
    }
    if let Some(last) = layers.last() {
        for &node in last {
            graph.add_edge(node, sink, ());
        }
    }

    // Wire up orphans so unmatched rows still form (incomplete) groups.
    let mut from_source = Vec::new();
    let mut to_sink = Vec::new();
    for layer in &layers {
        for &node in layer {
            if graph.neighbors_directed(node, Direction::Incoming).count() == 0 {
                from_source.push(node);
            }
            if !has_path_connecting(&graph, node, sink, None) {
                to_sink.push(node);
            }
        }
    }
    for node in from_source {
        graph.add_edge(source, node, ());
    }
    for node in to_sink {
        graph.add_edge(node, sink, ());
    }

    // Every simple source-to-sink path is a candidate group.
    let mut candidates: Vec<RowGroup> = Vec::new();
    for path in all_simple_paths::<Vec<NodeIndex>, _>(&graph, source, sink, 0, None) {
        if progress.is_cancelled() {
            return Ok(Vec::new());
        }
        let mut group = RowGroup::new(slots.len());
        for node in path {
            if let Node::Rows {
                slot,
                rows,
                annotations,
                placeholder: false,
            } = &graph[node]
            {
                group.rows[*slot].extend(rows);
                for (name, value) in annotations {
                    group
                        .key
                        .entry(name.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }
        if !group.is_empty() {
            candidates.push(group);
        }
    }

    // Canonical order, independent of petgraph's traversal order.
    candidates.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.rows.cmp(&b.rows)));
    candidates.dedup();

    progress.log(&format!("{} candidate group(s) from path search", candidates.len()));
    if config.apply_merging {
        Ok(candidates)
    } else {
        Ok(claim_rows(candidates, slots.len()))
    }
}

/// Single mode: each row joins at most one group. Later candidates lose rows
/// already claimed by earlier ones and come out incomplete.
fn claim_rows(candidates: Vec<RowGroup>, slot_count: usize) -> Vec<RowGroup> {
    let mut used: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); slot_count];
    let mut groups = Vec::new();
    for mut candidate in candidates {
        for (slot_index, rows) in candidate.rows.iter_mut().enumerate() {
            let claimed: BTreeSet<usize> = rows
                .iter()
                .copied()
                .filter(|row| !used[slot_index].contains(row))
                .collect();
            used[slot_index].extend(&claimed);
            *rows = claimed;
        }
        if !candidate.is_empty() {
            groups.push(candidate);
        }
    }
    groups
}

/// Reference-column annotations present on a row.
fn row_annotations(slot: &Slot, row: usize, columns: &BTreeSet<String>) -> BTreeMap<String, String> {
    columns
        .iter()
        .filter_map(|column| {
            slot.text_annotation(row, column)
                .map(|value| (column.clone(), value.to_string()))
        })
        .collect()
}

/// Columns on which a missing value acts as a wildcard.
fn wildcard_columns(
    slots: &[Slot],
    columns: &BTreeSet<String>,
    config: &GroupingConfig,
) -> BTreeSet<String> {
    let mut active = BTreeSet::new();
    for column in columns {
        if config.force_na_is_any {
            active.insert(column.clone());
            continue;
        }
        let mut distinct = BTreeSet::new();
        for slot in slots {
            for row in 0..slot.row_count() {
                if let Some(value) = slot.text_annotation(row, column) {
                    distinct.insert(value);
                }
            }
        }
        if distinct.len() > 1 {
            active.insert(column.clone());
        }
    }
    active
}

fn compatible(
    left: &Node,
    right: &Node,
    wildcard_active: &BTreeSet<String>,
    custom_matcher: Option<&CompiledExpression>,
    engine: &ScriptEngine,
) -> Result<bool> {
    let (left_annotations, left_placeholder) = match left {
        Node::Rows {
            annotations,
            placeholder,
            ..
        } => (annotations, *placeholder),
        _ => return Ok(false),
    };
    let (right_annotations, right_placeholder) = match right {
        Node::Rows {
            annotations,
            placeholder,
            ..
        } => (annotations, *placeholder),
        _ => return Ok(false),
    };
    if left_placeholder || right_placeholder {
        return Ok(true);
    }

    let exact = exact_match(left_annotations, right_annotations, wildcard_active);
    match custom_matcher {
        None => Ok(exact),
        Some(expression) => {
            let scope = ExpressionScope::new()
                .push_annotation_map("annotations", left_annotations)
                .push_annotation_map("other_annotations", right_annotations)
                .push_bool("exact_match_results", exact);
            engine.eval_bool(expression, scope)
        }
    }
}

/// Exact matching with the dictionary solver's wildcard rule: a column value
/// missing on one side is compatible only when the wildcard is active there,
/// otherwise "missing" behaves like a value of its own.
fn exact_match(
    a: &BTreeMap<String, String>,
    b: &BTreeMap<String, String>,
    wildcard_active: &BTreeSet<String>,
) -> bool {
    for (column, left) in a {
        match b.get(column) {
            Some(right) if left != right => return false,
            Some(_) => {}
            None if wildcard_active.contains(column) => {}
            None => return false,
        }
    }
    for column in b.keys() {
        if !a.contains_key(column) && !wildcard_active.contains(column) {
            return false;
        }
    }
    true
}
