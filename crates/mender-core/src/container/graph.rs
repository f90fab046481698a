//! Cycle detection over the observed resolution graph.
//!
//! An edge `a -> b` means the factory for `a` resolved `b`.

use std::collections::{BTreeMap, BTreeSet};

pub(crate) type Edges = BTreeMap<String, BTreeSet<String>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Returns the first cycle found as `[start, .., start]`, or `None`.
///
/// Nodes are visited in sorted order so the reported cycle is stable.
pub(crate) fn find_cycle(edges: &Edges) -> Option<Vec<String>> {
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut path: Vec<&str> = Vec::new();

    for node in edges.keys() {
        if !marks.contains_key(node.as_str()) {
            if let Some(cycle) = visit(node, edges, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    edges: &'a Edges,
    marks: &mut BTreeMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    marks.insert(node, Mark::Visiting);
    path.push(node);

    if let Some(next) = edges.get(node) {
        for dep in next {
            match marks.get(dep.as_str()) {
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| *n == dep.as_str())?;
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = visit(dep, edges, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }
    }

    path.pop();
    marks.insert(node, Mark::Done);
    None
}
