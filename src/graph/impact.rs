//! Impact traversal over stored facts
//!
//! # Graph View
//!
//! Nodes are programs and tables. Edges point the way a change propagates and
//! are read from the fact relations at query time:
//! - **write**: program -> table it writes
//! - **read**: table -> program that reads it
//! - **include** / **macro_call**: included or called program -> the program
//!   that includes or calls it
//!
//! `forward` follows edges along their direction (what a change to X affects);
//! `backward` follows them in reverse (what X depends on upstream: the tables it
//! reads, their writers, and the programs it includes or calls).

use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use super::QueryError;
use crate::facts::{DependencyKind, DependencyTarget, OperationKind, UNKNOWN};
use crate::store::FactStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Program,
    Table,
    /// Unresolved dependency target; reported, never expanded
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Write,
    Read,
    Include,
    MacroCall,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Write => "write",
            EdgeKind::Read => "read",
            EdgeKind::Include => "include",
            EdgeKind::MacroCall => "macro_call",
        }
    }
}

impl From<DependencyKind> for EdgeKind {
    fn from(kind: DependencyKind) -> Self {
        match kind {
            DependencyKind::Include => EdgeKind::Include,
            DependencyKind::MacroCall => EdgeKind::MacroCall,
        }
    }
}

/// A node reached by a traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactNode {
    /// Program path, table identifier, or `unknown`
    pub node: String,
    pub kind: NodeKind,
    /// Raw reference text for `unknown` nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub depth: usize,
    /// Node this one was discovered from
    pub via: String,
    /// Edge kinds from the start node to this one
    pub path: Vec<EdgeKind>,
}

impl ImpactNode {
    /// Chained path kind, e.g. `write>read>include`
    pub fn path_kind(&self) -> String {
        self.path
            .iter()
            .map(EdgeKind::as_str)
            .collect::<Vec<_>>()
            .join(">")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactResult {
    pub start: String,
    pub start_kind: NodeKind,
    pub direction: Direction,
    pub max_depth: usize,
    /// Reachable nodes in breadth-first discovery order
    pub nodes: Vec<ImpactNode>,
    /// Some node at the depth bound had neighbours left unexplored
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    kind: NodeKind,
    id: String,
}

struct Neighbour {
    key: NodeKey,
    reference: Option<String>,
    edge: EdgeKind,
}

/// Decide whether `identifier` names a stored program or a stored table
///
/// A path that only ever appears as a dependency target still counts as a
/// program. Program paths win over table identifiers.
pub fn classify(store: &dyn FactStore, identifier: &str) -> Result<NodeKind, QueryError> {
    if identifier.is_empty() || identifier == UNKNOWN {
        return Err(QueryError::NotFound(identifier.to_string()));
    }
    if store.program(identifier)?.is_some() || !store.dependencies_to(identifier)?.is_empty() {
        return Ok(NodeKind::Program);
    }
    if !store.operations_for_table(identifier)?.is_empty() {
        return Ok(NodeKind::Table);
    }
    Err(QueryError::NotFound(identifier.to_string()))
}

fn neighbours(
    store: &dyn FactStore,
    key: &NodeKey,
    direction: Direction,
) -> Result<Vec<Neighbour>, QueryError> {
    let mut out = Vec::new();
    match (key.kind, direction) {
        (NodeKind::Program, Direction::Forward) => {
            for op in store.operations_for_program(&key.id)? {
                if op.operation == OperationKind::Write {
                    out.push(Neighbour {
                        key: NodeKey {
                            kind: NodeKind::Table,
                            id: op.table,
                        },
                        reference: None,
                        edge: EdgeKind::Write,
                    });
                }
            }
            for dep in store.dependencies_to(&key.id)? {
                out.push(Neighbour {
                    key: NodeKey {
                        kind: NodeKind::Program,
                        id: dep.source,
                    },
                    reference: None,
                    edge: EdgeKind::from(dep.kind),
                });
            }
        }
        (NodeKind::Program, Direction::Backward) => {
            for op in store.operations_for_program(&key.id)? {
                if op.operation == OperationKind::Read {
                    out.push(Neighbour {
                        key: NodeKey {
                            kind: NodeKind::Table,
                            id: op.table,
                        },
                        reference: None,
                        edge: EdgeKind::Read,
                    });
                }
            }
            for dep in store.dependencies_from(&key.id)? {
                let edge = EdgeKind::from(dep.kind);
                let neighbour = match dep.target {
                    DependencyTarget::Program(path) => Neighbour {
                        key: NodeKey {
                            kind: NodeKind::Program,
                            id: path,
                        },
                        reference: None,
                        edge,
                    },
                    DependencyTarget::Unknown => Neighbour {
                        key: NodeKey {
                            kind: NodeKind::Unknown,
                            id: format!("{}:{}", UNKNOWN, dep.reference),
                        },
                        reference: Some(dep.reference),
                        edge,
                    },
                };
                out.push(neighbour);
            }
        }
        (NodeKind::Table, direction) => {
            let (wanted, edge) = match direction {
                Direction::Forward => (OperationKind::Read, EdgeKind::Read),
                Direction::Backward => (OperationKind::Write, EdgeKind::Write),
            };
            for op in store.operations_for_table(&key.id)? {
                if op.operation == wanted {
                    out.push(Neighbour {
                        key: NodeKey {
                            kind: NodeKind::Program,
                            id: op.program,
                        },
                        reference: None,
                        edge,
                    });
                }
            }
        }
        (NodeKind::Unknown, _) => {}
    }
    Ok(out)
}

/// Breadth-first impact traversal
///
/// # Arguments
/// * `store` - fact store, read fresh on every call
/// * `identifier` - program path or table identifier
/// * `direction` - forward or backward
/// * `max_depth` - hop bound, at least 1
///
/// # Returns
/// Every reachable node once, in discovery order, with the chained edge kinds
/// that first reached it
///
/// # Guarantees
/// - Terminates on cycles (visited set) and at `max_depth`
/// - The start node is never reported
/// - `unknown` targets are reported once per distinct reference, never expanded
pub fn impact(
    store: &dyn FactStore,
    identifier: &str,
    direction: Direction,
    max_depth: usize,
) -> Result<ImpactResult, QueryError> {
    if max_depth == 0 {
        return Err(QueryError::InvalidDepth);
    }
    let start_kind = classify(store, identifier)?;
    let start_id = if start_kind == NodeKind::Table {
        identifier.to_ascii_lowercase()
    } else {
        identifier.to_string()
    };
    let start = NodeKey {
        kind: start_kind,
        id: start_id.clone(),
    };

    let mut visited: HashSet<NodeKey> = HashSet::new();
    visited.insert(start.clone());
    let mut queue: VecDeque<(NodeKey, usize, Vec<EdgeKind>)> = VecDeque::new();
    queue.push_back((start, 0, Vec::new()));
    let mut nodes = Vec::new();
    let mut truncated = false;

    while let Some((key, depth, path)) = queue.pop_front() {
        let next = neighbours(store, &key, direction)?;
        if depth >= max_depth {
            if next.iter().any(|n| !visited.contains(&n.key)) {
                truncated = true;
            }
            continue;
        }

        for neighbour in next {
            if !visited.insert(neighbour.key.clone()) {
                continue;
            }
            let mut chain = path.clone();
            chain.push(neighbour.edge);
            let node = match neighbour.key.kind {
                NodeKind::Unknown => UNKNOWN.to_string(),
                _ => neighbour.key.id.clone(),
            };
            nodes.push(ImpactNode {
                node,
                kind: neighbour.key.kind,
                reference: neighbour.reference,
                depth: depth + 1,
                via: key.id.clone(),
                path: chain.clone(),
            });
            if neighbour.key.kind != NodeKind::Unknown {
                queue.push_back((neighbour.key, depth + 1, chain));
            }
        }
    }

    Ok(ImpactResult {
        start: start_id,
        start_kind,
        direction,
        max_depth,
        nodes,
        truncated,
    })
}

/// Programs reachable from a program, in discovery order
///
/// `Forward` gives downstream programs (readers of its writes, and programs that
/// include or call it); `Backward` gives upstream ones.
pub fn program_closure(
    store: &dyn FactStore,
    program: &str,
    direction: Direction,
    max_depth: usize,
) -> Result<Vec<ImpactNode>, QueryError> {
    let result = impact(store, program, direction, max_depth)?;
    if result.start_kind != NodeKind::Program {
        return Err(QueryError::NotAProgram(program.to_string()));
    }
    Ok(result
        .nodes
        .into_iter()
        .filter(|n| n.kind == NodeKind::Program)
        .collect())
}
