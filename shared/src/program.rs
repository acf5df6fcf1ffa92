/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Recording execution program.
//!
//! Lowering a plan produces a [`Program`]: iterators with attached actions,
//! variables and backing collections. The program is never executed here; it
//! is the contract handed to the execution runtime, and its [`Program::explain`]
//! rendering is what tests inspect.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IteratorId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IteratorKind {
    Input,
    File { file: String },
    Loop,
    Server { cascade: String },
    Parallel,
}

/// Phase of the iterator an action belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Target {
    #[default]
    Execution,
    StartUp,
    Aggregation,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    Store,
    Queue,
    Sort,
    Heap,
    Grouping,
    Distinct,
    Partition,
    Client,
    /// Tuples of a system table, produced by the runtime on demand
    Virtual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub kind: CollectionKind,
    /// Bounded collections keep at most this many tuples
    pub bound: Option<u64>,
    /// System table a virtual collection materialises
    #[serde(default)]
    pub table: Option<String>,
    /// Column positions a virtual collection hands out, in tuple order
    #[serde(default)]
    pub columns: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Variable {
    Scalar { label: String },
    Array { elements: Vec<DataId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    NotNull,
    ForeignKey,
    ReferedKey,
}

/// One sort key of a generated order: position inside the sorted tuple,
/// direction and, for relevance ordering, the word position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub position: usize,
    pub descending: bool,
    pub word_position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Scan {
        file: String,
        data: DataId,
        search: Option<String>,
        order: Option<String>,
        limited: bool,
    },
    Fetch {
        file: String,
        key: DataId,
        data: DataId,
    },
    GetByBitSet {
        file: String,
        data: DataId,
    },
    Iterate {
        operand: IteratorId,
    },
    Input {
        collection: CollectionId,
        data: DataId,
    },
    Output {
        collection: CollectionId,
        data: DataId,
    },
    OutData {
        data: DataId,
    },
    Unless {
        condition: String,
    },
    If {
        condition: String,
    },
    Else,
    Continue,
    EndIf,
    Exists {
        operand: IteratorId,
        negated: bool,
    },
    OuterJoin {
        operand: IteratorId,
        nulls: DataId,
    },
    CheckCancel,
    BeginParallel,
    ParallelList,
    EndParallel,
    Sort {
        collection: CollectionId,
        data: DataId,
        keys: Vec<SortKey>,
        bound: Option<u64>,
    },
    MergeSort {
        collection: CollectionId,
        data: DataId,
        keys: Vec<SortKey>,
    },
    Group {
        collection: CollectionId,
        keys: DataId,
        data: DataId,
        mode: String,
    },
    Aggregate {
        function: String,
        operand: Option<DataId>,
        result: DataId,
    },
    Distinct {
        collection: CollectionId,
        key: DataId,
    },
    Limit {
        count: String,
        offset: Option<String>,
    },
    Partition {
        collection: CollectionId,
        keys: DataId,
        bound: Option<u64>,
    },
    Filter {
        condition: String,
    },
    Lock {
        table: String,
        exclusive: bool,
    },
    Insert {
        file: String,
        data: DataId,
    },
    Expunge {
        file: String,
        key: DataId,
    },
    Update {
        file: String,
        key: DataId,
        data: DataId,
    },
    UndoLog {
        file: String,
        data: DataId,
    },
    UndoFile {
        file: String,
        operation: String,
        data: DataId,
    },
    CheckConstraint {
        kind: ConstraintKind,
        target: String,
        data: DataId,
    },
    ServerQuery {
        cascade: String,
        sql: String,
        data: DataId,
    },
    ServerOperation {
        cascade: String,
        sql: String,
        data: DataId,
    },
    Calculate {
        expression: String,
        result: DataId,
    },
}

impl Action {
    /// Short mnemonic used by [`Program::explain`]
    pub fn name(&self) -> &'static str {
        match self {
            Action::Scan { .. } => "scan",
            Action::Fetch { .. } => "fetch",
            Action::GetByBitSet { .. } => "get-by-bitset",
            Action::Iterate { .. } => "iterate",
            Action::Input { .. } => "input",
            Action::Output { .. } => "output",
            Action::OutData { .. } => "out-data",
            Action::Unless { .. } => "unless",
            Action::If { .. } => "if",
            Action::Else => "else",
            Action::Continue => "continue",
            Action::EndIf => "end-if",
            Action::Exists { negated: false, .. } => "exists",
            Action::Exists { negated: true, .. } => "not-exists",
            Action::OuterJoin { .. } => "outer-join",
            Action::CheckCancel => "check-cancel",
            Action::BeginParallel => "begin-parallel",
            Action::ParallelList => "parallel-list",
            Action::EndParallel => "end-parallel",
            Action::Sort { .. } => "sort",
            Action::MergeSort { .. } => "merge-sort",
            Action::Group { .. } => "group",
            Action::Aggregate { .. } => "aggregate",
            Action::Distinct { .. } => "distinct",
            Action::Limit { .. } => "limit",
            Action::Partition { .. } => "partition",
            Action::Filter { .. } => "filter",
            Action::Lock { .. } => "lock",
            Action::Insert { .. } => "insert",
            Action::Expunge { .. } => "expunge",
            Action::Update { .. } => "update",
            Action::UndoLog { .. } => "undo-log",
            Action::UndoFile { .. } => "undo-file",
            Action::CheckConstraint { .. } => "check-constraint",
            Action::ServerQuery { .. } => "server-query",
            Action::ServerOperation { .. } => "server-operation",
            Action::Calculate { .. } => "calculate",
        }
    }

    fn detail(&self) -> String {
        match self {
            Action::Scan {
                file,
                search,
                order,
                limited,
                ..
            } => {
                let mut text = file.clone();
                if let Some(search) = search {
                    let _ = write!(text, " search({})", search);
                }
                if let Some(order) = order {
                    let _ = write!(text, " order({})", order);
                }
                if *limited {
                    text.push_str(" limited");
                }
                text
            }
            Action::Fetch { file, .. }
            | Action::GetByBitSet { file, .. }
            | Action::Insert { file, .. }
            | Action::Expunge { file, .. }
            | Action::Update { file, .. }
            | Action::UndoLog { file, .. } => file.clone(),
            Action::UndoFile { file, operation, .. } => format!("{} {}", file, operation),
            Action::Iterate { operand } | Action::Exists { operand, .. } => {
                format!("#{}", operand.0)
            }
            Action::OuterJoin { operand, .. } => format!("#{}", operand.0),
            Action::Unless { condition }
            | Action::If { condition }
            | Action::Filter { condition } => condition.clone(),
            Action::Sort { keys, bound, .. } => {
                let mut text = format_keys(keys);
                if let Some(bound) = bound {
                    let _ = write!(text, " top {}", bound);
                }
                text
            }
            Action::MergeSort { keys, .. } => format_keys(keys),
            Action::Group { mode, .. } => mode.clone(),
            Action::Aggregate { function, .. } => function.clone(),
            Action::Limit { count, offset } => match offset {
                Some(offset) => format!("{} offset {}", count, offset),
                None => count.clone(),
            },
            Action::Partition { bound, .. } => match bound {
                Some(bound) => format!("top {}", bound),
                None => String::new(),
            },
            Action::Lock { table, exclusive } => {
                format!("{} {}", table, if *exclusive { "exclusive" } else { "shared" })
            }
            Action::CheckConstraint { kind, target, .. } => format!("{:?} {}", kind, target),
            Action::ServerQuery { cascade, sql, .. }
            | Action::ServerOperation { cascade, sql, .. } => format!("{}: {}", cascade, sql),
            Action::Calculate { expression, .. } => expression.clone(),
            _ => String::new(),
        }
    }
}

fn format_keys(keys: &[SortKey]) -> String {
    keys.iter()
        .map(|k| format!("{}{}", k.position, if k.descending { " desc" } else { "" }))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IteratorNode {
    pub id: IteratorId,
    pub kind: IteratorKind,
    pub actions: Vec<(Target, Action)>,
    /// Scalars already materialised for this iterator, keyed by label
    pub node_variables: Vec<(String, DataId)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    iterators: Vec<IteratorNode>,
    variables: Vec<Variable>,
    collections: Vec<Collection>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_iterator(&mut self, kind: IteratorKind) -> IteratorId {
        let id = IteratorId(self.iterators.len());
        self.iterators.push(IteratorNode {
            id,
            kind,
            actions: Vec::new(),
            node_variables: Vec::new(),
        });
        id
    }

    /// Attaches an action; unknown iterators are ignored
    pub fn add_action(&mut self, iterator: IteratorId, target: Target, action: Action) {
        if let Some(node) = self.iterators.get_mut(iterator.0) {
            node.actions.push((target, action));
        }
    }

    pub fn add_scalar_variable(&mut self, label: &str) -> DataId {
        let id = DataId(self.variables.len());
        self.variables.push(Variable::Scalar {
            label: label.to_string(),
        });
        id
    }

    pub fn add_array_variable(&mut self, elements: Vec<DataId>) -> DataId {
        let id = DataId(self.variables.len());
        self.variables.push(Variable::Array { elements });
        id
    }

    pub fn add_collection(&mut self, kind: CollectionKind, bound: Option<u64>) -> CollectionId {
        let id = CollectionId(self.collections.len());
        self.collections.push(Collection {
            id,
            kind,
            bound,
            table: None,
            columns: Vec::new(),
        });
        id
    }

    /// Collection producing the given columns of a system table
    pub fn add_virtual_collection(&mut self, table: &str, columns: Vec<usize>) -> CollectionId {
        let id = CollectionId(self.collections.len());
        self.collections.push(Collection {
            id,
            kind: CollectionKind::Virtual,
            bound: None,
            table: Some(table.to_string()),
            columns,
        });
        id
    }

    pub fn node_variable(&self, iterator: IteratorId, label: &str) -> Option<DataId> {
        self.iterators
            .get(iterator.0)?
            .node_variables
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, id)| *id)
    }

    pub fn set_node_variable(&mut self, iterator: IteratorId, label: &str, data: DataId) {
        if let Some(node) = self.iterators.get_mut(iterator.0) {
            if !node.node_variables.iter().any(|(l, _)| l == label) {
                node.node_variables.push((label.to_string(), data));
            }
        }
    }

    /// Copies node variables of an operand iterator into another one
    pub fn copy_node_variables(&mut self, from: IteratorId, to: IteratorId) {
        let copied = match self.iterators.get(from.0) {
            Some(node) => node.node_variables.clone(),
            None => return,
        };
        for (label, data) in copied {
            self.set_node_variable(to, &label, data);
        }
    }

    pub fn iterator(&self, id: IteratorId) -> Option<&IteratorNode> {
        self.iterators.get(id.0)
    }

    pub fn iterators(&self) -> &[IteratorNode] {
        &self.iterators
    }

    pub fn variable(&self, id: DataId) -> Option<&Variable> {
        self.variables.get(id.0)
    }

    pub fn collection(&self, id: CollectionId) -> Option<&Collection> {
        self.collections.get(id.0)
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    pub fn actions(&self, iterator: IteratorId) -> &[(Target, Action)] {
        self.iterators
            .get(iterator.0)
            .map(|node| node.actions.as_slice())
            .unwrap_or(&[])
    }

    /// All actions of all iterators, in iterator order
    pub fn all_actions(&self) -> impl Iterator<Item = &Action> + '_ {
        self.iterators
            .iter()
            .flat_map(|node| node.actions.iter().map(|(_, action)| action))
    }

    pub fn count_actions(&self, name: &str) -> usize {
        self.all_actions().filter(|a| a.name() == name).count()
    }

    /// Renders the program one action per line
    pub fn explain(&self) -> String {
        let mut out = String::new();
        for node in &self.iterators {
            let _ = writeln!(out, "#{} {:?}", node.id.0, node.kind);
            for (target, action) in &node.actions {
                let detail = action.detail();
                let marker = match target {
                    Target::Execution => "",
                    Target::StartUp => "[startup] ",
                    Target::Aggregation => "[aggregation] ",
                    Target::Parallel => "[parallel] ",
                };
                if detail.is_empty() {
                    let _ = writeln!(out, "  {}{}", marker, action.name());
                } else {
                    let _ = writeln!(out, "  {}{} {}", marker, action.name(), detail);
                }
            }
        }
        out
    }
}
