/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Scalar expressions: fields, literals, functions and aggregations

use crate::environment::{Environment, InstanceId, InstanceSet, ScalarId};
use crate::error::PlanResult;
use serde::Serialize;
use shared::catalog::{ColumnId, DataType};
use shared::program::{DataId, IteratorId, Program};
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct Field {
    pub instance: InstanceId,
    pub column: ColumnId,
    /// Qualified label, `alias.column`
    pub name: String,
    pub column_name: String,
    pub data_type: DataType,
    pub size: f64,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    Text(String),
    Null,
    /// Placeholder bound at execution time
    Parameter(usize),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(value) => write!(f, "{}", value),
            Literal::Float(value) => write!(f, "{}", value),
            Literal::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
            Literal::Null => write!(f, "null"),
            Literal::Parameter(_) => write!(f, "?"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FunctionKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
    Upper,
    Lower,
    Length,
    Coalesce,
    /// Words of a full-text match
    Word,
    WordList,
    /// Relevance of a full-text match
    Score,
}

impl FunctionKind {
    fn operator(&self) -> Option<&'static str> {
        match self {
            FunctionKind::Add => Some("+"),
            FunctionKind::Subtract => Some("-"),
            FunctionKind::Multiply => Some("*"),
            FunctionKind::Divide => Some("/"),
            FunctionKind::Concat => Some("||"),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FunctionKind::Add => "add",
            FunctionKind::Subtract => "subtract",
            FunctionKind::Multiply => "multiply",
            FunctionKind::Divide => "divide",
            FunctionKind::Concat => "concat",
            FunctionKind::Upper => "upper",
            FunctionKind::Lower => "lower",
            FunctionKind::Length => "char_length",
            FunctionKind::Coalesce => "coalesce",
            FunctionKind::Word => "word",
            FunctionKind::WordList => "wordlist",
            FunctionKind::Score => "score",
        }
    }

    pub fn is_word(&self) -> bool {
        matches!(
            self,
            FunctionKind::Word | FunctionKind::WordList | FunctionKind::Score
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AggregationKind {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregationKind {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationKind::Count => "count",
            AggregationKind::Sum => "sum",
            AggregationKind::Min => "min",
            AggregationKind::Max => "max",
            AggregationKind::Avg => "avg",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum Scalar {
    Field(Field),
    Value(Literal),
    Function {
        kind: FunctionKind,
        operands: Vec<ScalarId>,
    },
    Aggregation {
        kind: AggregationKind,
        operand: Option<ScalarId>,
        distinct: bool,
    },
}

impl Scalar {
    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Scalar::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn is_aggregation(&self) -> bool {
        matches!(self, Scalar::Aggregation { .. })
    }

    pub fn is_word(&self) -> bool {
        matches!(self, Scalar::Function { kind, .. } if kind.is_word())
    }
}

impl<'a> Environment<'a> {
    pub fn literal(&mut self, value: Literal) -> ScalarId {
        self.add_scalar(Scalar::Value(value))
    }

    pub fn integer(&mut self, value: i64) -> ScalarId {
        self.literal(Literal::Integer(value))
    }

    pub fn text(&mut self, value: &str) -> ScalarId {
        self.literal(Literal::Text(value.to_string()))
    }

    pub fn parameter(&mut self, position: usize) -> ScalarId {
        self.literal(Literal::Parameter(position))
    }

    pub fn function(&mut self, kind: FunctionKind, operands: Vec<ScalarId>) -> ScalarId {
        self.add_scalar(Scalar::Function { kind, operands })
    }

    pub fn aggregation(
        &mut self,
        kind: AggregationKind,
        operand: Option<ScalarId>,
        distinct: bool,
    ) -> ScalarId {
        self.add_scalar(Scalar::Aggregation {
            kind,
            operand,
            distinct,
        })
    }
}

/// Qualified text of an expression, used as execution variable label
pub fn label(env: &Environment<'_>, id: ScalarId) -> PlanResult<String> {
    render(env, id, true)
}

/// Text of an expression as sent to a cascade, where fields are unqualified
pub fn to_sql(env: &Environment<'_>, id: ScalarId) -> PlanResult<String> {
    render(env, id, false)
}

fn render(env: &Environment<'_>, id: ScalarId, qualified: bool) -> PlanResult<String> {
    Ok(match env.scalar(id)? {
        Scalar::Field(field) => {
            if qualified {
                field.name.clone()
            } else {
                field.column_name.clone()
            }
        }
        Scalar::Value(value) => value.to_string(),
        Scalar::Function { kind, operands } => {
            let operands = operands
                .iter()
                .map(|operand| render(env, *operand, qualified))
                .collect::<PlanResult<Vec<_>>>()?;
            match kind.operator() {
                Some(operator) if operands.len() == 2 => {
                    format!("({}{}{})", operands[0], operator, operands[1])
                }
                _ => format!("{}({})", kind.name(), operands.join(",")),
            }
        }
        Scalar::Aggregation {
            kind,
            operand,
            distinct,
        } => {
            let operand = match operand {
                Some(operand) => render(env, *operand, qualified)?,
                None => "*".to_string(),
            };
            if *distinct {
                format!("{}(distinct {})", kind.name(), operand)
            } else {
                format!("{}({})", kind.name(), operand)
            }
        }
    })
}

/// Adds the table instances an expression refers to
pub fn used_instances(
    env: &Environment<'_>,
    id: ScalarId,
    into: &mut InstanceSet,
) -> PlanResult<()> {
    match env.scalar(id)? {
        Scalar::Field(field) => {
            into.insert(field.instance);
        }
        Scalar::Value(_) => {}
        Scalar::Function { operands, .. } => {
            for operand in operands.clone() {
                used_instances(env, operand, into)?;
            }
        }
        Scalar::Aggregation { operand, .. } => {
            if let Some(operand) = *operand {
                used_instances(env, operand, into)?;
            }
        }
    }
    Ok(())
}

/// Fields an expression reads
pub fn used_fields(
    env: &Environment<'_>,
    id: ScalarId,
    into: &mut Vec<ScalarId>,
) -> PlanResult<()> {
    match env.scalar(id)? {
        Scalar::Field(_) => {
            if !into.contains(&id) {
                into.push(id);
            }
        }
        Scalar::Value(_) => {}
        Scalar::Function { operands, .. } => {
            for operand in operands.clone() {
                used_fields(env, operand, into)?;
            }
        }
        Scalar::Aggregation { operand, .. } => {
            if let Some(operand) = *operand {
                used_fields(env, operand, into)?;
            }
        }
    }
    Ok(())
}

/// Whether the value is known before any table is read
pub fn is_constant(env: &Environment<'_>, id: ScalarId) -> PlanResult<bool> {
    let mut instances = InstanceSet::default();
    used_instances(env, id, &mut instances)?;
    Ok(instances.is_empty() && !env.scalar(id)?.is_aggregation())
}

/// Whether every table the expression refers to is in `available`
pub fn is_bound_by(
    env: &Environment<'_>,
    id: ScalarId,
    available: &InstanceSet,
) -> PlanResult<bool> {
    let mut instances = InstanceSet::default();
    used_instances(env, id, &mut instances)?;
    Ok(instances.is_subset(available))
}

/// Field of the instance behind an expression, if it is a plain field
pub fn field_of(
    env: &Environment<'_>,
    id: ScalarId,
    instance: InstanceId,
) -> PlanResult<Option<ColumnId>> {
    Ok(env
        .scalar(id)?
        .as_field()
        .filter(|field| field.instance == instance)
        .map(|field| field.column))
}

/// Bytes a value of the expression occupies
pub fn size(env: &Environment<'_>, id: ScalarId) -> PlanResult<f64> {
    Ok(match env.scalar(id)? {
        Scalar::Field(field) => field.size,
        Scalar::Value(Literal::Text(text)) => text.len() as f64,
        Scalar::Value(_) => 8.0,
        Scalar::Function { kind, .. } if kind.is_word() => DataType::Word.default_size(),
        Scalar::Function { .. } | Scalar::Aggregation { .. } => 8.0,
    })
}

/// Variable holding the expression's value inside an iterator.
///
/// A value materialised once is reused by every later reference.
pub fn variable(
    env: &Environment<'_>,
    program: &mut Program,
    iterator: IteratorId,
    id: ScalarId,
) -> PlanResult<DataId> {
    let label = label(env, id)?;
    if let Some(data) = program.node_variable(iterator, &label) {
        return Ok(data);
    }
    let data = program.add_scalar_variable(&label);
    program.set_node_variable(iterator, &label, data);
    Ok(data)
}

/// Array variable over several expressions
pub fn array_variable(
    env: &Environment<'_>,
    program: &mut Program,
    iterator: IteratorId,
    ids: &[ScalarId],
) -> PlanResult<DataId> {
    let elements = ids
        .iter()
        .map(|id| variable(env, program, iterator, *id))
        .collect::<PlanResult<Vec<_>>>()?;
    Ok(program.add_array_variable(elements))
}

/// Marks every field of the expression as needed
pub fn require(env: &mut Environment<'_>, id: ScalarId) -> PlanResult<()> {
    let mut fields = Vec::new();
    used_fields(env, id, &mut fields)?;
    for field in fields {
        let located = env.scalar(field)?.as_field().map(|f| (f.instance, f.column));
        if let Some((instance, column)) = located {
            env.require_column(instance, column);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::catalog::{Catalog, FileDef, TableDef};
    use shared::config::PlannerConfig;

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let table = catalog.add_table(
            TableDef::new("book", 100.0)
                .row_id("rowid")
                .column("title", DataType::Text)
                .column("price", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            "book_record",
            table,
            ColumnId(0),
            &[ColumnId(1), ColumnId(2)],
        ));
        catalog
    }

    #[test]
    fn test_label_and_sql_text() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let book = env.add_instance("book", "b").unwrap();
        let price = env.field(book, "price").unwrap();
        let two = env.integer(2);
        let doubled = env.function(FunctionKind::Multiply, vec![price, two]);
        assert_eq!(label(&env, doubled).unwrap(), "(b.price*2)");
        assert_eq!(to_sql(&env, doubled).unwrap(), "(price*2)");

        let count = env.aggregation(AggregationKind::Count, None, false);
        assert_eq!(label(&env, count).unwrap(), "count(*)");
    }

    #[test]
    fn test_used_instances_and_binding() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let first = env.add_instance("book", "a").unwrap();
        let second = env.add_instance("book", "b").unwrap();
        let a = env.field(first, "price").unwrap();
        let b = env.field(second, "price").unwrap();
        let sum = env.function(FunctionKind::Add, vec![a, b]);

        let mut only_first = InstanceSet::default();
        only_first.insert(first);
        assert!(!is_bound_by(&env, sum, &only_first).unwrap());
        only_first.insert(second);
        assert!(is_bound_by(&env, sum, &only_first).unwrap());

        let literal = env.text("x");
        assert!(is_constant(&env, literal).unwrap());
        assert!(!is_constant(&env, a).unwrap());
    }

    #[test]
    fn test_require_marks_columns() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let book = env.add_instance("book", "b").unwrap();
        let title = env.field(book, "title").unwrap();
        let upper = env.function(FunctionKind::Upper, vec![title]);
        require(&mut env, upper).unwrap();
        assert_eq!(env.required_columns(book), vec![ColumnId(1)]);
    }
}
