/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{Direction, GeneratedPhase, Phase, Specification};
use crate::environment::{Environment, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::row::DelayArgument;
use crate::scalar;
use shared::program::{IteratorId, Program, SortKey};

impl Specification {
    /// Binds the keys to data positions of an iterator.
    ///
    /// The generated tuple holds the row in its order, minus deferred columns
    /// that are not keys, followed by the keys the row lacks. One array
    /// variable covers the whole tuple.
    pub fn generate(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        iterator: IteratorId,
        row: &[ScalarId],
        delay: Option<&DelayArgument>,
    ) -> PlanResult<Specification> {
        if self.generated().is_some() {
            return Err(PlanError::unexpected("order specification generated twice"));
        }
        let mut elements: Vec<ScalarId> = Vec::with_capacity(row.len() + self.len());
        for scalar in row {
            let deferred = delay.map_or(false, |delay| delay.is_deferred(*scalar));
            if (deferred && !self.contains(*scalar)) || elements.contains(scalar) {
                continue;
            }
            elements.push(*scalar);
        }
        for key in self.keys() {
            if !elements.contains(&key.scalar) {
                elements.push(key.scalar);
            }
        }

        let data = scalar::array_variable(env, program, iterator, &elements)?;
        let mut keys = Vec::with_capacity(self.len());
        for key in self.keys() {
            let position = elements
                .iter()
                .position(|element| *element == key.scalar)
                .ok_or_else(|| PlanError::unexpected("order key lost while generating"))?;
            let word_position = if env.scalar(key.scalar)?.is_word() {
                Some(position)
            } else {
                None
            };
            keys.push(SortKey {
                position,
                descending: key.direction == Direction::Descending,
                word_position,
            });
        }
        let partition = self
            .partition_keys()
            .iter()
            .filter_map(|key| elements.iter().position(|element| element == key))
            .collect();

        Ok(self.with_phase(
            self.keys().to_vec(),
            Phase::Generated(GeneratedPhase {
                data,
                elements,
                keys,
                partition,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderKey;
    use crate::scalar::FunctionKind;
    use shared::catalog::{Catalog, ColumnId, DataType, FileDef, TableDef};
    use shared::config::PlannerConfig;
    use shared::program::{IteratorKind, Variable};

    fn create_test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let table = catalog.add_table(
            TableDef::new("doc", 10.0)
                .row_id("rowid")
                .column("title", DataType::Text)
                .column("body", DataType::Text)
                .column("rank", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            "doc_record",
            table,
            ColumnId(0),
            &[ColumnId(1), ColumnId(2), ColumnId(3)],
        ));
        catalog
    }

    #[test]
    fn test_generate_reuses_row_positions() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let doc = env.add_instance("doc", "d").unwrap();
        let title = env.field(doc, "title").unwrap();
        let rank = env.field(doc, "rank").unwrap();
        let mut program = Program::new();
        let iterator = program.add_iterator(IteratorKind::Loop);

        let order = Specification::new(vec![OrderKey::descending(rank)]);
        let generated = order
            .generate(&env, &mut program, iterator, &[title, rank], None)
            .unwrap();
        let phase = generated.generated().unwrap();
        assert_eq!(phase.elements, vec![title, rank]);
        assert_eq!(phase.keys[0].position, 1);
        assert!(phase.keys[0].descending);
        match program.variable(phase.data) {
            Some(Variable::Array { elements }) => assert_eq!(elements.len(), 2),
            other => panic!("unexpected variable {:?}", other),
        }
    }

    #[test]
    fn test_deferred_columns_are_excluded_and_keys_appended() {
        let catalog = create_test_catalog();
        let config = PlannerConfig::default();
        let mut env = Environment::new(&catalog, &config);
        let doc = env.add_instance("doc", "d").unwrap();
        let title = env.field(doc, "title").unwrap();
        let body = env.field(doc, "body").unwrap();
        let rank = env.field(doc, "rank").unwrap();
        let score = env.function(FunctionKind::Score, vec![body]);
        let mut program = Program::new();
        let iterator = program.add_iterator(IteratorKind::Loop);

        let delay = DelayArgument {
            eager: vec![rank],
            deferred: vec![title],
            ..DelayArgument::default()
        };
        let order = Specification::new(vec![OrderKey::ascending(score)]);
        let generated = order
            .generate(&env, &mut program, iterator, &[title, rank], Some(&delay))
            .unwrap();
        let phase = generated.generated().unwrap();
        assert_eq!(phase.elements, vec![rank, score]);
        assert_eq!(phase.keys[0].word_position, Some(1));
        assert!(generated
            .generate(&env, &mut program, iterator, &[rank], None)
            .is_err());
    }
}
