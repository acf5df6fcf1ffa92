/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

#![allow(dead_code)]

use accessplan::candidate::{Candidate, CandidateKind};
use accessplan::{CandidateId, Environment};
use shared::catalog::{Catalog, ColumnId, DataType, Distribution, FileDef, TableDef};

/// Local tables for single-table and join plans.
///
/// - `t0`: 100 rows, no index
/// - `t1`: 1 000 rows, B-tree on `y`
/// - `ticket`: 20 000 rows, covering B-tree on `opened`
/// - `mail`: 100 000 rows, B-trees on `sender` and `receiver`
pub fn create_test_catalog() -> Catalog {
    let mut catalog = Catalog::new();

    let t0 = catalog.add_table(
        TableDef::new("t0", 100.0)
            .row_id("rowid")
            .column("x", DataType::Integer),
    );
    catalog.add_file(FileDef::record("t0_record", t0, ColumnId(0), &[ColumnId(1)]));

    let t1 = catalog.add_table(
        TableDef::new("t1", 1_000.0)
            .row_id("rowid")
            .column("y", DataType::Integer)
            .column("label", DataType::Text),
    );
    catalog.add_file(FileDef::record(
        "t1_record",
        t1,
        ColumnId(0),
        &[ColumnId(1), ColumnId(2)],
    ));
    catalog.add_file(FileDef::btree("t1_y", t1, &[ColumnId(1)]).distinct_count(1_000.0));

    let ticket = catalog.add_table(
        TableDef::new("ticket", 20_000.0)
            .row_id("rowid")
            .column("opened", DataType::Integer)
            .column("queue", DataType::Text)
            .column("priority", DataType::Integer),
    );
    catalog.add_file(FileDef::record(
        "ticket_record",
        ticket,
        ColumnId(0),
        &[ColumnId(1), ColumnId(2), ColumnId(3)],
    ));
    catalog.add_file(
        FileDef::btree("ticket_opened", ticket, &[ColumnId(1)])
            .data(&[ColumnId(2), ColumnId(3)]),
    );

    let mail = catalog.add_table(
        TableDef::new("mail", 100_000.0)
            .row_id("rowid")
            .column("sender", DataType::Integer)
            .column("receiver", DataType::Integer)
            .column("subject", DataType::Text),
    );
    catalog.add_file(FileDef::record(
        "mail_record",
        mail,
        ColumnId(0),
        &[ColumnId(1), ColumnId(2), ColumnId(3)],
    ));
    catalog.add_file(FileDef::btree("mail_sender", mail, &[ColumnId(1)]).distinct_count(10_000.0));
    catalog.add_file(
        FileDef::btree("mail_receiver", mail, &[ColumnId(2)]).distinct_count(10_000.0),
    );

    catalog
}

/// Tables spread over two cascades, plus a local write target.
///
/// - `sales`: distributed, `region` and `amount`
/// - `currency`: replicated
/// - `archive`: local, written through a record file and two B-trees that
///   carry the row id; `region` is not null
/// - `staging`: local source of inserted tuples
pub fn create_distributed_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.add_table(
        TableDef::new("sales", 100_000.0)
            .column("region", DataType::Text)
            .column("amount", DataType::Integer)
            .distribution(Distribution::Distributed),
    );
    catalog.add_table(
        TableDef::new("currency", 200.0)
            .column("code", DataType::Text)
            .distribution(Distribution::Replicated),
    );
    catalog.add_cascade("shard0");
    catalog.add_cascade("shard1");

    let archive = catalog.add_table(
        TableDef::new("archive", 5_000.0)
            .row_id("rowid")
            .column("region", DataType::Text)
            .column("amount", DataType::Integer)
            .not_null("region"),
    );
    catalog.add_file(FileDef::record(
        "archive_record",
        archive,
        ColumnId(0),
        &[ColumnId(1), ColumnId(2)],
    ));
    catalog.add_file(
        FileDef::btree("archive_region", archive, &[ColumnId(1)]).data(&[ColumnId(0)]),
    );
    catalog.add_file(
        FileDef::btree("archive_amount", archive, &[ColumnId(2)]).data(&[ColumnId(0)]),
    );

    let staging = catalog.add_table(
        TableDef::new("staging", 300.0)
            .row_id("rowid")
            .column("region", DataType::Text)
            .column("amount", DataType::Integer),
    );
    catalog.add_file(FileDef::record(
        "staging_record",
        staging,
        ColumnId(0),
        &[ColumnId(1), ColumnId(2)],
    ));
    catalog
}

/// `count` tables named `r0`, `r1`, ... with the given cardinalities and a
/// `value` column, scanned through a record file
pub fn create_synthetic_catalog(counts: &[f64]) -> Catalog {
    let mut catalog = Catalog::new();
    for (position, count) in counts.iter().enumerate() {
        let name = format!("r{}", position);
        let table = catalog.add_table(
            TableDef::new(&name, *count)
                .row_id("rowid")
                .column("value", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            &format!("{}_record", name),
            table,
            ColumnId(0),
            &[ColumnId(1)],
        ));
    }
    catalog
}

/// Like [`create_synthetic_catalog`], with a covering B-tree on every
/// `value` column that sees `distinct` different values
pub fn create_indexed_catalog(counts: &[f64], distinct: f64) -> Catalog {
    let mut catalog = create_synthetic_catalog(counts);
    for position in 0..counts.len() {
        let name = format!("r{}", position);
        let table = catalog
            .table_by_name(&name)
            .expect("synthetic table")
            .id;
        catalog.add_file(
            FileDef::btree(&format!("{}_value", name), table, &[ColumnId(1)])
                .data(&[ColumnId(0)])
                .distinct_count(distinct),
        );
    }
    catalog
}

pub fn kind_of<'e>(env: &'e Environment<'_>, id: CandidateId) -> &'e CandidateKind {
    &candidate_of(env, id).kind
}

pub fn candidate_of<'e>(env: &'e Environment<'_>, id: CandidateId) -> &'e Candidate {
    env.candidate(id).unwrap()
}

/// Every candidate below and including `id`, depth first
pub fn collect_tree(env: &Environment<'_>, id: CandidateId, into: &mut Vec<CandidateId>) {
    into.push(id);
    for operand in candidate_of(env, id).operands() {
        collect_tree(env, operand, into);
    }
}
