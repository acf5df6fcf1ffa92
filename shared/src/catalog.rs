/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Catalog model consumed by the planner.
//!
//! The planner only needs metadata: which tables exist, how many rows they
//! hold, which physical files store which columns and what each file is able
//! to do (scan, search, fetch by key, deliver an order, ...). Everything here
//! is plain data and can be loaded from JSON for fixtures.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

/// Position of a column inside its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CascadeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    RowId,
    Integer,
    BigInt,
    Float,
    Text,
    Binary,
    Date,
    Word,
}

impl DataType {
    /// Default storage size in bytes used when a column does not declare one
    pub fn default_size(&self) -> f64 {
        match self {
            DataType::RowId | DataType::Integer => 4.0,
            DataType::BigInt | DataType::Float | DataType::Date => 8.0,
            DataType::Text => 32.0,
            DataType::Binary => 64.0,
            DataType::Word => 16.0,
        }
    }
}

/// How the rows of a table are spread over cascade servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Distribution {
    #[default]
    Local,
    /// Each cascade holds a disjoint shard
    Distributed,
    /// Each cascade holds a full copy
    Replicated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Heap file holding whole tuples, keyed by row id
    Record,
    BTree,
    Bitmap,
    FullText,
    Array,
    Vector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub id: ColumnId,
    pub name: String,
    pub data_type: DataType,
    pub size: f64,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<ColumnId>,
    pub parent: TableId,
    pub parent_columns: Vec<ColumnId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub files: Vec<FileId>,
    pub estimate_count: f64,
    #[serde(default)]
    pub row_id: Option<ColumnId>,
    #[serde(default)]
    pub distribution: Distribution,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// System table materialised on demand, it has no physical files
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub need_lock: bool,
}

impl TableDef {
    pub fn new(name: &str, estimate_count: f64) -> Self {
        Self {
            id: TableId(0),
            name: name.to_string(),
            columns: Vec::new(),
            files: Vec::new(),
            estimate_count,
            row_id: None,
            distribution: Distribution::Local,
            foreign_keys: Vec::new(),
            is_virtual: false,
            need_lock: false,
        }
    }

    /// Appends a column; its id is its position
    pub fn column(mut self, name: &str, data_type: DataType) -> Self {
        let id = ColumnId(self.columns.len() as u32);
        self.columns.push(ColumnDef {
            id,
            name: name.to_string(),
            size: data_type.default_size(),
            data_type,
            nullable: true,
        });
        self
    }

    pub fn not_null(mut self, name: &str) -> Self {
        if let Some(column) = self.columns.iter_mut().find(|c| c.name == name) {
            column.nullable = false;
        }
        self
    }

    /// Appends a row id column and marks it as the table's row identifier
    pub fn row_id(mut self, name: &str) -> Self {
        let id = ColumnId(self.columns.len() as u32);
        self.columns.push(ColumnDef {
            id,
            name: name.to_string(),
            data_type: DataType::RowId,
            size: DataType::RowId.default_size(),
            nullable: false,
        });
        self.row_id = Some(id);
        self
    }

    pub fn distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn virtual_table(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn foreign_key(mut self, key: ForeignKey) -> Self {
        self.foreign_keys.push(key);
        self
    }

    pub fn column_id(&self, name: &str) -> Option<ColumnId> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.id)
    }

    pub fn column_def(&self, column: ColumnId) -> Option<&ColumnDef> {
        self.columns.get(column.0 as usize)
    }

    /// Sum of declared column sizes
    pub fn tuple_size(&self) -> f64 {
        self.columns.iter().map(|c| c.size).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileKey {
    pub column: ColumnId,
    #[serde(default)]
    pub direction: SortDirection,
}

/// What a file driver is able to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileCapabilities {
    pub scan: bool,
    pub search: bool,
    pub fetch: bool,
    pub order: bool,
    pub bitset: bool,
    pub limit: bool,
    pub undo: bool,
    pub estimate_count: bool,
    pub grouping: bool,
    pub word: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileCostParams {
    /// Cost paid once per open, e.g. tree descent
    pub overhead: f64,
    /// Cost paid per tuple read
    pub process_cost: f64,
    /// Number of distinct values of the leading key, if known
    #[serde(default)]
    pub distinct_count: Option<f64>,
}

impl Default for FileCostParams {
    fn default() -> Self {
        Self {
            overhead: 1.0,
            process_cost: 1.0,
            distinct_count: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDef {
    pub id: FileId,
    pub name: String,
    pub table: TableId,
    pub kind: FileKind,
    #[serde(default)]
    pub keys: Vec<FileKey>,
    #[serde(default)]
    pub data: Vec<ColumnId>,
    #[serde(default)]
    pub capability: FileCapabilities,
    #[serde(default)]
    pub cost: FileCostParams,
    #[serde(default)]
    pub unique: bool,
    /// The file generates its key (row id) on insert
    #[serde(default)]
    pub key_generated: bool,
    /// Writes to this file keep an exclusive latch and must not run in parallel
    #[serde(default)]
    pub exclusive_latch: bool,
    #[serde(default)]
    pub need_log: bool,
}

impl FileDef {
    pub fn new(name: &str, table: TableId, kind: FileKind) -> Self {
        Self {
            id: FileId(0),
            name: name.to_string(),
            table,
            kind,
            keys: Vec::new(),
            data: Vec::new(),
            capability: FileCapabilities::default(),
            cost: FileCostParams::default(),
            unique: false,
            key_generated: false,
            exclusive_latch: false,
            need_log: false,
        }
    }

    /// A record file: keyed by row id, stores the given columns, scannable and fetchable
    pub fn record(name: &str, table: TableId, row_id: ColumnId, data: &[ColumnId]) -> Self {
        let mut file = Self::new(name, table, FileKind::Record)
            .key(row_id, SortDirection::Ascending)
            .data(data);
        file.capability.scan = true;
        file.capability.fetch = true;
        file.capability.undo = true;
        file.key_generated = true;
        file.unique = true;
        file
    }

    /// An ordered, searchable B-tree index on the given columns
    pub fn btree(name: &str, table: TableId, keys: &[ColumnId]) -> Self {
        let mut file = Self::new(name, table, FileKind::BTree);
        for key in keys {
            file = file.key(*key, SortDirection::Ascending);
        }
        file.capability.scan = true;
        file.capability.search = true;
        file.capability.order = true;
        file.capability.limit = true;
        file.capability.undo = true;
        file
    }

    pub fn key(mut self, column: ColumnId, direction: SortDirection) -> Self {
        self.keys.push(FileKey { column, direction });
        self
    }

    pub fn data(mut self, columns: &[ColumnId]) -> Self {
        self.data.extend_from_slice(columns);
        self
    }

    pub fn capability(mut self, capability: FileCapabilities) -> Self {
        self.capability = capability;
        self
    }

    pub fn cost(mut self, overhead: f64, process_cost: f64) -> Self {
        self.cost.overhead = overhead;
        self.cost.process_cost = process_cost;
        self
    }

    pub fn distinct_count(mut self, count: f64) -> Self {
        self.cost.distinct_count = Some(count);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn is_able_to_fetch(&self) -> bool {
        self.capability.fetch
    }

    pub fn is_able_to_undo(&self) -> bool {
        self.capability.undo
    }

    pub fn is_key_generated(&self) -> bool {
        self.key_generated
    }

    pub fn is_able_to_scan(&self) -> bool {
        self.capability.scan
    }

    pub fn key_fields(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.keys.iter().map(|k| k.column)
    }

    pub fn data_fields(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.data.iter().copied()
    }

    /// Columns whose values must be supplied when a tuple is put into the file
    pub fn put_key_fields(&self) -> impl Iterator<Item = ColumnId> + '_ {
        let generated = self.key_generated;
        self.keys
            .iter()
            .filter(move |_| !generated)
            .map(|k| k.column)
    }

    /// Whether the file can hand back the column's value
    pub fn stores(&self, column: ColumnId) -> bool {
        match self.kind {
            // bitmap and full-text files answer searches but do not return values
            FileKind::Bitmap | FileKind::FullText => false,
            _ => self.data.contains(&column) || self.key_fields().any(|k| k == column),
        }
    }

    /// Whether any key or data column of the file is the column
    pub fn covers(&self, column: ColumnId) -> bool {
        self.data.contains(&column) || self.key_fields().any(|k| k == column)
    }

    pub fn key_position(&self, column: ColumnId) -> Option<usize> {
        self.keys.iter().position(|k| k.column == column)
    }

    pub fn leading_key(&self) -> Option<ColumnId> {
        self.keys.first().map(|k| k.column)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeDef {
    pub id: CascadeId,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub files: Vec<FileDef>,
    #[serde(default)]
    pub cascades: Vec<CascadeDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn add_table(&mut self, mut table: TableDef) -> TableId {
        let id = TableId(self.tables.len() as u32);
        table.id = id;
        self.tables.push(table);
        id
    }

    /// Registers a file and links it to its table
    pub fn add_file(&mut self, mut file: FileDef) -> FileId {
        let id = FileId(self.files.len() as u32);
        file.id = id;
        if let Some(table) = self.tables.get_mut(file.table.0 as usize) {
            table.files.push(id);
        }
        self.files.push(file);
        id
    }

    pub fn add_cascade(&mut self, name: &str) -> CascadeId {
        let id = CascadeId(self.cascades.len() as u32);
        self.cascades.push(CascadeDef {
            id,
            name: name.to_string(),
        });
        id
    }

    pub fn table(&self, id: TableId) -> Option<&TableDef> {
        self.tables.get(id.0 as usize)
    }

    pub fn table_by_name(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn file(&self, id: FileId) -> Option<&FileDef> {
        self.files.get(id.0 as usize)
    }

    pub fn files_of(&self, table: TableId) -> impl Iterator<Item = &FileDef> + '_ {
        self.table(table)
            .into_iter()
            .flat_map(|t| t.files.iter())
            .filter_map(move |id| self.file(*id))
    }

    /// Files of a table able to return the column's value
    pub fn files_for_column(&self, table: TableId, column: ColumnId) -> Vec<FileId> {
        self.files_of(table)
            .filter(|f| f.stores(column))
            .map(|f| f.id)
            .collect()
    }

    /// Files of a table that can drive a sequential scan
    pub fn scan_files(&self, table: TableId) -> Vec<FileId> {
        self.files_of(table)
            .filter(|f| f.is_able_to_scan())
            .map(|f| f.id)
            .collect()
    }

    /// File able to fetch whole tuples by the table's row id
    pub fn fetch_file(&self, table: TableId) -> Option<&FileDef> {
        let row_id = self.table(table)?.row_id?;
        self.files_of(table)
            .find(|f| f.is_able_to_fetch() && f.leading_key() == Some(row_id))
    }

    pub fn cascade(&self, id: CascadeId) -> Option<&CascadeDef> {
        self.cascades.get(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_catalog() -> (Catalog, TableId) {
        let mut catalog = Catalog::new();
        let table = catalog.add_table(
            TableDef::new("employee", 1000.0)
                .row_id("rowid")
                .column("name", DataType::Text)
                .column("salary", DataType::Integer),
        );
        catalog.add_file(FileDef::record(
            "employee_record",
            table,
            ColumnId(0),
            &[ColumnId(1), ColumnId(2)],
        ));
        catalog.add_file(FileDef::btree("employee_salary", table, &[ColumnId(2)]));
        (catalog, table)
    }

    #[test]
    fn test_files_are_linked_to_table() {
        let (catalog, table) = create_test_catalog();
        assert_eq!(catalog.table(table).map(|t| t.files.len()), Some(2));
        assert_eq!(catalog.scan_files(table).len(), 2);
    }

    #[test]
    fn test_files_for_column() {
        let (catalog, table) = create_test_catalog();
        assert_eq!(catalog.files_for_column(table, ColumnId(1)), vec![FileId(0)]);
        assert_eq!(
            catalog.files_for_column(table, ColumnId(2)),
            vec![FileId(0), FileId(1)]
        );
    }

    #[test]
    fn test_fetch_file_uses_row_id() {
        let (catalog, table) = create_test_catalog();
        assert_eq!(catalog.fetch_file(table).map(|f| f.id), Some(FileId(0)));
    }

    #[test]
    fn test_put_key_fields_skip_generated_keys() {
        let (catalog, _) = create_test_catalog();
        let record = catalog.file(FileId(0)).unwrap();
        assert_eq!(record.put_key_fields().count(), 0);
        let index = catalog.file(FileId(1)).unwrap();
        assert_eq!(index.put_key_fields().collect::<Vec<_>>(), vec![ColumnId(2)]);
    }

    #[test]
    fn test_catalog_round_trips_through_json() {
        let (catalog, _) = create_test_catalog();
        let json = serde_json::to_string(&catalog).unwrap();
        let loaded = Catalog::from_json(&json).unwrap();
        assert_eq!(loaded.tables[0].name, "employee");
        assert_eq!(loaded.files.len(), 2);
    }
}
