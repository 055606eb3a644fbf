use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::MirrorResult;
use crate::schema::{DestinationTableSchema, SchemaRegistry};
use crate::store::raw_log::UnchangedColumnsGroup;
use crate::types::TableName;

/// What has to be merged into one destination table for a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub schema: Arc<DestinationTableSchema>,
    /// Distinct unchanged wide column sets found among the table's rows, sorted. Each set
    /// needs its own update clause.
    pub unchanged_sets: Vec<BTreeSet<String>>,
}

impl MergePlan {
    pub fn table(&self) -> &TableName {
        &self.schema.name
    }

    /// Returns the non key columns written by an update of a row whose unchanged set is
    /// `unchanged`, in schema order.
    pub fn updated_columns<'a>(
        &'a self,
        unchanged: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a str> + 'a {
        let primary_key = self.schema.primary_key();
        self.schema
            .column_names()
            .filter(move |name| *name != primary_key && !unchanged.contains(*name))
    }
}

/// Groups the window's unchanged column sets per destination table.
///
/// Plans come out sorted by table name, so merges always touch tables in the same order.
/// Fails with [`crate::error::ErrorKind::MissingTableSchema`] for tables unknown to the
/// registry.
pub fn build_merge_plans(
    groups: Vec<UnchangedColumnsGroup>,
    registry: &SchemaRegistry,
) -> MirrorResult<Vec<MergePlan>> {
    let mut sets_by_table: BTreeMap<TableName, BTreeSet<BTreeSet<String>>> = BTreeMap::new();
    for group in groups {
        sets_by_table
            .entry(group.destination_table)
            .or_default()
            .insert(group.unchanged_wide_columns);
    }

    sets_by_table
        .into_iter()
        .map(|(table, unchanged_sets)| {
            Ok(MergePlan {
                schema: registry.get(&table)?,
                unchanged_sets: unchanged_sets.into_iter().collect(),
            })
        })
        .collect()
}
