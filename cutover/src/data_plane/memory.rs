use anyhow::{anyhow, bail};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    ops::Bound,
    sync::Arc,
};

use crate::data_plane::{CompareOptions, CopyBatch, DataPlaneClient, TableComparison};

/// Rows sampled by a quick comparison.
pub const QUICK_SAMPLE_SIZE: usize = 100;

/// Data-plane operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    EnableTrigger,
    DisableTrigger,
    CountRows,
    CopyBatch,
    CompareTables,
    SwitchReadPath,
    RevertReadPath,
}

type Table = BTreeMap<String, Value>;

#[derive(Debug, Default)]
struct Database {
    tables: HashMap<String, Table>,
    triggers: HashSet<(String, String)>,
    read_paths: HashMap<String, String>,
    /// Calls left to succeed before the operation starts failing.
    faults: HashMap<Fault, usize>,
}

impl Database {
    fn check(&mut self, fault: Fault) -> anyhow::Result<()> {
        let Some(remaining) = self.faults.get_mut(&fault) else {
            return Ok(());
        };

        if *remaining == 0 {
            bail!("injected {fault:?} failure");
        }

        *remaining -= 1;

        Ok(())
    }

    fn table(&self, name: &str) -> anyhow::Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| anyhow!("table {name} does not exist"))
    }

    fn table_mut(&mut self, name: &str) -> anyhow::Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| anyhow!("table {name} does not exist"))
    }
}

/// In-process data plane keeping tables as ordered maps of row key to row.
///
/// Writes made through [`MemoryDataPlane::write`] while a dual-write trigger is
/// installed are mirrored to the target table, like a database trigger would.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataPlane(Arc<RwLock<Database>>);

impl MemoryDataPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, table: impl Into<String>) {
        self.0.write().tables.entry(table.into()).or_default();
    }

    pub fn seed<K: Into<String>>(
        &self,
        table: impl Into<String>,
        rows: impl IntoIterator<Item = (K, Value)>,
    ) {
        let mut db = self.0.write();
        let table = db.tables.entry(table.into()).or_default();

        for (key, row) in rows {
            table.insert(key.into(), row);
        }
    }

    /// Upserts a row the way an application writer would.
    pub fn write(&self, table: &str, key: impl Into<String>, row: Value) -> anyhow::Result<()> {
        let key = key.into();
        let mut db = self.0.write();

        db.table_mut(table)?.insert(key.to_owned(), row.clone());

        let targets = db
            .triggers
            .iter()
            .filter(|(source, _)| source == table)
            .map(|(_, target)| target.to_owned())
            .collect::<Vec<_>>();

        for target in targets {
            db.table_mut(&target)?.insert(key.to_owned(), row.clone());
        }

        Ok(())
    }

    pub fn delete(&self, table: &str, key: &str) -> anyhow::Result<()> {
        let mut db = self.0.write();

        db.table_mut(table)?.remove(key);

        let targets = db
            .triggers
            .iter()
            .filter(|(source, _)| source == table)
            .map(|(_, target)| target.to_owned())
            .collect::<Vec<_>>();

        for target in targets {
            db.table_mut(&target)?.remove(key);
        }

        Ok(())
    }

    pub fn rows(&self, table: &str) -> Option<BTreeMap<String, Value>> {
        self.0.read().tables.get(table).cloned()
    }

    pub fn is_dual_write_enabled(&self, source: &str, target: &str) -> bool {
        self.0
            .read()
            .triggers
            .contains(&(source.to_owned(), target.to_owned()))
    }

    pub fn read_path(&self, workspace_id: &str) -> Option<String> {
        self.0.read().read_paths.get(workspace_id).cloned()
    }

    /// Makes every following call of `fault` fail until healed.
    pub fn fail(&self, fault: Fault) {
        self.fail_after(fault, 0);
    }

    /// Lets `calls` calls of `fault` succeed, then fails the following ones.
    pub fn fail_after(&self, fault: Fault, calls: usize) {
        self.0.write().faults.insert(fault, calls);
    }

    pub fn heal(&self, fault: Fault) {
        self.0.write().faults.remove(&fault);
    }
}

#[async_trait]
impl DataPlaneClient for MemoryDataPlane {
    async fn enable_dual_write_trigger(
        &self,
        source: &'_ str,
        target: &'_ str,
    ) -> anyhow::Result<()> {
        let mut db = self.0.write();
        db.check(Fault::EnableTrigger)?;
        db.table(source)?;
        db.table(target)?;

        db.triggers.insert((source.to_owned(), target.to_owned()));

        Ok(())
    }

    async fn disable_dual_write_trigger(
        &self,
        source: &'_ str,
        target: &'_ str,
    ) -> anyhow::Result<()> {
        let mut db = self.0.write();
        db.check(Fault::DisableTrigger)?;

        db.triggers.remove(&(source.to_owned(), target.to_owned()));

        Ok(())
    }

    async fn count_rows(&self, table: &'_ str) -> anyhow::Result<u64> {
        let mut db = self.0.write();
        db.check(Fault::CountRows)?;

        Ok(u64::try_from(db.table(table)?.len())?)
    }

    async fn copy_batch(
        &self,
        source: &'_ str,
        target: &'_ str,
        cursor: Option<&'_ str>,
        batch_size: u32,
    ) -> anyhow::Result<CopyBatch> {
        let mut db = self.0.write();
        db.check(Fault::CopyBatch)?;
        db.table(target)?;

        let batch_size = usize::try_from(batch_size)?;
        let lower = match cursor {
            Some(cursor) => Bound::Excluded(cursor.to_owned()),
            None => Bound::Unbounded,
        };

        let mut rows = db
            .table(source)?
            .range::<String, _>((lower, Bound::Unbounded))
            .take(batch_size + 1)
            .map(|(key, row)| (key.to_owned(), row.clone()))
            .collect::<Vec<_>>();

        let done = rows.len() <= batch_size;
        rows.truncate(batch_size);

        let next_cursor = rows
            .last()
            .map(|(key, _)| key.to_owned())
            .or_else(|| cursor.map(str::to_owned));

        let rows_copied = u64::try_from(rows.len())?;
        let table = db.table_mut(target)?;

        for (key, row) in rows {
            table.insert(key, row);
        }

        Ok(CopyBatch {
            rows_copied,
            next_cursor,
            done,
        })
    }

    async fn compare_tables(
        &self,
        source: &'_ str,
        target: &'_ str,
        options: CompareOptions,
    ) -> anyhow::Result<TableComparison> {
        let mut db = self.0.write();
        db.check(Fault::CompareTables)?;

        let source = db.table(source)?;
        let target = db.table(target)?;

        let score = if options.full {
            full_score(source, target)
        } else {
            quick_score(source, target)
        };

        Ok(TableComparison {
            score,
            matched: score >= 100.0,
        })
    }

    async fn switch_read_path(&self, workspace_id: &'_ str, target: &'_ str) -> anyhow::Result<()> {
        let mut db = self.0.write();
        db.check(Fault::SwitchReadPath)?;
        db.table(target)?;

        db.read_paths
            .insert(workspace_id.to_owned(), target.to_owned());

        Ok(())
    }

    async fn revert_read_path(&self, workspace_id: &'_ str, source: &'_ str) -> anyhow::Result<()> {
        let mut db = self.0.write();
        db.check(Fault::RevertReadPath)?;

        db.read_paths
            .insert(workspace_id.to_owned(), source.to_owned());

        Ok(())
    }
}

fn full_score(source: &Table, target: &Table) -> f64 {
    let keys = source.keys().chain(target.keys()).collect::<BTreeSet<_>>();

    if keys.is_empty() {
        return 100.0;
    }

    let matched = keys
        .iter()
        .filter(|key| {
            matches!(
                (source.get(key.as_str()), target.get(key.as_str())),
                (Some(a), Some(b)) if a == b
            )
        })
        .count();

    matched as f64 / keys.len() as f64 * 100.0
}

/// Strided sample of source rows weighted by how close the row counts are.
fn quick_score(source: &Table, target: &Table) -> f64 {
    if source.is_empty() {
        return if target.is_empty() { 100.0 } else { 0.0 };
    }

    let step = (source.len() / QUICK_SAMPLE_SIZE).max(1);
    let sample = source.iter().step_by(step).take(QUICK_SAMPLE_SIZE);

    let (sampled, matched) = sample.fold((0usize, 0usize), |(sampled, matched), (key, row)| {
        let hit = target.get(key) == Some(row);
        (sampled + 1, matched + usize::from(hit))
    });

    let count_ratio =
        source.len().min(target.len()) as f64 / source.len().max(target.len()) as f64;

    matched as f64 / sampled as f64 * count_ratio * 100.0
}
