//! In-process lakehouse with copy-on-write branches.
//!
//! Tables are shared between branches through `Arc` and only copied when a
//! branch writes to them. Every branch remembers the table versions it was
//! forked from, which is what merge conflict detection works against.
//!
//! When opened on a warehouse directory the whole catalog is persisted as
//! `catalog.json` after every mutation (temp file + rename), so state
//! survives between processes. A single process owns the directory at a time.

use super::{BranchInfo, Lakehouse, LakehouseHealth, LakehouseOp, MergeMode, MergeResult};
use crate::error::{LakehouseError, LakehouseResult};
use crate::model::{BranchName, Row, TableName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableState {
    /// Identity of the table; changes if the table is recreated
    table_id: String,
    columns: Vec<String>,
    rows: Arc<Vec<Row>>,
}

/// What a table looked like when a branch was forked.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableMark {
    table_id: String,
    columns: Vec<String>,
    row_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForkPoint {
    branch: BranchName,
    commit: String,
    tables: BTreeMap<TableName, TableMark>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BranchState {
    head: String,
    tables: BTreeMap<TableName, TableState>,
    fork: Option<ForkPoint>,
    created_at: DateTime<Utc>,
}

impl BranchState {
    fn root() -> Self {
        Self {
            head: new_commit_id(),
            tables: BTreeMap::new(),
            fork: None,
            created_at: Utc::now(),
        }
    }

    fn marks(&self) -> BTreeMap<TableName, TableMark> {
        self.tables
            .iter()
            .map(|(name, table)| {
                (
                    name.clone(),
                    TableMark {
                        table_id: table.table_id.clone(),
                        columns: table.columns.clone(),
                        row_count: table.rows.len(),
                    },
                )
            })
            .collect()
    }

    fn info(&self, name: &BranchName) -> BranchInfo {
        BranchInfo {
            name: name.clone(),
            head: self.head.clone(),
            forked_from: self.fork.as_ref().map(|f| f.branch.clone()),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogState {
    branches: BTreeMap<BranchName, BranchState>,
}

impl CatalogState {
    fn branch(&self, name: &BranchName) -> LakehouseResult<&BranchState> {
        self.branches
            .get(name)
            .ok_or_else(|| LakehouseError::BranchNotFound(name.to_string()))
    }

    fn branch_mut(&mut self, name: &BranchName) -> LakehouseResult<&mut BranchState> {
        self.branches
            .get_mut(name)
            .ok_or_else(|| LakehouseError::BranchNotFound(name.to_string()))
    }

    fn table(&self, branch: &BranchName, table: &TableName) -> LakehouseResult<&TableState> {
        self.branch(branch)?
            .tables
            .get(table)
            .ok_or_else(|| LakehouseError::TableNotFound {
                branch: branch.to_string(),
                table: table.to_string(),
            })
    }
}

fn new_commit_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// In-process [`Lakehouse`] implementation.
pub struct MemoryLakehouse {
    state: Mutex<CatalogState>,
    main: BranchName,
    merge_mode: MergeMode,
    persist_path: Option<PathBuf>,
    /// Single-shot injected failures per operation
    faults: Mutex<HashMap<LakehouseOp, String>>,
    /// Next append larger than this many rows fails with a connection error
    fail_after_rows: Mutex<Option<usize>>,
    /// Single-shot injected latency per operation
    delays: Mutex<HashMap<LakehouseOp, Duration>>,
}

impl MemoryLakehouse {
    /// Create an empty lakehouse with a `main` branch.
    pub fn new() -> Self {
        Self::with_main_branch(BranchName::main())
    }

    /// Create an empty lakehouse with the given default branch.
    pub fn with_main_branch(main: BranchName) -> Self {
        let mut state = CatalogState::default();
        state.branches.insert(main.clone(), BranchState::root());
        Self {
            state: Mutex::new(state),
            main,
            merge_mode: MergeMode::default(),
            persist_path: None,
            faults: Mutex::new(HashMap::new()),
            fail_after_rows: Mutex::new(None),
            delays: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or initialize) a lakehouse persisted in `dir`.
    pub fn open_dir(dir: &Path, main: BranchName) -> LakehouseResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            LakehouseError::Storage(format!(
                "Failed to create warehouse directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let path = dir.join(CATALOG_FILE);
        let mut state = if path.exists() {
            let content = fs::read(&path).map_err(|e| {
                LakehouseError::Storage(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_json::from_slice::<CatalogState>(&content).map_err(|e| {
                LakehouseError::Storage(format!("Corrupt catalog {}: {}", path.display(), e))
            })?
        } else {
            CatalogState::default()
        };

        state
            .branches
            .entry(main.clone())
            .or_insert_with(BranchState::root);

        info!(
            path = %path.display(),
            branches = state.branches.len(),
            "Warehouse catalog opened"
        );

        let lakehouse = Self {
            state: Mutex::new(state),
            main,
            merge_mode: MergeMode::default(),
            persist_path: Some(path),
            faults: Mutex::new(HashMap::new()),
            fail_after_rows: Mutex::new(None),
            delays: Mutex::new(HashMap::new()),
        };
        lakehouse.persist(&lakehouse.state.lock())?;
        Ok(lakehouse)
    }

    /// Set the merge conflict policy.
    pub fn with_merge_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    /// The default branch.
    pub fn main_branch(&self) -> &BranchName {
        &self.main
    }

    /// Make the next call of `op` fail with a connection error.
    pub fn fail_next(&self, op: LakehouseOp, message: impl Into<String>) {
        self.faults.lock().insert(op, message.into());
    }

    /// Make the next call of `op` wait `delay` before running.
    pub fn delay_next(&self, op: LakehouseOp, delay: Duration) {
        self.delays.lock().insert(op, delay);
    }

    /// Make the next append of more than `rows` rows fail mid-write.
    ///
    /// The append stays atomic: none of its rows are written.
    pub fn fail_after_rows(&self, rows: usize) {
        *self.fail_after_rows.lock() = Some(rows);
    }

    /// Create `table` on the main branch if needed and append `rows` to it.
    pub fn seed_table(&self, table: &TableName, rows: Vec<Row>) -> LakehouseResult<String> {
        let main = self.main.clone();
        self.mutate(|state| {
            let branch = state.branch_mut(&main)?;
            let entry = branch.tables.entry(table.clone()).or_insert_with(|| TableState {
                table_id: Uuid::new_v4().to_string(),
                columns: Vec::new(),
                rows: Arc::new(Vec::new()),
            });
            for row in &rows {
                for column in row.keys() {
                    if !entry.columns.contains(column) {
                        entry.columns.push(column.clone());
                    }
                }
            }
            Arc::make_mut(&mut entry.rows).extend(rows);
            branch.head = new_commit_id();
            Ok(branch.head.clone())
        })
    }

    /// CRC32 of the canonical JSON encoding of a table's rows.
    pub fn fingerprint(&self, branch: &BranchName, table: &TableName) -> LakehouseResult<u32> {
        let state = self.state.lock();
        let table = state.table(branch, table)?;
        let bytes = serde_json::to_vec(table.rows.as_ref())
            .map_err(|e| LakehouseError::Storage(e.to_string()))?;
        Ok(crc32fast::hash(&bytes))
    }

    /// Apply any injected delay or failure for `op`.
    async fn enter(&self, op: LakehouseOp) -> LakehouseResult<()> {
        let delay = self.delays.lock().remove(&op);
        if let Some(delay) = delay {
            debug!(op = ?op, delay_ms = delay.as_millis() as u64, "Injected lakehouse delay");
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.faults.lock().remove(&op) {
            debug!(op = ?op, "Injected lakehouse fault");
            return Err(LakehouseError::Connection(message));
        }
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&CatalogState) -> LakehouseResult<T>) -> LakehouseResult<T> {
        let state = self.state.lock();
        f(&state)
    }

    /// Apply `f` to a copy of the catalog and swap it in only if `f` and
    /// persistence both succeed.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut CatalogState) -> LakehouseResult<T>,
    ) -> LakehouseResult<T> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *state = next;
        Ok(out)
    }

    fn persist(&self, state: &CatalogState) -> LakehouseResult<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        let bytes =
            serde_json::to_vec(state).map_err(|e| LakehouseError::Storage(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| {
            LakehouseError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, path).map_err(|e| {
            LakehouseError::Storage(format!("Failed to replace {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    fn conflict(from: &BranchName, onto: &BranchName, reason: impl Into<String>) -> LakehouseError {
        LakehouseError::MergeConflict {
            from: from.to_string(),
            onto: onto.to_string(),
            reason: reason.into(),
        }
    }
}

impl Default for MemoryLakehouse {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Lakehouse for MemoryLakehouse {
    async fn health_check(&self) -> LakehouseResult<LakehouseHealth> {
        let branch_count = self.state.lock().branches.len();
        let message = match self.persist_path {
            Some(ref path) => format!("warehouse catalog at {}", path.display()),
            None => "in-memory catalog".to_string(),
        };
        Ok(LakehouseHealth {
            is_healthy: true,
            branch_count,
            message: Some(message),
        })
    }

    async fn create_branch(
        &self,
        name: &BranchName,
        from: &BranchName,
    ) -> LakehouseResult<BranchInfo> {
        self.enter(LakehouseOp::CreateBranch).await?;
        let info = self.mutate(|state| {
            if state.branches.contains_key(name) {
                return Err(LakehouseError::BranchExists(name.to_string()));
            }
            let source = state.branch(from)?;
            let branch = BranchState {
                head: source.head.clone(),
                tables: source.tables.clone(),
                fork: Some(ForkPoint {
                    branch: from.clone(),
                    commit: source.head.clone(),
                    tables: source.marks(),
                }),
                created_at: Utc::now(),
            };
            let info = branch.info(name);
            state.branches.insert(name.clone(), branch);
            Ok(info)
        })?;

        debug!(branch = %name, from = %from, head = %info.head, "Branch created");
        Ok(info)
    }

    async fn delete_branch(&self, name: &BranchName) -> LakehouseResult<bool> {
        self.enter(LakehouseOp::DeleteBranch).await?;
        if *name == self.main {
            return Err(LakehouseError::InvalidName(format!(
                "cannot delete default branch {}",
                name
            )));
        }
        if !self.state.lock().branches.contains_key(name) {
            return Ok(false);
        }
        self.mutate(|state| Ok(state.branches.remove(name).is_some()))
    }

    async fn branch_exists(&self, name: &BranchName) -> LakehouseResult<bool> {
        self.read(|state| Ok(state.branches.contains_key(name)))
    }

    async fn list_branches(&self) -> LakehouseResult<Vec<BranchInfo>> {
        self.enter(LakehouseOp::ListBranches).await?;
        self.read(|state| {
            Ok(state
                .branches
                .iter()
                .map(|(name, branch)| branch.info(name))
                .collect())
        })
    }

    async fn head(&self, branch: &BranchName) -> LakehouseResult<String> {
        self.read(|state| Ok(state.branch(branch)?.head.clone()))
    }

    async fn table_exists(&self, branch: &BranchName, table: &TableName) -> LakehouseResult<bool> {
        self.enter(LakehouseOp::TableExists).await?;
        self.read(|state| Ok(state.branch(branch)?.tables.contains_key(table)))
    }

    async fn table_schema(
        &self,
        branch: &BranchName,
        table: &TableName,
    ) -> LakehouseResult<Vec<String>> {
        self.enter(LakehouseOp::TableSchema).await?;
        self.read(|state| Ok(state.table(branch, table)?.columns.clone()))
    }

    async fn create_table(
        &self,
        branch: &BranchName,
        table: &TableName,
        columns: &[String],
    ) -> LakehouseResult<String> {
        self.enter(LakehouseOp::CreateTable).await?;
        self.mutate(|state| {
            let target = state.branch_mut(branch)?;
            if target.tables.contains_key(table) {
                return Err(LakehouseError::TableExists {
                    branch: branch.to_string(),
                    table: table.to_string(),
                });
            }
            target.tables.insert(
                table.clone(),
                TableState {
                    table_id: Uuid::new_v4().to_string(),
                    columns: columns.to_vec(),
                    rows: Arc::new(Vec::new()),
                },
            );
            target.head = new_commit_id();
            Ok(target.head.clone())
        })
    }

    async fn append(
        &self,
        branch: &BranchName,
        table: &TableName,
        rows: &[Row],
    ) -> LakehouseResult<String> {
        self.enter(LakehouseOp::Append).await?;
        {
            let mut armed = self.fail_after_rows.lock();
            if let Some(limit) = *armed {
                if rows.len() > limit {
                    *armed = None;
                    return Err(LakehouseError::Connection(format!(
                        "connection lost after {} of {} rows",
                        limit,
                        rows.len()
                    )));
                }
            }
        }

        self.mutate(|state| {
            let target = state.branch_mut(branch)?;
            let table_state =
                target
                    .tables
                    .get_mut(table)
                    .ok_or_else(|| LakehouseError::TableNotFound {
                        branch: branch.to_string(),
                        table: table.to_string(),
                    })?;

            if let Some(column) = rows
                .iter()
                .flat_map(|row| row.keys())
                .find(|column| !table_state.columns.contains(column))
            {
                return Err(LakehouseError::SchemaMismatch {
                    expected: table_state.columns.join(","),
                    actual: format!("unknown column {}", column),
                });
            }

            Arc::make_mut(&mut table_state.rows).extend(rows.iter().cloned());
            target.head = new_commit_id();
            Ok(target.head.clone())
        })
    }

    async fn scan(
        &self,
        branch: &BranchName,
        table: &TableName,
        columns: Option<&[String]>,
    ) -> LakehouseResult<Vec<Row>> {
        self.enter(LakehouseOp::Scan).await?;
        let rows = self.read(|state| Ok(Arc::clone(&state.table(branch, table)?.rows)))?;

        Ok(match columns {
            None => rows.as_ref().clone(),
            Some(columns) => rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                        .collect()
                })
                .collect(),
        })
    }

    async fn row_count(&self, branch: &BranchName, table: &TableName) -> LakehouseResult<usize> {
        self.read(|state| Ok(state.table(branch, table)?.rows.len()))
    }

    async fn merge(&self, from: &BranchName, onto: &BranchName) -> LakehouseResult<MergeResult> {
        self.enter(LakehouseOp::Merge).await?;
        if from == onto {
            return Err(Self::conflict(from, onto, "cannot merge a branch into itself"));
        }
        let mode = self.merge_mode;

        let result = self.mutate(|state| {
            let source = state.branch(from)?.clone();
            let fork = source
                .fork
                .as_ref()
                .filter(|fork| fork.branch == *onto)
                .ok_or_else(|| Self::conflict(from, onto, "branch was not forked from target"))?;

            let target = state.branch_mut(onto)?;
            if mode == MergeMode::FastForwardOnly && target.head != fork.commit {
                return Err(Self::conflict(
                    from,
                    onto,
                    format!("target moved from {} to {}", fork.commit, target.head),
                ));
            }

            let mut tables_changed = Vec::new();
            for (name, table) in &source.tables {
                match fork.tables.get(name) {
                    Some(mark) if mark.table_id == table.table_id => {
                        let appended = &table.rows[mark.row_count..];
                        if appended.is_empty() {
                            continue;
                        }
                        let current = target.tables.get_mut(name).ok_or_else(|| {
                            Self::conflict(from, onto, format!("{} was dropped", name))
                        })?;
                        if current.table_id != mark.table_id {
                            let reason = format!("{} was recreated", name);
                            return Err(Self::conflict(from, onto, reason));
                        }
                        if current.columns != mark.columns {
                            return Err(Self::conflict(
                                from,
                                onto,
                                format!("schema of {} changed", name),
                            ));
                        }
                        Arc::make_mut(&mut current.rows).extend(appended.iter().cloned());
                        tables_changed.push(name.clone());
                    }
                    Some(_) => {
                        return Err(Self::conflict(
                            from,
                            onto,
                            format!("{} was recreated on the source branch", name),
                        ));
                    }
                    None => {
                        if target.tables.contains_key(name) {
                            return Err(Self::conflict(
                                from,
                                onto,
                                format!("{} was created concurrently", name),
                            ));
                        }
                        target.tables.insert(name.clone(), table.clone());
                        tables_changed.push(name.clone());
                    }
                }
            }

            if !tables_changed.is_empty() {
                target.head = new_commit_id();
            }
            let commit_id = target.head.clone();

            // Re-fork the source at the merged state so a repeated merge is a no-op.
            let refork = ForkPoint {
                branch: onto.clone(),
                commit: commit_id.clone(),
                tables: source.marks(),
            };
            state.branch_mut(from)?.fork = Some(refork);

            Ok(MergeResult {
                commit_id,
                tables_changed,
                merged_at: Utc::now(),
            })
        })?;

        info!(
            from = %from,
            onto = %onto,
            commit_id = %result.commit_id,
            tables = result.tables_changed.len(),
            "Branch merged"
        );
        Ok(result)
    }
}
