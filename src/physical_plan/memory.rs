//! An in-memory [`OrderedIndex`] over a sorted copy of a `RecordBatch`.
//!
//! Cursors evaluate scan keys entry by entry, so this is meant for tests,
//! demos and small tables rather than as a storage engine.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arrow::compute::SortOptions;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use datafusion::common::stats::Precision;
use datafusion::common::{Result, Statistics};
use datafusion::error::DataFusionError;
use datafusion::logical_expr::Expr;
use datafusion_common::ScalarValue;

use super::{IndexKeyColumn, OrderedCursor, OrderedIndex};
use crate::types::{compare_key_values, ScanDirection, ScanKey, ScanKind};

/// Counts cursor activity across all cursors of one index.
#[derive(Debug, Default)]
struct CursorCounters {
    opens: AtomicUsize,
    rescans: AtomicUsize,
}

#[derive(Debug)]
pub struct MemoryIndex {
    name: String,
    table_name: String,
    schema: SchemaRef,
    key_schema: SchemaRef,
    key_columns: Vec<IndexKeyColumn>,
    /// Positions of the key columns within `schema`.
    key_positions: Arc<[usize]>,
    unique: bool,
    /// Table rows sorted by the key columns.
    entries: Arc<[Vec<ScalarValue>]>,
    counters: Arc<CursorCounters>,
}

impl MemoryIndex {
    /// Builds an index named `name` over `batch`, keyed on `keys` in order.
    pub fn try_new(
        name: impl Into<String>,
        batch: &RecordBatch,
        keys: &[(&str, SortOptions)],
    ) -> Result<Self> {
        if keys.is_empty() {
            return Err(DataFusionError::Plan(
                "MemoryIndex requires at least one key column".to_string(),
            ));
        }

        let schema = batch.schema();
        let mut key_columns = Vec::with_capacity(keys.len());
        let mut key_positions = Vec::with_capacity(keys.len());
        for (column, options) in keys {
            let position = schema.index_of(column)?;
            let field = schema.field(position);
            key_columns.push(IndexKeyColumn::new(
                *column,
                field.data_type().clone(),
                *options,
            ));
            key_positions.push(position);
        }
        let key_schema = Arc::new(schema.project(&key_positions)?);

        let mut entries = (0..batch.num_rows())
            .map(|row| {
                batch
                    .columns()
                    .iter()
                    .map(|array| ScalarValue::try_from_array(array.as_ref(), row))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|left, right| {
            key_positions
                .iter()
                .zip(keys)
                .map(|(&position, (_, options))| {
                    compare_key_values(&left[position], &right[position], *options)
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        log::debug!(
            "Built MemoryIndex with {} entries on {:?}",
            entries.len(),
            keys.iter().map(|(column, _)| *column).collect::<Vec<_>>()
        );

        Ok(Self {
            name: name.into(),
            table_name: String::new(),
            schema,
            key_schema,
            key_columns,
            key_positions: key_positions.into(),
            unique: false,
            entries: entries.into(),
            counters: Arc::new(CursorCounters::default()),
        })
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Declares the index as enforcing uniqueness of its key.
    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Drops the declared sort order of every key column, as for an index
    /// that cannot return its keys in order.
    pub fn with_unordered_keys(mut self) -> Self {
        for column in &mut self.key_columns {
            column.sort_options = None;
        }
        self
    }

    /// Number of cursors opened on this index so far.
    pub fn open_count(&self) -> usize {
        self.counters.opens.load(Ordering::Relaxed)
    }

    /// Number of rescans issued on cursors of this index so far.
    pub fn rescan_count(&self) -> usize {
        self.counters.rescans.load(Ordering::Relaxed)
    }
}

impl OrderedIndex for MemoryIndex {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn key_columns(&self) -> &[IndexKeyColumn] {
        &self.key_columns
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn schema(&self, kind: ScanKind) -> SchemaRef {
        match kind {
            ScanKind::IndexScan => Arc::clone(&self.schema),
            ScanKind::IndexOnlyScan => Arc::clone(&self.key_schema),
        }
    }

    fn open(
        &self,
        kind: ScanKind,
        direction: ScanDirection,
        keys: &[ScanKey],
        order_by: &[Expr],
    ) -> Result<Box<dyn OrderedCursor>> {
        if !order_by.is_empty() {
            return Err(DataFusionError::NotImplemented(format!(
                "MemoryIndex {} does not support ordering operators",
                self.name
            )));
        }
        if let Some(key) = keys.iter().find(|key| key.column >= self.key_columns.len()) {
            return Err(DataFusionError::Plan(format!(
                "scan key {key} does not refer to a key column of index {}",
                self.name
            )));
        }

        self.counters.opens.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Opening {kind} cursor on {} ({direction}) with {} keys",
            self.name,
            keys.len()
        );

        Ok(Box::new(MemoryCursor {
            entries: Arc::clone(&self.entries),
            key_positions: Arc::clone(&self.key_positions),
            kind,
            direction,
            keys: keys.to_vec(),
            position: 0,
            reached_end: false,
            closed: false,
            buffer: Vec::new(),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn statistics(&self) -> Statistics {
        Statistics::new_unknown(&self.schema).with_num_rows(Precision::Exact(self.entries.len()))
    }
}

/// Cursor over a [`MemoryIndex`].
///
/// Once the end of the entries is reached the cursor keeps reporting
/// exhaustion, even across rescans, until the marker is cleared.
struct MemoryCursor {
    entries: Arc<[Vec<ScalarValue>]>,
    key_positions: Arc<[usize]>,
    kind: ScanKind,
    direction: ScanDirection,
    keys: Vec<ScanKey>,
    /// Number of entries already visited in traversal order.
    position: usize,
    reached_end: bool,
    closed: bool,
    buffer: Vec<ScalarValue>,
    counters: Arc<CursorCounters>,
}

impl MemoryCursor {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(DataFusionError::Execution(
                "MemoryIndex cursor used after close".to_string(),
            ));
        }
        Ok(())
    }

    fn entry_matches(&self, entry: &[ScalarValue]) -> bool {
        self.keys
            .iter()
            .all(|key| key.matches(&entry[self.key_positions[key.column]]))
    }
}

impl OrderedCursor for MemoryCursor {
    fn rescan(&mut self, keys: &[ScanKey]) -> Result<()> {
        self.check_open()?;
        if keys.len() != self.keys.len() {
            return Err(DataFusionError::Internal(format!(
                "cursor opened with {} scan keys was rescanned with {}",
                self.keys.len(),
                keys.len()
            )));
        }
        self.keys.clear();
        self.keys.extend_from_slice(keys);
        self.position = 0;
        self.counters.rescans.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<&[ScalarValue]>> {
        self.check_open()?;
        if self.reached_end {
            return Ok(None);
        }

        let len = self.entries.len();
        while self.position < len {
            let ordinal = match self.direction {
                ScanDirection::Forward => self.position,
                ScanDirection::Backward => len - 1 - self.position,
            };
            self.position += 1;

            let entries = Arc::clone(&self.entries);
            let entry = &entries[ordinal];
            if !self.entry_matches(entry) {
                continue;
            }

            self.buffer.clear();
            match self.kind {
                ScanKind::IndexScan => self.buffer.extend_from_slice(entry),
                ScanKind::IndexOnlyScan => self.buffer.extend(
                    self.key_positions
                        .iter()
                        .map(|&position| entry[position].clone()),
                ),
            }
            return Ok(Some(self.buffer.as_slice()));
        }

        self.reached_end = true;
        Ok(None)
    }

    fn clear_reached_end(&mut self) {
        self.reached_end = false;
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.buffer.clear();
        Ok(())
    }
}
