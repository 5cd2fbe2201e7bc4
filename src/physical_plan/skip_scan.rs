//! Runtime side of the skip scan.
//!
//! A [`SkipScanIterator`] returns one row per distinct value of the leading
//! index key column. After each row it rescans the index with
//! `column <comparator> last value`, so every duplicate is skipped inside the
//! index instead of being read and discarded. The comparator never matches a
//! NULL entry, so NULLs are found by a single end-of-scan probe.

use std::sync::Arc;

use datafusion::error::{DataFusionError, Result};
use datafusion::execution::memory_pool::MemoryReservation;
use datafusion::physical_plan::metrics::Count;
use datafusion_common::ScalarValue;

use super::planner::SkipScanPlan;
use super::OrderedCursor;
use crate::physical_plan::exec::RowSource;
use crate::types::{ScanKey, ScanKeyOp};

/// What the scan has found so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipStage {
    /// No row returned yet.
    SearchingFirst,
    /// At least one non-NULL value, no NULL.
    FoundValue,
    /// A NULL, no non-NULL value.
    FoundNull,
    /// Both a NULL and a non-NULL value.
    FoundBoth,
}

impl SkipStage {
    fn record(self, is_null: bool) -> Self {
        match (self, is_null) {
            (SkipStage::SearchingFirst, true) => SkipStage::FoundNull,
            (SkipStage::SearchingFirst, false) => SkipStage::FoundValue,
            (SkipStage::FoundValue, true) | (SkipStage::FoundNull, false) => SkipStage::FoundBoth,
            (stage, _) => stage,
        }
    }

    fn found_null(self) -> bool {
        matches!(self, SkipStage::FoundNull | SkipStage::FoundBoth)
    }

    fn found_value(self) -> bool {
        matches!(self, SkipStage::FoundValue | SkipStage::FoundBoth)
    }
}

/// End-of-scan probe for the class of entries the comparator cannot reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NullProbe {
    Null,
    NonNull,
}

/// The skip predicate, left out of the key set until the first row is found.
#[derive(Debug, Clone)]
enum PredicateSlot {
    Withheld(ScanKey),
    Active(ScanKey),
}

impl PredicateSlot {
    fn key_mut(&mut self) -> &mut ScanKey {
        match self {
            PredicateSlot::Withheld(key) | PredicateSlot::Active(key) => key,
        }
    }
}

/// Cursor activity counters, reported as metrics by `SkipScanExec`.
#[derive(Debug, Clone)]
pub struct SkipScanCounters {
    pub cursor_opens: Count,
    pub rescans: Count,
    /// End-of-scan probes issued, for either NULL or non-NULL entries.
    pub null_probes: Count,
}

impl Default for SkipScanCounters {
    fn default() -> Self {
        Self {
            cursor_opens: Count::new(),
            rescans: Count::new(),
            null_probes: Count::new(),
        }
    }
}

struct SkipScanState {
    stage: SkipStage,
    /// Probe installed in place of the skip predicate, if any.
    probe: Option<NullProbe>,
    last_seen: Option<ScalarValue>,
    last_seen_is_null: bool,
    predicate: PredicateSlot,
    /// Base keys, followed by the skip predicate or probe once active.
    keys: Vec<ScanKey>,
    cursor: Option<Box<dyn OrderedCursor>>,
    finished: bool,
}

/// Produces one row per distinct value of the leading key column of an
/// ordered index.
///
/// Rows come out in index order. The iterator owns at most one open cursor,
/// which is closed on exhaustion, error, [`reset`](Self::reset),
/// [`close`](Self::close) and drop.
pub struct SkipScanIterator {
    plan: Arc<SkipScanPlan>,
    state: SkipScanState,
    reservation: MemoryReservation,
    counters: SkipScanCounters,
}

impl SkipScanIterator {
    /// Creates an iterator for `plan`. Copies of the last seen value are
    /// charged to `reservation` when the column is not copied by value.
    pub fn try_new(plan: Arc<SkipScanPlan>, reservation: MemoryReservation) -> Result<Self> {
        if !plan.scan().order_by.is_empty() {
            return Err(DataFusionError::Internal(format!(
                "skip scan on index {} cannot use ordering operators",
                plan.scan().index.name()
            )));
        }
        if !plan.scan().runtime_keys.is_empty() {
            return Err(DataFusionError::Internal(format!(
                "skip scan on index {} cannot use runtime keys",
                plan.scan().index.name()
            )));
        }
        let state = SkipScanState {
            stage: SkipStage::SearchingFirst,
            probe: None,
            last_seen: None,
            last_seen_is_null: false,
            predicate: PredicateSlot::Withheld(plan.skip_predicate().clone()),
            keys: plan.scan().keys.clone(),
            cursor: None,
            finished: false,
        };
        Ok(Self {
            plan,
            state,
            reservation,
            counters: SkipScanCounters::default(),
        })
    }

    pub fn with_counters(mut self, counters: SkipScanCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn stage(&self) -> SkipStage {
        self.state.stage
    }

    /// The last value returned for the distinct column, if any.
    pub fn last_seen(&self) -> Option<&ScalarValue> {
        self.state.last_seen.as_ref()
    }

    /// Returns the next distinct row, or `None` once every distinct value
    /// has been produced.
    ///
    /// After an error the cursor is closed and the iterator stays finished
    /// until [`reset`](Self::reset).
    pub fn next(&mut self) -> Result<Option<Vec<ScalarValue>>> {
        if self.state.finished {
            return Ok(None);
        }
        match self.advance() {
            Ok(row) => Ok(row),
            Err(e) => {
                self.finish();
                Err(e)
            }
        }
    }

    /// Restarts the scan from the beginning.
    pub fn reset(&mut self) -> Result<()> {
        let closed = self.close_cursor();
        let state = &mut self.state;
        state.predicate = PredicateSlot::Withheld(self.plan.skip_predicate().clone());
        state.keys.truncate(self.plan.scan().keys.len());
        state.stage = SkipStage::SearchingFirst;
        state.probe = None;
        state.last_seen = None;
        state.last_seen_is_null = false;
        state.finished = false;
        self.reservation.free();
        closed
    }

    /// Closes the cursor and ends the sequence.
    pub fn close(&mut self) -> Result<()> {
        self.state.finished = true;
        self.reservation.free();
        self.close_cursor()
    }

    fn advance(&mut self) -> Result<Option<Vec<ScalarValue>>> {
        if self.state.stage == SkipStage::SearchingFirst {
            return self.search_first();
        }

        // `column <cmp> NULL` matches nothing, go straight to the probe
        let mut fetched = if self.state.last_seen_is_null {
            None
        } else {
            self.install_skip_predicate();
            self.rescan()?;
            self.fetch()?
        };
        loop {
            if let Some(row) = fetched {
                self.state.probe = None;
                self.capture(&row)?;
                return Ok(Some(row));
            }

            // a probe that finds nothing, or a scan that already found both
            // classes, ends the sequence
            let probe = match (self.state.probe, self.state.stage) {
                (Some(_), _) => None,
                (None, stage) if !stage.found_null() => Some(NullProbe::Null),
                (None, stage) if !stage.found_value() => Some(NullProbe::NonNull),
                (None, _) => None,
            };
            match probe {
                Some(probe) => {
                    self.install_probe(probe)?;
                    fetched = self.fetch()?;
                }
                None => {
                    self.finish_cleanly()?;
                    return Ok(None);
                }
            }
        }
    }

    fn search_first(&mut self) -> Result<Option<Vec<ScalarValue>>> {
        if self.state.cursor.is_none() {
            self.open_cursor()?;
        }
        let Some(row) = self.fetch()? else {
            self.finish_cleanly()?;
            return Ok(None);
        };
        self.capture(&row)?;

        // the predicate joins the key set, which needs a fresh cursor
        if let PredicateSlot::Withheld(key) = &self.state.predicate {
            let key = key.clone();
            self.state.predicate = PredicateSlot::Active(key.clone());
            self.set_predicate_key(key);
        }
        self.close_cursor()?;
        self.open_cursor()?;

        Ok(Some(row))
    }

    /// Points the skip predicate at the last value seen.
    fn install_skip_predicate(&mut self) {
        let comparator = self.plan.skip_key().comparator();
        let value = self
            .state
            .last_seen
            .clone()
            .unwrap_or_else(|| self.null_value());
        let key = self.state.predicate.key_mut();
        key.op = ScanKeyOp::Compare {
            op: comparator,
            value,
        };
        let key = key.clone();
        self.set_predicate_key(key);
    }

    fn install_probe(&mut self, probe: NullProbe) -> Result<()> {
        let key = match probe {
            NullProbe::Null => ScanKey::is_null(0),
            NullProbe::NonNull => ScanKey::is_not_null(0),
        };
        log::debug!(
            "Skip scan on index {} probing {:?} entries",
            self.plan.scan().index.name(),
            probe
        );
        self.state.probe = Some(probe);
        self.counters.null_probes.add(1);
        self.set_predicate_key(key);
        self.cursor_mut()?.clear_reached_end();
        self.rescan()
    }

    fn set_predicate_key(&mut self, key: ScanKey) {
        let base = self.plan.scan().keys.len();
        self.state.keys.truncate(base);
        self.state.keys.push(key);
    }

    fn capture(&mut self, row: &[ScalarValue]) -> Result<()> {
        let position = self.plan.skip_key().column().index();
        let value = row.get(position).cloned().ok_or_else(|| {
            DataFusionError::Internal(format!(
                "skip scan row has {} values, distinct column is at {position}",
                row.len()
            ))
        })?;
        let is_null = value.is_null();

        if self.plan.skip_key().is_copy_by_value() {
            self.reservation.free();
        } else {
            self.reservation.try_resize(value.size())?;
        }
        self.state.last_seen = Some(value);
        self.state.last_seen_is_null = is_null;
        self.state.stage = self.state.stage.record(is_null);
        Ok(())
    }

    fn null_value(&self) -> ScalarValue {
        match &self.plan.skip_predicate().op {
            ScanKeyOp::Compare { value, .. } => value.clone(),
            _ => ScalarValue::Null,
        }
    }

    fn open_cursor(&mut self) -> Result<()> {
        let scan = self.plan.scan();
        let cursor = scan
            .index
            .open(scan.kind, scan.direction, &self.state.keys, &[])?;
        self.counters.cursor_opens.add(1);
        self.state.cursor = Some(cursor);
        Ok(())
    }

    fn rescan(&mut self) -> Result<()> {
        let Some(cursor) = self.state.cursor.as_mut() else {
            return Err(DataFusionError::Internal(
                "skip scan rescan without an open cursor".to_string(),
            ));
        };
        cursor.rescan(&self.state.keys)?;
        self.counters.rescans.add(1);
        Ok(())
    }

    fn fetch(&mut self) -> Result<Option<Vec<ScalarValue>>> {
        Ok(self.cursor_mut()?.next()?.map(<[ScalarValue]>::to_vec))
    }

    fn cursor_mut(&mut self) -> Result<&mut Box<dyn OrderedCursor>> {
        self.state.cursor.as_mut().ok_or_else(|| {
            DataFusionError::Internal("skip scan cursor is not open".to_string())
        })
    }

    fn close_cursor(&mut self) -> Result<()> {
        match self.state.cursor.take() {
            Some(mut cursor) => cursor.close(),
            None => Ok(()),
        }
    }

    fn finish_cleanly(&mut self) -> Result<()> {
        self.state.finished = true;
        self.close_cursor()
    }

    /// Ends the sequence after an error, keeping the original error.
    fn finish(&mut self) {
        self.state.finished = true;
        if let Err(e) = self.close_cursor() {
            log::warn!(
                "Failed to close cursor on index {}: {e}",
                self.plan.scan().index.name()
            );
        }
    }
}

impl RowSource for SkipScanIterator {
    fn next_row(&mut self) -> Result<Option<Vec<ScalarValue>>> {
        self.next()
    }
}

impl Drop for SkipScanIterator {
    fn drop(&mut self) {
        if let Err(e) = self.close_cursor() {
            log::warn!(
                "Failed to close cursor on index {} during drop: {e}",
                self.plan.scan().index.name()
            );
        }
    }
}

impl std::fmt::Debug for SkipScanIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipScanIterator")
            .field("index", &self.plan.scan().index.name())
            .field("stage", &self.state.stage)
            .field("probe", &self.state.probe)
            .field("last_seen", &self.state.last_seen)
            .field("last_seen_is_null", &self.state.last_seen_is_null)
            .field("cursor_open", &self.state.cursor.is_some())
            .field("finished", &self.state.finished)
            .finish()
    }
}
