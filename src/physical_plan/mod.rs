pub mod exec;
pub mod memory;
pub mod planner;
pub mod skip_scan;

use arrow::compute::SortOptions;
use arrow::datatypes::{DataType, SchemaRef};
use datafusion::common::{Result, Statistics};
use datafusion::logical_expr::Expr;
use datafusion_common::ScalarValue;
use std::any::Any;
use std::fmt;

use datafusion::physical_expr::{EquivalenceProperties, LexOrdering, PhysicalSortExpr};
use datafusion::physical_plan::execution_plan::{Boundedness, EmissionType};
use datafusion::physical_plan::expressions::Column as PhysicalColumn;
use datafusion::physical_plan::{Partitioning, PlanProperties};
use std::sync::Arc;

use crate::types::{ScanDirection, ScanKey, ScanKind};

pub use planner::{IneligibleReason, SkipScanPlan, SkipScanPlanBuilder, SkipScanVerdict};
pub use skip_scan::{SkipScanIterator, SkipStage};

/// One key column of an ordered index, in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexKeyColumn {
    /// Name of the table column the key is built on.
    pub name: String,
    pub data_type: DataType,
    /// Declared order of the key, `None` if the index cannot return this
    /// column in sorted order (for example a hash index).
    pub sort_options: Option<SortOptions>,
}

impl IndexKeyColumn {
    pub fn new(name: impl Into<String>, data_type: DataType, sort_options: SortOptions) -> Self {
        Self {
            name: name.into(),
            data_type,
            sort_options: Some(sort_options),
        }
    }

    pub fn unordered(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            sort_options: None,
        }
    }
}

/// Represents an ordered (B-tree like) index that can be traversed with cursors.
///
/// The index owns scan key evaluation, NULL placement and row visibility.
/// Callers only see rows that satisfy every key they passed in, in key order
/// (reversed for [`ScanDirection::Backward`]).
pub trait OrderedIndex: fmt::Debug + Send + Sync + 'static {
    /// Returns the index as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// The name of this index.
    fn name(&self) -> &str;

    /// The name of the table this index belongs to.
    fn table_name(&self) -> &str;

    /// The key columns of the index, leading column first.
    fn key_columns(&self) -> &[IndexKeyColumn];

    /// Whether the index enforces uniqueness of its full key.
    fn is_unique(&self) -> bool;

    /// The schema of rows returned by a cursor of the given kind.
    ///
    /// For [`ScanKind::IndexOnlyScan`] this contains only the key columns.
    fn schema(&self, kind: ScanKind) -> SchemaRef;

    /// Opens a cursor positioned before the first row matching `keys`.
    ///
    /// `order_by` carries ordering operators the index should apply instead
    /// of its natural order. Indexes that do not support them return an error.
    fn open(
        &self,
        kind: ScanKind,
        direction: ScanDirection,
        keys: &[ScanKey],
        order_by: &[Expr],
    ) -> Result<Box<dyn OrderedCursor>>;

    /// Provides statistics for the index.
    fn statistics(&self) -> Statistics;
}

/// A positioned scan over an [`OrderedIndex`].
pub trait OrderedCursor: Send {
    /// Restarts the scan from the beginning with a new set of keys.
    ///
    /// The number of keys must match the count the cursor was opened with.
    /// A persisted end-of-scan marker is not cleared by a rescan; see
    /// [`OrderedCursor::clear_reached_end`].
    fn rescan(&mut self, keys: &[ScanKey]) -> Result<()>;

    /// Fetches the next matching row.
    ///
    /// The returned slice borrows the cursor's row buffer and is invalidated
    /// by the next call to `next` or `rescan`; callers that keep a row must
    /// copy it.
    fn next(&mut self) -> Result<Option<&[ScalarValue]>>;

    /// Clears a persisted end-of-scan marker so the following fetch starts a
    /// fresh pass. Cursors without such a marker ignore this.
    fn clear_reached_end(&mut self) {}

    /// Releases the cursor. Any further call other than `close` is an error.
    fn close(&mut self) -> Result<()>;
}

/// Returns the sort expression describing how a scan of `index` orders its
/// leading key column in `schema`, if the index declares an order for it.
pub fn leading_key_ordering(
    index: &dyn OrderedIndex,
    direction: ScanDirection,
    schema: &SchemaRef,
) -> Option<PhysicalSortExpr> {
    let leading = index.key_columns().first()?;
    let declared = leading.sort_options?;
    let position = schema.index_of(&leading.name).ok()?;
    Some(PhysicalSortExpr::new(
        Arc::new(PhysicalColumn::new(&leading.name, position)),
        direction.effective_sort_options(declared),
    ))
}

/// Creates a `PlanProperties` for a single-partition scan that is potentially
/// ordered by the index's leading key column.
pub fn create_plan_properties_for_index_scan(
    schema: SchemaRef,
    ordering: Option<PhysicalSortExpr>,
) -> PlanProperties {
    let mut eq_properties = EquivalenceProperties::new(schema);
    if let Some(sort_expr) = ordering {
        eq_properties.add_new_ordering(LexOrdering::new(vec![sort_expr]));
    }
    PlanProperties::new(
        eq_properties,
        Partitioning::UnknownPartitioning(1),
        EmissionType::Incremental,
        Boundedness::Bounded,
    )
}
