//! Planner-time skip-scan eligibility and predicate synthesis.
//!
//! [`SkipScanPlanBuilder`] inspects an ordered index scan feeding a
//! `DISTINCT` on one column and either produces a [`SkipScanPlan`] or
//! explains why the scan has to stay as it is.

use std::fmt;

use arrow::datatypes::SchemaRef;
use datafusion::common::Statistics;
use datafusion::error::{DataFusionError, Result};
use datafusion::physical_expr::expressions::Column;
use datafusion::physical_expr::PhysicalSortExpr;
use datafusion_common::ScalarValue;

use crate::physical_plan::exec::index::IndexScanConfig;
use crate::types::{ScanKey, SkipKey};

/// Cost assumed for a full index scan when the index does not know its row count.
pub const DEFAULT_SCAN_COST: f64 = 1000.0;

/// Why a scan cannot be turned into a skip scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    /// Only a single distinct column can be skipped over.
    MultipleDistinctColumns,
    /// The distinct column is not the leading key column of the index.
    NotLeadingColumn,
    /// The index does not return the leading column in sorted order.
    UnorderedIndex,
    /// The column type has no strict ordering operator.
    NoComparator,
    /// The index is unique on exactly the distinct column, every entry is
    /// already distinct.
    UniqueIndex,
    /// The scan uses ordering operators instead of the natural index order.
    OrderByOperators,
    /// The scan has keys bound from query parameters at execution.
    RuntimeKeys,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            IneligibleReason::MultipleDistinctColumns => "more than one distinct column",
            IneligibleReason::NotLeadingColumn => {
                "distinct column is not the leading index key column"
            }
            IneligibleReason::UnorderedIndex => "index does not declare a sort order",
            IneligibleReason::NoComparator => "column type has no strict ordering",
            IneligibleReason::UniqueIndex => "index is unique on the distinct column",
            IneligibleReason::OrderByOperators => "scan uses ordering operators",
            IneligibleReason::RuntimeKeys => "scan has runtime keys",
        };
        f.write_str(reason)
    }
}

/// A scan that can be executed as a skip scan.
#[derive(Debug, Clone)]
pub struct SkipScanPlan {
    scan: IndexScanConfig,
    skip_key: SkipKey,
    /// `leading column <comparator> NULL`, the argument is replaced by the
    /// last value seen at runtime.
    skip_predicate: ScanKey,
    original_cost: f64,
    estimated_cost: f64,
    /// Position of the scan among the inputs of an ordered merge.
    segment: Option<usize>,
}

impl SkipScanPlan {
    pub fn scan(&self) -> &IndexScanConfig {
        &self.scan
    }

    pub fn skip_key(&self) -> &SkipKey {
        &self.skip_key
    }

    pub fn skip_predicate(&self) -> &ScanKey {
        &self.skip_predicate
    }

    pub fn original_cost(&self) -> f64 {
        self.original_cost
    }

    pub fn estimated_cost(&self) -> f64 {
        self.estimated_cost
    }

    pub fn segment(&self) -> Option<usize> {
        self.segment
    }

    pub fn with_segment(mut self, segment: usize) -> Self {
        self.segment = Some(segment);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_scan(mut self, scan: IndexScanConfig) -> Self {
        self.scan = scan;
        self
    }

    pub fn schema(&self) -> SchemaRef {
        self.scan.schema()
    }

    pub fn output_ordering(&self) -> Option<PhysicalSortExpr> {
        self.scan.output_ordering()
    }
}

/// Outcome of [`SkipScanPlanBuilder::build`].
#[derive(Debug, Clone)]
pub enum SkipScanVerdict {
    Eligible(SkipScanPlan),
    Ineligible(IneligibleReason),
}

impl SkipScanVerdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, SkipScanVerdict::Eligible(_))
    }
}

/// Decides whether an index scan can be replaced by a skip scan.
#[derive(Debug, Clone)]
pub struct SkipScanPlanBuilder {
    default_scan_cost: f64,
}

impl Default for SkipScanPlanBuilder {
    fn default() -> Self {
        Self {
            default_scan_cost: DEFAULT_SCAN_COST,
        }
    }
}

impl SkipScanPlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the cost used when the index has no row count.
    pub fn with_default_scan_cost(mut self, cost: f64) -> Self {
        self.default_scan_cost = cost;
        self
    }

    /// Checks `scan` against the skip-scan requirements for a `DISTINCT` on
    /// `distinct` (columns of the scan output).
    ///
    /// Ineligibility is not an error. Errors are reserved for inputs that do
    /// not describe a valid scan, such as a column outside the scan schema.
    pub fn build(&self, scan: &IndexScanConfig, distinct: &[Column]) -> Result<SkipScanVerdict> {
        let verdict = self.check(scan, distinct)?;
        match &verdict {
            SkipScanVerdict::Eligible(plan) => log::debug!(
                "Skip scan eligible on index {} column {}: cost {:.2} -> {:.2}",
                scan.index.name(),
                plan.skip_key.column(),
                plan.original_cost,
                plan.estimated_cost
            ),
            SkipScanVerdict::Ineligible(reason) => log::debug!(
                "Skip scan not applicable to index {}: {reason}",
                scan.index.name()
            ),
        }
        Ok(verdict)
    }

    fn check(&self, scan: &IndexScanConfig, distinct: &[Column]) -> Result<SkipScanVerdict> {
        use IneligibleReason::*;

        let [column] = distinct else {
            return Ok(SkipScanVerdict::Ineligible(MultipleDistinctColumns));
        };

        let schema = scan.schema();
        if column.index() >= schema.fields().len() {
            return Err(DataFusionError::Internal(format!(
                "distinct column {column} is outside the schema of index {}",
                scan.index.name()
            )));
        }

        let key_columns = scan.index.key_columns();
        let Some(leading) = key_columns.first() else {
            return Ok(SkipScanVerdict::Ineligible(NotLeadingColumn));
        };
        if leading.name != column.name() || schema.index_of(&leading.name).ok() != Some(column.index())
        {
            return Ok(SkipScanVerdict::Ineligible(NotLeadingColumn));
        }

        let Some(declared) = leading.sort_options else {
            return Ok(SkipScanVerdict::Ineligible(UnorderedIndex));
        };
        let Some(skip_key) = SkipKey::try_new(
            column.clone(),
            &leading.data_type,
            declared,
            scan.direction,
        ) else {
            return Ok(SkipScanVerdict::Ineligible(NoComparator));
        };

        if scan.index.is_unique() && key_columns.len() == 1 {
            return Ok(SkipScanVerdict::Ineligible(UniqueIndex));
        }
        if !scan.order_by.is_empty() {
            return Ok(SkipScanVerdict::Ineligible(OrderByOperators));
        }
        if !scan.runtime_keys.is_empty() {
            return Ok(SkipScanVerdict::Ineligible(RuntimeKeys));
        }

        let skip_predicate = ScanKey::compare(
            0,
            skip_key.comparator(),
            ScalarValue::try_from(&leading.data_type)?,
        );
        let original_cost = scan_cost(&scan.index.statistics(), self.default_scan_cost);

        Ok(SkipScanVerdict::Eligible(SkipScanPlan {
            scan: scan.clone(),
            skip_key,
            skip_predicate,
            original_cost,
            estimated_cost: skip_scan_cost(original_cost),
            segment: None,
        }))
    }
}

/// Cost of a full scan of an index with the given statistics.
pub fn scan_cost(statistics: &Statistics, default_cost: f64) -> f64 {
    statistics
        .num_rows
        .get_value()
        .map(|rows| *rows as f64)
        .unwrap_or(default_cost)
}

/// Cost of skipping through an index whose full scan costs `original`.
///
/// Grows logarithmically, and is below `original` for any positive cost.
pub fn skip_scan_cost(original: f64) -> f64 {
    original.max(0.0).ln_1p()
}
