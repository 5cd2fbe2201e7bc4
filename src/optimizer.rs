//! Query optimization for index operations.
//!
//! This module turns filters into scan keys an [`OrderedIndex`] can evaluate,
//! and provides [`SkipScanRule`], the physical optimizer rule replacing
//! `DISTINCT` over an ordered index scan with a skip scan.
//!
//! [`OrderedIndex`]: crate::physical_plan::OrderedIndex

use std::sync::Arc;

use datafusion::common::tree_node::{Transformed, TreeNode};
use datafusion::config::ConfigOptions;
use datafusion::error::{DataFusionError, Result};
use datafusion::logical_expr::expr::Placeholder;
use datafusion::logical_expr::utils::split_conjunction;
use datafusion::logical_expr::{Between, BinaryExpr, Operator};
use datafusion::physical_expr::expressions::Column;
use datafusion::physical_optimizer::PhysicalOptimizerRule;
use datafusion::physical_plan::aggregates::AggregateExec;
use datafusion::physical_plan::coalesce_batches::CoalesceBatchesExec;
use datafusion::physical_plan::repartition::RepartitionExec;
use datafusion::physical_plan::sorts::sort_preserving_merge::SortPreservingMergeExec;
use datafusion::physical_plan::union::UnionExec;
use datafusion::physical_plan::{ExecutionPlan, Partitioning};
use datafusion::prelude::Expr;

use crate::config::SkipScanOptions;
use crate::physical_plan::exec::index::{IndexScanExec, RuntimeKey};
use crate::physical_plan::exec::skip_scan::SkipScanExec;
use crate::physical_plan::{IndexKeyColumn, SkipScanPlanBuilder, SkipScanVerdict};
use crate::types::ScanKey;

/// A condition on an index key column produced from a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyCondition {
    /// Fully known at planning time.
    Static(ScanKey),
    /// Compares against a query parameter.
    Runtime(RuntimeKey),
}

/// Converts `expr` into conditions on the index key columns `key_columns`.
///
/// `expr` may be a conjunction of:
/// * `column <op> literal` and `literal <op> column` for `=`, `<`, `<=`, `>`, `>=`
/// * the same with a placeholder instead of the literal, producing a runtime key
/// * `column IS NULL` and `column IS NOT NULL`
/// * `column BETWEEN low AND high`
///
/// Anything else is a planning error, as the index could not evaluate it.
///
/// # Example
/// ```ignore
/// let keys = expr_to_scan_keys(&col("age").between(lit(20), lit(30)), index.key_columns())?;
/// // [#0 >= 20, #0 <= 30]
/// ```
pub fn expr_to_scan_keys(expr: &Expr, key_columns: &[IndexKeyColumn]) -> Result<Vec<KeyCondition>> {
    let mut conditions = Vec::new();
    for conjunct in split_conjunction(expr) {
        conjunct_to_scan_keys(conjunct, key_columns, &mut conditions)?;
    }
    log::debug!("Converted filter {expr} into scan keys {conditions:?}");
    Ok(conditions)
}

fn conjunct_to_scan_keys(
    expr: &Expr,
    key_columns: &[IndexKeyColumn],
    conditions: &mut Vec<KeyCondition>,
) -> Result<()> {
    match expr {
        Expr::BinaryExpr(BinaryExpr { left, op, right }) => {
            let (column, op, operand) = match (left.as_ref(), right.as_ref()) {
                (Expr::Column(column), operand) => (column, *op, operand),
                (operand, Expr::Column(column)) => match op.swap() {
                    Some(swapped) => (column, swapped, operand),
                    None => return Err(unsupported(expr)),
                },
                _ => return Err(unsupported(expr)),
            };
            if !ScanKey::supports_operator(op) {
                return Err(unsupported(expr));
            }
            let position = key_position(column, key_columns)?;
            conditions.push(operand_condition(expr, position, op, operand, key_columns)?);
        }
        Expr::IsNull(inner) => match inner.as_ref() {
            Expr::Column(column) => {
                conditions.push(KeyCondition::Static(ScanKey::is_null(key_position(
                    column,
                    key_columns,
                )?)))
            }
            _ => return Err(unsupported(expr)),
        },
        Expr::IsNotNull(inner) => match inner.as_ref() {
            Expr::Column(column) => {
                conditions.push(KeyCondition::Static(ScanKey::is_not_null(key_position(
                    column,
                    key_columns,
                )?)))
            }
            _ => return Err(unsupported(expr)),
        },
        Expr::Between(Between {
            expr: inner,
            negated: false,
            low,
            high,
        }) => {
            let Expr::Column(column) = inner.as_ref() else {
                return Err(unsupported(expr));
            };
            let position = key_position(column, key_columns)?;
            conditions.push(operand_condition(expr, position, Operator::GtEq, low, key_columns)?);
            conditions.push(operand_condition(expr, position, Operator::LtEq, high, key_columns)?);
        }
        _ => return Err(unsupported(expr)),
    }
    Ok(())
}

fn operand_condition(
    expr: &Expr,
    position: usize,
    op: Operator,
    operand: &Expr,
    key_columns: &[IndexKeyColumn],
) -> Result<KeyCondition> {
    match operand {
        Expr::Literal(value) => {
            let value = value.cast_to(&key_columns[position].data_type)?;
            Ok(KeyCondition::Static(ScanKey::compare(position, op, value)))
        }
        Expr::Placeholder(Placeholder { id, .. }) => {
            Ok(KeyCondition::Runtime(RuntimeKey::new(position, op, id.clone())))
        }
        _ => Err(unsupported(expr)),
    }
}

fn key_position(
    column: &datafusion_common::Column,
    key_columns: &[IndexKeyColumn],
) -> Result<usize> {
    key_columns
        .iter()
        .position(|key| key.name == column.name)
        .ok_or_else(|| {
            DataFusionError::Plan(format!("column {column} is not a key column of the index"))
        })
}

fn unsupported(expr: &Expr) -> DataFusionError {
    DataFusionError::Plan(format!("filter {expr} cannot be evaluated by an ordered index"))
}

/// Physical optimizer rule replacing `DISTINCT` on the leading column of an
/// ordered index scan with a [`SkipScanExec`].
///
/// Candidates are `AggregateExec`s without aggregate functions, grouping on
/// plain columns, whose input is either
/// * an [`IndexScanExec`], or
/// * a `SortPreservingMergeExec` over a `UnionExec` of segment scans, in
///   which case every segment is considered on its own,
///
/// possibly beneath round-robin `RepartitionExec`s and `CoalesceBatchesExec`s,
/// as in the partial aggregate of a multi-partition plan.
///
/// The aggregate stays in place, so the output is unchanged. The rule can be
/// switched off with `skip_scan.enable` (see [`SkipScanOptions`]).
#[derive(Debug, Default)]
pub struct SkipScanRule {
    builder: SkipScanPlanBuilder,
}

impl SkipScanRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builder(builder: SkipScanPlanBuilder) -> Self {
        Self { builder }
    }

    fn rewrite_candidate(
        &self,
        node: Arc<dyn ExecutionPlan>,
    ) -> Result<Transformed<Arc<dyn ExecutionPlan>>> {
        let Some(aggregate) = node.as_any().downcast_ref::<AggregateExec>() else {
            return Ok(Transformed::no(node));
        };
        if !aggregate.aggr_expr().is_empty() {
            return Ok(Transformed::no(node));
        }
        let Some(distinct) = distinct_columns(aggregate) else {
            return Ok(Transformed::no(node));
        };

        match self.rewrite_input(aggregate.input(), &distinct)? {
            Some(new_input) => Ok(Transformed::yes(
                Arc::clone(&node).with_new_children(vec![new_input])?,
            )),
            None => Ok(Transformed::no(node)),
        }
    }

    /// Rewrites the scans feeding a deduplicating aggregate. Returns `None`
    /// when nothing changed.
    ///
    /// Round-robin repartitioning and batch coalescing only redistribute
    /// rows, so the scan below them is rewritten in place.
    fn rewrite_input(
        &self,
        input: &Arc<dyn ExecutionPlan>,
        distinct: &[Column],
    ) -> Result<Option<Arc<dyn ExecutionPlan>>> {
        let any = input.as_any();
        if let Some(scan) = any.downcast_ref::<IndexScanExec>() {
            return self.try_skip_scan(scan, distinct, None);
        }
        let child = if let Some(merge) = any.downcast_ref::<SortPreservingMergeExec>() {
            self.rewrite_segments(merge.input(), distinct)?
        } else if let Some(repartition) = any.downcast_ref::<RepartitionExec>() {
            if !matches!(
                repartition.partitioning(),
                Partitioning::RoundRobinBatch(_)
            ) {
                return Ok(None);
            }
            self.rewrite_input(repartition.input(), distinct)?
        } else if let Some(coalesce) = any.downcast_ref::<CoalesceBatchesExec>() {
            self.rewrite_input(coalesce.input(), distinct)?
        } else {
            None
        };
        child
            .map(|child| Arc::clone(input).with_new_children(vec![child]))
            .transpose()
    }

    /// Rewrites the eligible segments below an ordered merge. Returns `None`
    /// when no segment changed.
    fn rewrite_segments(
        &self,
        input: &Arc<dyn ExecutionPlan>,
        distinct: &[Column],
    ) -> Result<Option<Arc<dyn ExecutionPlan>>> {
        let Some(union) = input.as_any().downcast_ref::<UnionExec>() else {
            return Ok(None);
        };

        let mut changed = false;
        let mut segments = Vec::with_capacity(union.inputs().len());
        for (segment, child) in union.inputs().iter().enumerate() {
            let rewritten = match child.as_any().downcast_ref::<IndexScanExec>() {
                Some(scan) => self.try_skip_scan(scan, distinct, Some(segment))?,
                None => None,
            };
            match rewritten {
                Some(rewritten) => {
                    changed = true;
                    segments.push(rewritten);
                }
                None => segments.push(Arc::clone(child)),
            }
        }

        if !changed {
            return Ok(None);
        }
        Ok(Some(Arc::clone(input).with_new_children(segments)?))
    }

    fn try_skip_scan(
        &self,
        scan: &IndexScanExec,
        distinct: &[Column],
        segment: Option<usize>,
    ) -> Result<Option<Arc<dyn ExecutionPlan>>> {
        let SkipScanVerdict::Eligible(plan) = self.builder.build(scan.config(), distinct)? else {
            return Ok(None);
        };
        if plan.estimated_cost() >= plan.original_cost() {
            log::debug!(
                "Keeping index scan on {}: skip scan cost {:.2} is not below {:.2}",
                scan.config().index.name(),
                plan.estimated_cost(),
                plan.original_cost()
            );
            return Ok(None);
        }

        let plan = match segment {
            Some(segment) => plan.with_segment(segment),
            None => plan,
        };
        log::debug!(
            "Replacing index scan on {} with skip scan (segment {:?})",
            scan.config().index.name(),
            segment
        );
        Ok(Some(Arc::new(SkipScanExec::new(plan))))
    }
}

/// The grouping columns of `aggregate`, if it groups on plain columns only.
fn distinct_columns(aggregate: &AggregateExec) -> Option<Vec<Column>> {
    let group_by = aggregate.group_expr();
    if !group_by.is_single() {
        return None;
    }
    group_by
        .expr()
        .iter()
        .map(|(expr, _)| expr.as_any().downcast_ref::<Column>().cloned())
        .collect()
}

impl PhysicalOptimizerRule for SkipScanRule {
    fn optimize(
        &self,
        plan: Arc<dyn ExecutionPlan>,
        config: &ConfigOptions,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        if !SkipScanOptions::enabled(config) {
            log::debug!("Skip scan disabled, leaving plan unchanged");
            return Ok(plan);
        }
        plan.transform_down(|node| self.rewrite_candidate(node))
            .map(|transformed| transformed.data)
    }

    fn name(&self) -> &str {
        "skip_scan"
    }

    fn schema_check(&self) -> bool {
        true
    }
}
