use std::any::Any;
use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, SchemaRef};
use datafusion::common::ParamValues;
use datafusion::error::{DataFusionError, Result};
use datafusion::execution::{SendableRecordBatchStream, TaskContext};
use datafusion::logical_expr::Operator;
use datafusion::physical_expr::PhysicalSortExpr;
use datafusion::physical_plan::metrics::{BaselineMetrics, ExecutionPlanMetricsSet, MetricsSet};
use datafusion::physical_plan::{DisplayAs, DisplayFormatType, ExecutionPlan, PlanProperties};
use datafusion::prelude::Expr;
use datafusion_common::ScalarValue;

use super::{RowBatchStream, RowSource};
use crate::optimizer::{expr_to_scan_keys, KeyCondition};
use crate::physical_plan::{
    create_plan_properties_for_index_scan, leading_key_ordering, OrderedCursor, OrderedIndex,
};
use crate::types::{ScanDirection, ScanKey, ScanKind};

/// A comparison key whose argument is a query parameter, bound when the scan
/// is executed.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeKey {
    /// Position of the key column within the index key.
    pub column: usize,
    pub op: Operator,
    /// Placeholder id, for example `$1`.
    pub placeholder: String,
}

impl RuntimeKey {
    pub fn new(column: usize, op: Operator, placeholder: impl Into<String>) -> Self {
        Self {
            column,
            op,
            placeholder: placeholder.into(),
        }
    }

    /// Resolves the placeholder against `params`, casting the value to the
    /// key column's type.
    pub fn bind(&self, params: &ParamValues, data_type: &DataType) -> Result<ScanKey> {
        let value = params
            .get_placeholders_with_values(&self.placeholder)
            .map_err(|e| {
                DataFusionError::Plan(format!("cannot bind runtime key {self}: {e}"))
            })?;
        Ok(ScanKey::compare(self.column, self.op, value.cast_to(data_type)?))
    }
}

impl fmt::Display for RuntimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.column, self.op, self.placeholder)
    }
}

/// Everything needed to open a cursor on an ordered index.
#[derive(Debug, Clone)]
pub struct IndexScanConfig {
    pub index: Arc<dyn OrderedIndex>,
    pub kind: ScanKind,
    pub direction: ScanDirection,
    /// Keys known at planning time.
    pub keys: Vec<ScanKey>,
    /// Keys whose arguments are bound at execution.
    pub runtime_keys: Vec<RuntimeKey>,
    /// Ordering operators replacing the natural index order.
    pub order_by: Vec<Expr>,
}

impl IndexScanConfig {
    pub fn new(index: Arc<dyn OrderedIndex>) -> Self {
        Self {
            index,
            kind: ScanKind::default(),
            direction: ScanDirection::default(),
            keys: vec![],
            runtime_keys: vec![],
            order_by: vec![],
        }
    }

    pub fn with_kind(mut self, kind: ScanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_direction(mut self, direction: ScanDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_keys(mut self, keys: Vec<ScanKey>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_runtime_keys(mut self, runtime_keys: Vec<RuntimeKey>) -> Self {
        self.runtime_keys = runtime_keys;
        self
    }

    pub fn with_order_by(mut self, order_by: Vec<Expr>) -> Self {
        self.order_by = order_by;
        self
    }

    /// Converts `filters` on the index's key columns into scan keys.
    ///
    /// Filters that reference placeholders become runtime keys. A filter the
    /// index cannot evaluate is a planning error.
    pub fn with_filters(mut self, filters: &[Expr]) -> Result<Self> {
        for filter in filters {
            for condition in expr_to_scan_keys(filter, self.index.key_columns())? {
                match condition {
                    KeyCondition::Static(key) => self.keys.push(key),
                    KeyCondition::Runtime(key) => self.runtime_keys.push(key),
                }
            }
        }
        Ok(self)
    }

    /// Schema of the rows returned by the scan.
    pub fn schema(&self) -> SchemaRef {
        self.index.schema(self.kind)
    }

    /// Ordering of the scan output, if the scan follows the index order.
    pub fn output_ordering(&self) -> Option<PhysicalSortExpr> {
        if !self.order_by.is_empty() {
            return None;
        }
        leading_key_ordering(self.index.as_ref(), self.direction, &self.schema())
    }

    /// Returns the full key set, binding runtime keys against `params`.
    pub fn bind_keys(&self, params: Option<&ParamValues>) -> Result<Vec<ScanKey>> {
        let mut keys = self.keys.clone();
        if self.runtime_keys.is_empty() {
            return Ok(keys);
        }

        let params = params.ok_or_else(|| {
            DataFusionError::Plan(format!(
                "scan on index {} has runtime keys but no parameter values",
                self.index.name()
            ))
        })?;
        let key_columns = self.index.key_columns();
        for runtime_key in &self.runtime_keys {
            let column = key_columns.get(runtime_key.column).ok_or_else(|| {
                DataFusionError::Plan(format!(
                    "runtime key {runtime_key} does not refer to a key column of index {}",
                    self.index.name()
                ))
            })?;
            keys.push(runtime_key.bind(params, &column.data_type)?);
        }
        Ok(keys)
    }

    fn fmt_keys(&self) -> String {
        self.keys
            .iter()
            .map(ToString::to_string)
            .chain(self.runtime_keys.iter().map(ToString::to_string))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Ordinary scan of an [`OrderedIndex`] returning every matching row in
/// index order.
#[derive(Debug)]
pub struct IndexScanExec {
    config: IndexScanConfig,
    /// Values for the placeholders referenced by runtime keys.
    params: Option<ParamValues>,
    /// Properties of the plan.
    plan_properties: PlanProperties,
    metrics: ExecutionPlanMetricsSet,
}

impl IndexScanExec {
    pub fn try_new(config: IndexScanConfig) -> Result<Self> {
        if let Some(key) = config
            .keys
            .iter()
            .find(|key| key.column >= config.index.key_columns().len())
        {
            return Err(DataFusionError::Plan(format!(
                "scan key {key} does not refer to a key column of index {}",
                config.index.name()
            )));
        }
        let plan_properties =
            create_plan_properties_for_index_scan(config.schema(), config.output_ordering());
        Ok(Self {
            config,
            params: None,
            plan_properties,
            metrics: ExecutionPlanMetricsSet::new(),
        })
    }

    pub fn config(&self) -> &IndexScanConfig {
        &self.config
    }

    /// Supplies the values bound to runtime keys at execution.
    pub fn with_param_values(mut self, params: ParamValues) -> Self {
        self.params = Some(params);
        self
    }
}

impl DisplayAs for IndexScanExec {
    fn fmt_as(&self, t: DisplayFormatType, f: &mut fmt::Formatter) -> fmt::Result {
        match t {
            DisplayFormatType::Default => write!(
                f,
                "IndexScanExec: index={}, kind={}, direction={}, keys=[{}]",
                self.config.index.name(),
                self.config.kind,
                self.config.direction,
                self.config.fmt_keys()
            ),
            DisplayFormatType::Verbose => write!(
                f,
                "IndexScanExec: index={}, table={}, kind={}, direction={}, keys=[{}], order_by={:?}",
                self.config.index.name(),
                self.config.index.table_name(),
                self.config.kind,
                self.config.direction,
                self.config.fmt_keys(),
                self.config.order_by
            ),
            DisplayFormatType::TreeRender => write!(f, "index={}", self.config.index.name()),
        }
    }
}

impl ExecutionPlan for IndexScanExec {
    fn name(&self) -> &str {
        "IndexScanExec"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn properties(&self) -> &PlanProperties {
        &self.plan_properties
    }

    // Return an empty list since this plan does not have any children.
    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![]
    }

    fn with_new_children(
        self: Arc<Self>,
        children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        if !children.is_empty() {
            return Err(DataFusionError::Internal(
                "IndexScanExec does not accept children".to_string(),
            ));
        }
        Ok(self)
    }

    fn execute(
        &self,
        partition: usize,
        context: Arc<TaskContext>,
    ) -> Result<SendableRecordBatchStream> {
        if partition != 0 {
            return Err(DataFusionError::Internal(
                "IndexScanExec only supports a single partition".to_string(),
            ));
        }

        let keys = self.config.bind_keys(self.params.as_ref())?;
        let cursor = self.config.index.open(
            self.config.kind,
            self.config.direction,
            &keys,
            &self.config.order_by,
        )?;
        let baseline_metrics = BaselineMetrics::new(&self.metrics, partition);

        Ok(Box::pin(RowBatchStream::new(
            CursorRows {
                cursor,
                done: false,
            },
            self.schema(),
            context.session_config().batch_size(),
            baseline_metrics,
        )))
    }

    fn metrics(&self) -> Option<MetricsSet> {
        Some(self.metrics.clone_inner())
    }
}

/// Drains a cursor row by row, closing it once exhausted or failed.
struct CursorRows {
    cursor: Box<dyn OrderedCursor>,
    done: bool,
}

impl RowSource for CursorRows {
    fn next_row(&mut self) -> Result<Option<Vec<ScalarValue>>> {
        if self.done {
            return Ok(None);
        }
        match self.cursor.next() {
            Ok(Some(row)) => Ok(Some(row.to_vec())),
            Ok(None) => {
                self.done = true;
                self.cursor.close()?;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                if let Err(close_err) = self.cursor.close() {
                    log::warn!("Failed to close index cursor after error: {close_err}");
                }
                Err(e)
            }
        }
    }
}
