use std::any::Any;
use std::fmt;
use std::sync::Arc;

use datafusion::error::{DataFusionError, Result};
use datafusion::execution::memory_pool::MemoryConsumer;
use datafusion::execution::{SendableRecordBatchStream, TaskContext};
use datafusion::physical_plan::metrics::{
    BaselineMetrics, ExecutionPlanMetricsSet, MetricBuilder, MetricsSet,
};
use datafusion::physical_plan::{DisplayAs, DisplayFormatType, ExecutionPlan, PlanProperties};

use super::RowBatchStream;
use crate::physical_plan::create_plan_properties_for_index_scan;
use crate::physical_plan::planner::SkipScanPlan;
use crate::physical_plan::skip_scan::{SkipScanCounters, SkipScanIterator};

/// Execution plan returning one row per distinct value of the leading key
/// column of an ordered index, by skipping over duplicates inside the index.
///
/// Produces the same rows, in the same order, as deduplicating an
/// [`IndexScanExec`](super::index::IndexScanExec) of the same scan on that
/// column.
#[derive(Debug)]
pub struct SkipScanExec {
    plan: Arc<SkipScanPlan>,
    plan_properties: PlanProperties,
    metrics: ExecutionPlanMetricsSet,
}

impl SkipScanExec {
    pub fn new(plan: SkipScanPlan) -> Self {
        let plan_properties =
            create_plan_properties_for_index_scan(plan.schema(), plan.output_ordering());
        Self {
            plan: Arc::new(plan),
            plan_properties,
            metrics: ExecutionPlanMetricsSet::new(),
        }
    }

    pub fn plan(&self) -> &SkipScanPlan {
        &self.plan
    }
}

impl DisplayAs for SkipScanExec {
    fn fmt_as(&self, t: DisplayFormatType, f: &mut fmt::Formatter) -> fmt::Result {
        let scan = self.plan.scan();
        let skip_key = self.plan.skip_key();
        match t {
            DisplayFormatType::Default => {
                write!(
                    f,
                    "SkipScanExec: index={}, column={}, comparator={}",
                    scan.index.name(),
                    skip_key.column(),
                    skip_key.comparator()
                )?;
                if let Some(segment) = self.plan.segment() {
                    write!(f, ", segment={segment}")?;
                }
                Ok(())
            }
            DisplayFormatType::Verbose => {
                let keys = scan
                    .keys
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "SkipScanExec: index={}, table={}, kind={}, direction={}, column={}, comparator={}, keys=[{}], segment={:?}, cost={:.2} (original {:.2})",
                    scan.index.name(),
                    scan.index.table_name(),
                    scan.kind,
                    scan.direction,
                    skip_key.column(),
                    skip_key.comparator(),
                    keys,
                    self.plan.segment(),
                    self.plan.estimated_cost(),
                    self.plan.original_cost()
                )
            }
            DisplayFormatType::TreeRender => write!(f, "index={}", scan.index.name()),
        }
    }
}

impl ExecutionPlan for SkipScanExec {
    fn name(&self) -> &str {
        "SkipScanExec"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn properties(&self) -> &PlanProperties {
        &self.plan_properties
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![]
    }

    fn with_new_children(
        self: Arc<Self>,
        children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        if !children.is_empty() {
            return Err(DataFusionError::Internal(
                "SkipScanExec does not accept children".to_string(),
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
                "SkipScanExec only supports a single partition".to_string(),
            ));
        }

        let index_name = self.plan.scan().index.name();
        let reservation = MemoryConsumer::new(format!("SkipScanExec[{index_name}]"))
            .register(context.memory_pool());
        let counters = SkipScanCounters {
            cursor_opens: MetricBuilder::new(&self.metrics).counter("cursor_opens", partition),
            rescans: MetricBuilder::new(&self.metrics).counter("rescans", partition),
            null_probes: MetricBuilder::new(&self.metrics).counter("null_probes", partition),
        };
        let iterator = SkipScanIterator::try_new(Arc::clone(&self.plan), reservation)?
            .with_counters(counters);
        let baseline_metrics = BaselineMetrics::new(&self.metrics, partition);

        Ok(Box::pin(RowBatchStream::new(
            iterator,
            self.schema(),
            context.session_config().batch_size(),
            baseline_metrics,
        )))
    }

    fn metrics(&self) -> Option<MetricsSet> {
        Some(self.metrics.clone_inner())
    }
}
