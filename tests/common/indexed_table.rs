use std::{any::Any, sync::Arc};

use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use datafusion::catalog::Session;
use datafusion::datasource::{TableProvider, TableType};
use datafusion::error::Result;
use datafusion::logical_expr::Expr;
use datafusion::physical_plan::ExecutionPlan;
use datafusion_common::DataFusionError;
use datafusion_skip_scan::physical_plan::exec::index::{IndexScanConfig, IndexScanExec};
use datafusion_skip_scan::physical_plan::OrderedIndex;
use datafusion_skip_scan::types::ScanKind;

/// A table served entirely by an index-only scan of one ordered index.
#[derive(Debug)]
pub struct IndexedTable {
    index: Arc<dyn OrderedIndex>,
}

impl IndexedTable {
    pub fn new(index: Arc<dyn OrderedIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl TableProvider for IndexedTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.index.schema(ScanKind::IndexOnlyScan)
    }

    fn table_type(&self) -> TableType {
        TableType::Base
    }

    async fn scan(
        &self,
        _state: &dyn Session,
        projection: Option<&Vec<usize>>,
        _filters: &[Expr],
        _limit: Option<usize>,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        let width = self.schema().fields().len();
        if let Some(projection) = projection {
            if !projection.iter().copied().eq(0..width) {
                return Err(DataFusionError::NotImplemented(
                    "IndexedTable only supports full projections".to_string(),
                ));
            }
        }
        let config = IndexScanConfig::new(Arc::clone(&self.index)).with_kind(ScanKind::IndexOnlyScan);
        Ok(Arc::new(IndexScanExec::try_new(config)?))
    }
}
