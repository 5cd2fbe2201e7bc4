pub mod index;
pub mod skip_scan;

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use datafusion::error::{DataFusionError, Result};
use datafusion::physical_plan::metrics::BaselineMetrics;
use datafusion::physical_plan::RecordBatchStream;
use datafusion_common::ScalarValue;
use futures::stream::Stream;

/// A synchronous, row-at-a-time producer driven by [`RowBatchStream`].
pub(crate) trait RowSource: Send + Unpin {
    /// Returns the next owned row, or `None` once the source is exhausted.
    fn next_row(&mut self) -> Result<Option<Vec<ScalarValue>>>;
}

/// Adapts a [`RowSource`] to a `RecordBatch` stream.
///
/// Each poll pulls up to `batch_size` rows. The stream ends after the source
/// is exhausted or returns an error.
pub(crate) struct RowBatchStream<S> {
    source: S,
    schema: SchemaRef,
    batch_size: usize,
    baseline_metrics: BaselineMetrics,
    done: bool,
}

impl<S: RowSource> RowBatchStream<S> {
    pub(crate) fn new(
        source: S,
        schema: SchemaRef,
        batch_size: usize,
        baseline_metrics: BaselineMetrics,
    ) -> Self {
        Self {
            source,
            schema,
            batch_size: batch_size.max(1),
            baseline_metrics,
            done: false,
        }
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let mut rows = Vec::with_capacity(self.batch_size);
        while rows.len() < self.batch_size {
            match self.source.next_row() {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }

        if rows.is_empty() {
            return Ok(None);
        }
        rows_to_batch(&self.schema, rows).map(Some)
    }
}

impl<S: RowSource> Stream for RowBatchStream<S> {
    type Item = Result<RecordBatch>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return self.baseline_metrics.record_poll(Poll::Ready(None));
        }

        let elapsed_compute = self.baseline_metrics.elapsed_compute().clone();
        let timer = elapsed_compute.timer();
        let batch = self.next_batch();
        timer.done();

        self.baseline_metrics
            .record_poll(Poll::Ready(batch.transpose()))
    }
}

impl<S: RowSource> RecordBatchStream for RowBatchStream<S> {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl<S> fmt::Debug for RowBatchStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RowBatchStream")
            .field("schema", &self.schema)
            .field("batch_size", &self.batch_size)
            .field("done", &self.done)
            .finish()
    }
}

/// Builds a batch from owned rows laid out according to `schema`.
pub(crate) fn rows_to_batch(schema: &SchemaRef, rows: Vec<Vec<ScalarValue>>) -> Result<RecordBatch> {
    let width = schema.fields().len();
    let mut columns: Vec<Vec<ScalarValue>> =
        (0..width).map(|_| Vec::with_capacity(rows.len())).collect();

    for row in rows {
        if row.len() != width {
            return Err(DataFusionError::Internal(format!(
                "row with {} values does not match schema with {} fields",
                row.len(),
                width
            )));
        }
        for (column, value) in columns.iter_mut().zip(row) {
            column.push(value);
        }
    }

    let arrays = columns
        .into_iter()
        .map(ScalarValue::iter_to_array)
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(schema.clone(), arrays)?)
}
