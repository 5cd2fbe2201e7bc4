#![allow(dead_code)]

pub mod indexed_table;

use std::sync::Arc;

use arrow::array::{Array, Int32Array, RecordBatch, StringArray};
use arrow::compute::SortOptions;
use arrow::datatypes::{DataType, Field, Schema};
use datafusion::execution::memory_pool::{GreedyMemoryPool, MemoryConsumer, MemoryPool};
use datafusion::execution::memory_pool::MemoryReservation;
use datafusion::physical_expr::expressions::Column;
use datafusion_common::ScalarValue;
use datafusion_skip_scan::physical_plan::exec::index::IndexScanConfig;
use datafusion_skip_scan::physical_plan::memory::MemoryIndex;
use datafusion_skip_scan::physical_plan::{
    SkipScanIterator, SkipScanPlan, SkipScanPlanBuilder, SkipScanVerdict,
};

/// Helper function to setup test logging
pub fn setup_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub fn sort_options(descending: bool, nulls_first: bool) -> SortOptions {
    SortOptions {
        descending,
        nulls_first,
    }
}

/// Builds a batch `(k INT, row INT)` where `row` is the position of each entry.
pub fn int_batch(values: &[Option<i32>]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int32, true),
        Field::new("row", DataType::Int32, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int32Array::from(values.to_vec())),
            Arc::new(Int32Array::from_iter_values(0..values.len() as i32)),
        ],
    )
    .unwrap()
}

/// An index on `k` over [`int_batch`].
pub fn int_index(name: &str, values: &[Option<i32>], options: SortOptions) -> Arc<MemoryIndex> {
    Arc::new(
        MemoryIndex::try_new(name, &int_batch(values), &[("k", options)])
            .unwrap()
            .with_table_name("numbers"),
    )
}

/// Builds a batch `(dept VARCHAR, name VARCHAR)`.
pub fn dept_batch(rows: &[(Option<&str>, &str)]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("dept", DataType::Utf8, true),
        Field::new("name", DataType::Utf8, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(
                rows.iter().map(|(dept, _)| *dept).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|(_, name)| *name).collect::<Vec<_>>(),
            )),
        ],
    )
    .unwrap()
}

pub fn reservation() -> MemoryReservation {
    let pool: Arc<dyn MemoryPool> = Arc::new(GreedyMemoryPool::new(1 << 20));
    MemoryConsumer::new("test").register(&pool)
}

/// Plans a skip scan of `config` for `DISTINCT column`, panicking if ineligible.
pub fn skip_scan_plan(config: &IndexScanConfig, column: Column) -> SkipScanPlan {
    match SkipScanPlanBuilder::new().build(config, &[column]).unwrap() {
        SkipScanVerdict::Eligible(plan) => plan,
        SkipScanVerdict::Ineligible(reason) => panic!("scan is not eligible: {reason}"),
    }
}

/// Runs a skip scan to completion, returning the value at `position` of each row.
pub fn run_skip_scan(plan: SkipScanPlan, position: usize) -> Vec<ScalarValue> {
    let mut iterator = SkipScanIterator::try_new(Arc::new(plan), reservation()).unwrap();
    let mut values = vec![];
    while let Some(row) = iterator.next().unwrap() {
        values.push(row[position].clone());
    }
    values
}

pub fn as_i32(values: &[ScalarValue]) -> Vec<Option<i32>> {
    values
        .iter()
        .map(|value| match value {
            ScalarValue::Int32(v) => *v,
            other => panic!("expected Int32, got {other:?}"),
        })
        .collect()
}

/// Collects column `index` of `batches` as Int32 values.
pub fn extract_i32(batches: &[RecordBatch], index: usize) -> Vec<Option<i32>> {
    let mut values = Vec::new();
    for batch in batches {
        let column = batch
            .column(index)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        values.extend(column.iter());
    }
    values
}

/// Collects column `index` of `batches` as strings.
pub fn extract_strings(batches: &[RecordBatch], index: usize) -> Vec<Option<String>> {
    let mut values = Vec::new();
    for batch in batches {
        let column = batch
            .column(index)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        for i in 0..column.len() {
            values.push((!column.is_null(i)).then(|| column.value(i).to_string()));
        }
    }
    values
}
