mod common;

use std::sync::Arc;

use common::indexed_table::IndexedTable;
use common::{dept_batch, extract_i32, extract_strings, int_index, setup_logging, sort_options};
use datafusion::config::ConfigOptions;
use datafusion::error::Result;
use datafusion::execution::{SessionStateBuilder, TaskContext};
use datafusion::logical_expr::Operator;
use datafusion::physical_expr::expressions::Column;
use datafusion::physical_expr::{LexOrdering, PhysicalExpr, PhysicalSortExpr};
use datafusion::physical_optimizer::PhysicalOptimizerRule;
use datafusion::physical_plan::aggregates::{AggregateExec, AggregateMode, PhysicalGroupBy};
use datafusion::physical_plan::coalesce_batches::CoalesceBatchesExec;
use datafusion::physical_plan::repartition::RepartitionExec;
use datafusion::physical_plan::sorts::sort_preserving_merge::SortPreservingMergeExec;
use datafusion::physical_plan::union::UnionExec;
use datafusion::physical_plan::{collect, displayable, ExecutionPlan, Partitioning};
use datafusion::prelude::{col, SessionConfig, SessionContext};
use datafusion_skip_scan::physical_plan::exec::index::{IndexScanConfig, IndexScanExec, RuntimeKey};
use datafusion_skip_scan::physical_plan::exec::skip_scan::SkipScanExec;
use datafusion_skip_scan::physical_plan::memory::MemoryIndex;
use datafusion_skip_scan::physical_plan::OrderedIndex;
use datafusion_skip_scan::{SkipScanOptions, SkipScanRule};

fn index_scan(index: Arc<dyn OrderedIndex>) -> Arc<dyn ExecutionPlan> {
    Arc::new(IndexScanExec::try_new(IndexScanConfig::new(index)).unwrap())
}

fn distinct_on(input: Arc<dyn ExecutionPlan>, columns: &[&str]) -> Arc<dyn ExecutionPlan> {
    let schema = input.schema();
    let group_by = columns
        .iter()
        .map(|name| {
            let column: Arc<dyn PhysicalExpr> =
                Arc::new(Column::new_with_schema(name, &schema).unwrap());
            (column, name.to_string())
        })
        .collect();
    Arc::new(
        AggregateExec::try_new(
            AggregateMode::Single,
            PhysicalGroupBy::new_single(group_by),
            vec![],
            vec![],
            input,
            schema,
        )
        .unwrap(),
    )
}

fn optimize(plan: Arc<dyn ExecutionPlan>, config: &ConfigOptions) -> Arc<dyn ExecutionPlan> {
    SkipScanRule::new().optimize(plan, config).unwrap()
}

fn plan_string(plan: &Arc<dyn ExecutionPlan>) -> String {
    displayable(plan.as_ref()).indent(true).to_string()
}

fn leaf_names(plan: &Arc<dyn ExecutionPlan>) -> Vec<String> {
    let children = plan.children();
    if children.is_empty() {
        return vec![plan.name().to_string()];
    }
    children.into_iter().flat_map(leaf_names).collect()
}

async fn collect_i32(plan: &Arc<dyn ExecutionPlan>) -> Result<Vec<Option<i32>>> {
    let batches = collect(Arc::clone(plan), Arc::new(TaskContext::default())).await?;
    Ok(extract_i32(&batches, 0))
}

fn sorted(mut values: Vec<Option<i32>>) -> Vec<Option<i32>> {
    values.sort();
    values
}

#[tokio::test]
async fn replaces_distinct_index_scan() -> Result<()> {
    setup_logging();
    let index = int_index(
        "k_index",
        &[Some(3), Some(1), Some(3), None, Some(1), Some(2)],
        sort_options(false, false),
    );
    let plan = distinct_on(index_scan(index.clone()), &["k"]);

    let optimized = optimize(plan.clone(), &ConfigOptions::new());
    assert_eq!(leaf_names(&optimized), vec!["SkipScanExec"]);
    assert!(plan_string(&optimized).contains("AggregateExec"));
    assert_eq!(optimized.schema(), plan.schema());

    let batches = collect(optimized, Arc::new(TaskContext::default())).await?;
    assert_eq!(
        sorted(extract_i32(&batches, 0)),
        vec![None, Some(1), Some(2), Some(3)]
    );
    assert_eq!(index.open_count(), 2);
    Ok(())
}

#[test]
fn rule_is_idempotent() {
    let index = int_index("k_index", &[Some(1), Some(1)], sort_options(false, false));
    let plan = distinct_on(index_scan(index), &["k"]);
    let once = optimize(plan, &ConfigOptions::new());
    let twice = optimize(once.clone(), &ConfigOptions::new());
    assert_eq!(plan_string(&once), plan_string(&twice));
}

#[test]
fn keeps_index_scan_when_ineligible() {
    setup_logging();
    let batch = common::int_batch(&[Some(1), Some(2)]);
    let unique: Arc<dyn OrderedIndex> = Arc::new(
        MemoryIndex::try_new("k_unique", &batch, &[("k", sort_options(false, false))])
            .unwrap()
            .with_unique(true),
    );
    let ordered = int_index("k_index", &[Some(1), Some(2)], sort_options(false, false));

    let parameterized: Arc<dyn ExecutionPlan> = Arc::new(
        IndexScanExec::try_new(
            IndexScanConfig::new(ordered.clone())
                .with_runtime_keys(vec![RuntimeKey::new(0, Operator::Gt, "$1")]),
        )
        .unwrap(),
    );
    let with_order_by: Arc<dyn ExecutionPlan> = Arc::new(
        IndexScanExec::try_new(IndexScanConfig::new(ordered.clone()).with_order_by(vec![col("k")]))
            .unwrap(),
    );

    for plan in [
        distinct_on(index_scan(unique), &["k"]),
        distinct_on(index_scan(ordered.clone()), &["k", "row"]),
        distinct_on(index_scan(ordered.clone()), &["row"]),
        distinct_on(parameterized, &["k"]),
        distinct_on(with_order_by, &["k"]),
    ] {
        let optimized = optimize(plan.clone(), &ConfigOptions::new());
        assert_eq!(
            plan_string(&optimized),
            plan_string(&plan),
            "plan should be unchanged"
        );
    }
}

#[test]
fn keeps_index_scan_when_disabled() {
    let index = int_index("k_index", &[Some(1), Some(1)], sort_options(false, false));
    let plan = distinct_on(index_scan(index), &["k"]);

    let mut config = ConfigOptions::new();
    config.extensions.insert(SkipScanOptions::default());
    config.set("skip_scan.enable", "false").unwrap();
    let optimized = optimize(plan.clone(), &config);
    assert_eq!(leaf_names(&optimized), vec!["IndexScanExec"]);
}

#[test]
fn keeps_index_scan_when_not_cheaper() {
    // an empty index costs nothing to scan
    let index = int_index("k_index", &[], sort_options(false, false));
    let plan = distinct_on(index_scan(index), &["k"]);
    let optimized = optimize(plan, &ConfigOptions::new());
    assert_eq!(leaf_names(&optimized), vec!["IndexScanExec"]);
}

#[tokio::test]
async fn rewrites_each_segment_below_ordered_merge() -> Result<()> {
    setup_logging();
    let options = sort_options(false, false);
    let segment_0 = int_index("k_segment_0", &[Some(1), Some(1), Some(3)], options);
    let segment_1 = int_index("k_segment_1", &[Some(2), Some(3), Some(3)], options);
    let unique_segment: Arc<dyn OrderedIndex> = Arc::new(
        MemoryIndex::try_new(
            "k_segment_2",
            &common::int_batch(&[Some(4), Some(5)]),
            &[("k", options)],
        )
        .unwrap()
        .with_unique(true),
    );

    let union = Arc::new(UnionExec::new(vec![
        index_scan(segment_0),
        index_scan(segment_1),
        index_scan(unique_segment),
    ]));
    let ordering = LexOrdering::new(vec![PhysicalSortExpr::new(
        Arc::new(Column::new("k", 0)),
        options,
    )]);
    let merge = Arc::new(SortPreservingMergeExec::new(ordering, union));
    let plan = distinct_on(merge, &["k"]);

    let optimized = optimize(plan, &ConfigOptions::new());
    assert_eq!(
        leaf_names(&optimized),
        vec!["SkipScanExec", "SkipScanExec", "IndexScanExec"]
    );

    let merge = optimized.children()[0];
    let union = merge.children()[0];
    for (position, segment) in union.children().into_iter().take(2).enumerate() {
        let skip_scan = segment.as_any().downcast_ref::<SkipScanExec>().unwrap();
        assert_eq!(skip_scan.plan().segment(), Some(position));
    }
    let segments = union.children();
    assert_eq!(collect_i32(segments[0]).await?, vec![Some(1), Some(3)]);
    assert_eq!(collect_i32(segments[1]).await?, vec![Some(2), Some(3)]);

    let batches = collect(optimized, Arc::new(TaskContext::default())).await?;
    assert_eq!(
        sorted(extract_i32(&batches, 0)),
        vec![Some(1), Some(2), Some(3), Some(4), Some(5)]
    );
    Ok(())
}

#[tokio::test]
async fn rewrites_scan_below_round_robin_repartition() -> Result<()> {
    setup_logging();
    let index = int_index(
        "k_index",
        &[Some(2), Some(1), Some(2), None, Some(1)],
        sort_options(false, false),
    );
    let coalesced = Arc::new(CoalesceBatchesExec::new(index_scan(index), 8192));
    let repartitioned = Arc::new(RepartitionExec::try_new(
        coalesced,
        Partitioning::RoundRobinBatch(4),
    )?);
    let plan = distinct_on(repartitioned, &["k"]);

    let optimized = optimize(plan, &ConfigOptions::new());
    assert_eq!(leaf_names(&optimized), vec!["SkipScanExec"]);
    let plan_text = plan_string(&optimized);
    assert!(plan_text.contains("RepartitionExec"), "{plan_text}");
    assert!(plan_text.contains("CoalesceBatchesExec"), "{plan_text}");

    let batches = collect(optimized, Arc::new(TaskContext::default())).await?;
    assert_eq!(
        sorted(extract_i32(&batches, 0)),
        vec![None, Some(1), Some(2)]
    );
    Ok(())
}

#[test]
fn keeps_scan_below_hash_repartition() {
    let index = int_index("k_index", &[Some(1), Some(1)], sort_options(false, false));
    let scan = index_scan(index);
    let key: Arc<dyn PhysicalExpr> = Arc::new(Column::new("k", 0));
    let hash = Partitioning::Hash(vec![key], 4);
    let plan = distinct_on(
        Arc::new(RepartitionExec::try_new(scan, hash).unwrap()),
        &["k"],
    );
    let optimized = optimize(plan, &ConfigOptions::new());
    assert_eq!(leaf_names(&optimized), vec!["IndexScanExec"]);
}

fn employees_context(target_partitions: usize) -> Result<SessionContext> {
    let batch = dept_batch(&[
        (Some("sales"), "Bob"),
        (Some("eng"), "Alice"),
        (None, "Mallory"),
        (Some("sales"), "Eve"),
        (Some("eng"), "Dan"),
        (Some("ops"), "Carol"),
    ]);
    let index = Arc::new(
        MemoryIndex::try_new("dept_index", &batch, &[("dept", sort_options(false, true))])?
            .with_table_name("employees"),
    );

    let config = SessionConfig::new()
        .with_target_partitions(target_partitions)
        .with_option_extension(SkipScanOptions::default());
    let state = SessionStateBuilder::new()
        .with_config(config)
        .with_default_features()
        .with_physical_optimizer_rule(Arc::new(SkipScanRule::new()))
        .build();
    let ctx = SessionContext::new_with_state(state);
    ctx.register_table("employees", Arc::new(IndexedTable::new(index)))?;
    Ok(ctx)
}

async fn assert_distinct_departments_use_skip_scan(ctx: &SessionContext) -> Result<()> {
    let df = ctx.sql("SELECT DISTINCT dept FROM employees").await?;
    let physical_plan = df.clone().create_physical_plan().await?;
    assert!(
        plan_string(&physical_plan).contains("SkipScanExec"),
        "{}",
        plan_string(&physical_plan)
    );

    let mut departments = extract_strings(&df.collect().await?, 0);
    departments.sort();
    assert_eq!(
        departments,
        vec![
            None,
            Some("eng".to_string()),
            Some("ops".to_string()),
            Some("sales".to_string())
        ]
    );
    Ok(())
}

#[tokio::test]
async fn select_distinct_uses_skip_scan() -> Result<()> {
    setup_logging();
    let ctx = employees_context(1)?;
    assert_distinct_departments_use_skip_scan(&ctx).await?;

    ctx.sql("SET skip_scan.enable = false").await?;
    let physical_plan = ctx
        .sql("SELECT DISTINCT dept FROM employees")
        .await?
        .create_physical_plan()
        .await?;
    assert!(!plan_string(&physical_plan).contains("SkipScanExec"));
    Ok(())
}

#[tokio::test]
async fn select_distinct_uses_skip_scan_with_many_partitions() -> Result<()> {
    setup_logging();
    let ctx = employees_context(8)?;
    assert_distinct_departments_use_skip_scan(&ctx).await
}
