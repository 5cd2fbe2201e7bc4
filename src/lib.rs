// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! # DataFusion Skip Scan
//!
//! This crate adds a skip scan (also known as a loose index scan) to
//! DataFusion. A query such as `SELECT DISTINCT dept FROM employees` over an
//! index whose leading key column is `dept` normally reads every index entry
//! and deduplicates afterwards. A skip scan instead returns the first entry,
//! then asks the index for the first entry *after* that value, and so on, so
//! the work is proportional to the number of distinct values rather than the
//! number of rows.
//!
//! ## Architecture Overview
//!
//! The crate is split between planning and execution:
//!
//! 1. **Planning**: [`optimizer::SkipScanRule`] finds `AggregateExec`s that
//!    deduplicate an ordered [`physical_plan::exec::index::IndexScanExec`] and
//!    asks [`physical_plan::SkipScanPlanBuilder`] whether the scan qualifies.
//!    Eligible scans are replaced by [`physical_plan::exec::skip_scan::SkipScanExec`].
//! 2. **Execution**: each `SkipScanExec` partition drives a
//!    [`physical_plan::SkipScanIterator`], a small state machine that owns one
//!    [`physical_plan::OrderedCursor`] and rescans it with
//!    `column > last value` (or `<` for descending order) after every row.
//!
//! ## Core Components
//!
//! ### Index Access
//! - [`physical_plan::OrderedIndex`]: an index that returns entries in key order
//!   and evaluates [`types::ScanKey`]s itself
//! - [`physical_plan::OrderedCursor`]: a positioned scan with `rescan`, `next`
//!   and `close`
//! - [`physical_plan::memory::MemoryIndex`]: a sorted in-memory implementation
//!
//! ### Planning
//! - [`physical_plan::SkipScanPlanBuilder`]: eligibility checks, comparator
//!   selection and cost estimate
//! - [`optimizer::SkipScanRule`]: the physical optimizer rule
//! - [`optimizer::expr_to_scan_keys`]: converts filters into scan keys
//! - [`config::SkipScanOptions`]: the `skip_scan.enable` session option
//!
//! ## Eligibility
//!
//! A scan is skip-scanned only when all of the following hold:
//! - the `DISTINCT` is on exactly one column, the leading index key column
//! - the index declares a sort order for that column and its type is ordered
//! - the index is not unique on that column alone
//! - the scan has no ordering operators and no keys bound from parameters
//!
//! ## NULL Handling
//!
//! The skip predicate never matches NULL, so NULL entries are found by a
//! single end-of-scan probe: `IS NULL` when no NULL has been seen yet, or
//! `IS NOT NULL` when the scan started on NULLs (`NULLS FIRST`) and has not
//! found a value. Every distinct value, NULL included, is returned exactly
//! once and in index order.
//!
//! ## Partitioned Indexes
//!
//! Beneath a `SortPreservingMergeExec` over a `UnionExec` of index segments,
//! every segment is checked and replaced on its own:
//! ```text
//! AggregateExec (GROUP BY dept)
//! └── SortPreservingMergeExec [dept ASC]
//!     └── UnionExec
//!         ├── SkipScanExec (segment 0)
//!         └── SkipScanExec (segment 1)
//! ```
//! The aggregate removes values present in more than one segment.
//!
//! With more than one target partition DataFusion feeds the scan through a
//! round-robin `RepartitionExec` into a partial aggregate. The rule rewrites
//! the scan below it, and the final aggregate deduplicates as usual.
//!
//! ## Usage
//!
//! ```ignore
//! let config = SessionConfig::new().with_option_extension(SkipScanOptions::default());
//! let state = SessionStateBuilder::new()
//!     .with_config(config)
//!     .with_default_features()
//!     .with_physical_optimizer_rule(Arc::new(SkipScanRule::new()))
//!     .build();
//! ```

pub mod config;
pub mod optimizer;
pub mod physical_plan;
pub mod types;

pub use config::SkipScanOptions;
pub use optimizer::SkipScanRule;
