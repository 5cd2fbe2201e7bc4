//! Common type definitions used throughout the crate.
//!
//! These are the small value types shared by the planner and the runtime:
//! scan keys handed to an [`OrderedIndex`](crate::physical_plan::OrderedIndex),
//! the description of the distinct column ([`SkipKey`]) and the NULL-aware
//! ordering helpers both sides agree on.

use std::cmp::Ordering;
use std::fmt;

use arrow::compute::SortOptions;
use arrow::datatypes::DataType;
use datafusion::logical_expr::Operator;
use datafusion::physical_expr::expressions::Column;
use datafusion_common::ScalarValue;

/// Direction an ordered index is traversed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanDirection {
    #[default]
    Forward,
    Backward,
}

impl ScanDirection {
    /// Returns the order rows actually come out of a cursor for a key column
    /// declared with `declared`.
    ///
    /// A backward traversal flips both the value order and the NULL placement.
    pub fn effective_sort_options(self, declared: SortOptions) -> SortOptions {
        match self {
            ScanDirection::Forward => declared,
            ScanDirection::Backward => SortOptions {
                descending: !declared.descending,
                nulls_first: !declared.nulls_first,
            },
        }
    }
}

impl fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanDirection::Forward => write!(f, "forward"),
            ScanDirection::Backward => write!(f, "backward"),
        }
    }
}

/// The flavour of index access a cursor performs.
///
/// An index scan returns complete table rows, an index-only scan returns the
/// key columns stored in the index itself. The choice is made once when a
/// scan is planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanKind {
    #[default]
    IndexScan,
    IndexOnlyScan,
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanKind::IndexScan => write!(f, "index"),
            ScanKind::IndexOnlyScan => write!(f, "index-only"),
        }
    }
}

/// Ascending or descending order of the distinct column in scan output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Where NULLs appear in scan output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrdering {
    First,
    Last,
}

/// The condition a [`ScanKey`] applies to one index key column.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanKeyOp {
    /// `column <op> value`. Only `=`, `<`, `<=`, `>` and `>=` are valid.
    /// A NULL `value` matches nothing.
    Compare { op: Operator, value: ScalarValue },
    /// `column IS NULL`
    IsNull,
    /// `column IS NOT NULL`
    IsNotNull,
}

/// A single predicate on an index key column, evaluated by the index itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanKey {
    /// Position of the key column within the index key (0 is the leading column).
    pub column: usize,
    pub op: ScanKeyOp,
}

impl ScanKey {
    pub fn compare(column: usize, op: Operator, value: ScalarValue) -> Self {
        Self {
            column,
            op: ScanKeyOp::Compare { op, value },
        }
    }

    pub fn is_null(column: usize) -> Self {
        Self {
            column,
            op: ScanKeyOp::IsNull,
        }
    }

    pub fn is_not_null(column: usize) -> Self {
        Self {
            column,
            op: ScanKeyOp::IsNotNull,
        }
    }

    /// Whether `op` can be used in a comparison key.
    pub fn supports_operator(op: Operator) -> bool {
        matches!(
            op,
            Operator::Eq | Operator::Lt | Operator::LtEq | Operator::Gt | Operator::GtEq
        )
    }

    /// Evaluates the key against the value of its key column.
    ///
    /// Comparisons follow SQL semantics: if either side is NULL the key does
    /// not match, so a comparison key can never select a NULL entry.
    pub fn matches(&self, value: &ScalarValue) -> bool {
        match &self.op {
            ScanKeyOp::IsNull => value.is_null(),
            ScanKeyOp::IsNotNull => !value.is_null(),
            ScanKeyOp::Compare { op, value: argument } => {
                if value.is_null() || argument.is_null() {
                    return false;
                }
                let Some(ordering) = value.partial_cmp(argument) else {
                    return false;
                };
                match op {
                    Operator::Eq => ordering == Ordering::Equal,
                    Operator::Lt => ordering == Ordering::Less,
                    Operator::LtEq => ordering != Ordering::Greater,
                    Operator::Gt => ordering == Ordering::Greater,
                    Operator::GtEq => ordering != Ordering::Less,
                    _ => false,
                }
            }
        }
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            ScanKeyOp::Compare { op, value } => write!(f, "#{} {} {}", self.column, op, value),
            ScanKeyOp::IsNull => write!(f, "#{} IS NULL", self.column),
            ScanKeyOp::IsNotNull => write!(f, "#{} IS NOT NULL", self.column),
        }
    }
}

/// Describes the distinct column a skip scan jumps over.
///
/// Built by the planner from the index's leading key column, the scan
/// direction and the column's data type. `comparator` is the strict operator
/// that selects values *after* the last one seen, in scan output order.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipKey {
    column: Column,
    direction: SortDirection,
    nulls: NullOrdering,
    comparator: Operator,
    is_copy_by_value: bool,
    type_size: Option<usize>,
}

impl SkipKey {
    /// Builds the skip key for `column` (its position in the scan output row)
    /// or returns `None` if `data_type` has no strict ordering.
    pub fn try_new(
        column: Column,
        data_type: &DataType,
        declared: SortOptions,
        scan_direction: ScanDirection,
    ) -> Option<Self> {
        if !has_strict_ordering(data_type) {
            return None;
        }
        let effective = scan_direction.effective_sort_options(declared);
        let (direction, comparator) = if effective.descending {
            (SortDirection::Desc, Operator::Lt)
        } else {
            (SortDirection::Asc, Operator::Gt)
        };
        let nulls = if effective.nulls_first {
            NullOrdering::First
        } else {
            NullOrdering::Last
        };
        let type_size = data_type.primitive_width();
        Some(Self {
            column,
            direction,
            nulls,
            comparator,
            // scalars no wider than a machine word are copied inline
            is_copy_by_value: type_size.is_some_and(|width| width <= 8),
            type_size,
        })
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    pub fn nulls(&self) -> NullOrdering {
        self.nulls
    }

    pub fn comparator(&self) -> Operator {
        self.comparator
    }

    pub fn is_copy_by_value(&self) -> bool {
        self.is_copy_by_value
    }

    /// Fixed storage width in bytes, `None` for variable-width types.
    pub fn type_size(&self) -> Option<usize> {
        self.type_size
    }

    /// Sort options describing the column's order in scan output.
    pub fn sort_options(&self) -> SortOptions {
        SortOptions {
            descending: self.direction == SortDirection::Desc,
            nulls_first: self.nulls == NullOrdering::First,
        }
    }
}

/// Whether values of `data_type` can be compared with a strict ordering operator.
pub fn has_strict_ordering(data_type: &DataType) -> bool {
    match data_type {
        DataType::Dictionary(_, value_type) => has_strict_ordering(value_type),
        DataType::Boolean
        | DataType::Utf8
        | DataType::LargeUtf8
        | DataType::Utf8View
        | DataType::Binary
        | DataType::LargeBinary
        | DataType::BinaryView
        | DataType::FixedSizeBinary(_) => true,
        other => other.is_primitive(),
    }
}

/// Compares two key values according to `options`, placing NULLs first or
/// last regardless of the value direction.
pub fn compare_key_values(
    left: &ScalarValue,
    right: &ScalarValue,
    options: SortOptions,
) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if options.nulls_first => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if options.nulls_first => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = left.partial_cmp(right).unwrap_or(Ordering::Equal);
            if options.descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
    }
}
