//! Logical plan model for RELQ
//!
//! Immutable relational operator trees plus the scalar expression vocabulary
//! the compiler lowers to SQL. Nodes are linked by `Arc`, so a subplan reused
//! in two positions keeps a single identity; a self-join is expressed as two
//! distinct `Scan` nodes over the same table name.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

mod catalog;
mod types;
pub use catalog::*;
pub use types::*;

pub type PlanRef = Arc<RelOp>;

/// Relational operator node.
///
/// A closed vocabulary: the compiler matches exhaustively, so adding a
/// variant is a compile-time change everywhere it must be handled.
#[derive(Debug, Clone)]
pub enum RelOp {
    Scan {
        table: String,
        schema: Schema,
    },
    Filter {
        input: PlanRef,
        predicate: Expr,
    },
    Project {
        input: PlanRef,
        items: Vec<ProjectItem>,
    },
    Join {
        left: PlanRef,
        right: PlanRef,
        predicate: Expr,
        kind: JoinKind,
    },
    Aggregate {
        input: PlanRef,
        group_by: Vec<Expr>,
        metrics: Vec<(String, Expr)>,
    },
    Sort {
        input: PlanRef,
        keys: Vec<SortKey>,
    },
    Limit {
        input: PlanRef,
        n: u64,
        offset: Option<u64>,
    },
    Distinct {
        input: PlanRef,
    },
    /// Existence test against a subquery, optionally correlated through
    /// `predicate` (which may reference both `input` and `subquery` scopes).
    Exists {
        input: PlanRef,
        subquery: PlanRef,
        predicate: Option<Expr>,
        negated: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    /// Always a *full* outer join; there is no bare "outer" in the model.
    FullOuter,
    Semi,
    Anti,
}

#[derive(Debug, Clone)]
pub enum ProjectItem {
    /// Every column of one input relation (`alias.*`).
    AllOf(PlanRef),
    Expr { expr: Expr, name: Option<String> },
}

impl ProjectItem {
    pub fn all_of(relation: &PlanRef) -> Self {
        ProjectItem::AllOf(relation.clone())
    }

    pub fn expr(expr: Expr) -> Self {
        ProjectItem::Expr { expr, name: None }
    }

    pub fn named(expr: Expr, name: impl Into<String>) -> Self {
        ProjectItem::Expr {
            expr,
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub expr: Expr,
    pub desc: bool,
}

impl SortKey {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, desc: false }
    }

    pub fn desc(expr: Expr) -> Self {
        Self { expr, desc: true }
    }
}

impl RelOp {
    pub fn scan(table: impl Into<String>, schema: Schema) -> PlanRef {
        Arc::new(RelOp::Scan {
            table: table.into(),
            schema,
        })
    }

    /// Build a scan by looking the table up in a catalog.
    pub fn scan_from(catalog: &dyn Catalog, table: &str) -> Result<PlanRef, String> {
        Ok(Self::scan(table, catalog.table_schema(table)?))
    }

    pub fn filter(input: &PlanRef, predicate: Expr) -> PlanRef {
        Arc::new(RelOp::Filter {
            input: input.clone(),
            predicate,
        })
    }

    pub fn project(input: &PlanRef, items: Vec<ProjectItem>) -> PlanRef {
        Arc::new(RelOp::Project {
            input: input.clone(),
            items,
        })
    }

    pub fn join(left: &PlanRef, right: &PlanRef, predicate: Expr, kind: JoinKind) -> PlanRef {
        Arc::new(RelOp::Join {
            left: left.clone(),
            right: right.clone(),
            predicate,
            kind,
        })
    }

    pub fn aggregate(
        input: &PlanRef,
        group_by: Vec<Expr>,
        metrics: Vec<(String, Expr)>,
    ) -> PlanRef {
        Arc::new(RelOp::Aggregate {
            input: input.clone(),
            group_by,
            metrics,
        })
    }

    pub fn sort(input: &PlanRef, keys: Vec<SortKey>) -> PlanRef {
        Arc::new(RelOp::Sort {
            input: input.clone(),
            keys,
        })
    }

    pub fn limit(input: &PlanRef, n: u64, offset: Option<u64>) -> PlanRef {
        Arc::new(RelOp::Limit {
            input: input.clone(),
            n,
            offset,
        })
    }

    pub fn distinct(input: &PlanRef) -> PlanRef {
        Arc::new(RelOp::Distinct {
            input: input.clone(),
        })
    }

    pub fn exists(
        input: &PlanRef,
        subquery: &PlanRef,
        predicate: Option<Expr>,
        negated: bool,
    ) -> PlanRef {
        Arc::new(RelOp::Exists {
            input: input.clone(),
            subquery: subquery.clone(),
            predicate,
            negated,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelOp::Scan { .. } => "Scan",
            RelOp::Filter { .. } => "Filter",
            RelOp::Project { .. } => "Project",
            RelOp::Join { .. } => "Join",
            RelOp::Aggregate { .. } => "Aggregate",
            RelOp::Sort { .. } => "Sort",
            RelOp::Limit { .. } => "Limit",
            RelOp::Distinct { .. } => "Distinct",
            RelOp::Exists { .. } => "Exists",
        }
    }

    /// The ordered, named, typed columns this node produces.
    pub fn output_schema(&self) -> Schema {
        match self {
            RelOp::Scan { schema, .. } => schema.clone(),
            RelOp::Filter { input, .. }
            | RelOp::Sort { input, .. }
            | RelOp::Limit { input, .. }
            | RelOp::Distinct { input }
            | RelOp::Exists { input, .. } => input.output_schema(),
            RelOp::Project { input, items } => {
                let mut fields = Vec::new();
                for item in items {
                    match item {
                        ProjectItem::AllOf(relation) => {
                            fields.extend(relation.output_schema().fields);
                        }
                        ProjectItem::Expr { expr, name } => {
                            let name = name
                                .clone()
                                .or_else(|| expr.implied_name().map(str::to_string))
                                .unwrap_or_default();
                            fields.push(FieldType::new(name, expr.result_type(input), true));
                        }
                    }
                }
                Schema::new(fields)
            }
            RelOp::Aggregate {
                input,
                group_by,
                metrics,
            } => {
                let mut fields = Vec::new();
                for key in group_by {
                    let name = key.implied_name().unwrap_or_default().to_string();
                    fields.push(FieldType::new(name, key.result_type(input), true));
                }
                for (name, metric) in metrics {
                    fields.push(FieldType::new(
                        name.clone(),
                        metric.result_type(input),
                        true,
                    ));
                }
                Schema::new(fields)
            }
            RelOp::Join {
                left, right, kind, ..
            } => match kind {
                // Semi and anti joins only ever expose the left side.
                JoinKind::Semi | JoinKind::Anti => left.output_schema(),
                _ => {
                    let mut fields = left.output_schema().fields;
                    fields.extend(right.output_schema().fields);
                    Schema::new(fields)
                }
            },
        }
    }
}

/// Scalar expression node.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Column bound to the relation node that produces it.
    Column { relation: PlanRef, name: String },
    /// Column resolved by name against the enclosing statement's relations.
    Field { name: String },
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// Searched case: ordered (condition, result) branches.
    Case {
        branches: Vec<(Expr, Expr)>,
        default: Option<Box<Expr>>,
        result_type: Option<DataType>,
    },
    /// Simple case: one operand matched against branch values. Lowered to
    /// the searched form during translation.
    SimpleCase {
        operand: Box<Expr>,
        branches: Vec<(Expr, Expr)>,
        default: Option<Box<Expr>>,
        result_type: Option<DataType>,
    },
    Coalesce(Vec<Expr>),
    Aggregate {
        func: AggFunc,
        arg: Option<Box<Expr>>,
        distinct: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: PlanRef,
        negated: bool,
    },
    /// Scalar-valued subquery, usually correlated with the enclosing scope.
    ScalarSubquery(PlanRef),
    /// Column-level DISTINCT marker.
    DistinctValue(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Like,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunc {
    Sum,
    Count,
    CountStar,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(chrono::NaiveDateTime),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<chrono::NaiveDateTime> for Value {
    fn from(v: chrono::NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

/// Column reference bound to a plan node.
pub fn col(relation: &PlanRef, name: impl Into<String>) -> Expr {
    Expr::Column {
        relation: relation.clone(),
        name: name.into(),
    }
}

/// Unbound column reference, resolved by name at translation time.
pub fn field(name: impl Into<String>) -> Expr {
    Expr::Field { name: name.into() }
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

macro_rules! binary_builder {
    ($method:ident, $op:ident) => {
        pub fn $method(self, other: Expr) -> Expr {
            Expr::Binary {
                op: BinaryOp::$op,
                left: Box::new(self),
                right: Box::new(other),
            }
        }
    };
}

macro_rules! aggregate_builder {
    ($method:ident, $func:ident) => {
        pub fn $method(self) -> Expr {
            Expr::Aggregate {
                func: AggFunc::$func,
                arg: Some(Box::new(self)),
                distinct: false,
            }
        }
    };
}

impl Expr {
    binary_builder!(eq, Eq);
    binary_builder!(ne, Ne);
    binary_builder!(lt, Lt);
    binary_builder!(le, Le);
    binary_builder!(gt, Gt);
    binary_builder!(ge, Ge);
    binary_builder!(and, And);
    binary_builder!(or, Or);
    binary_builder!(add, Add);
    binary_builder!(sub, Sub);
    binary_builder!(mul, Mul);
    binary_builder!(div, Div);
    binary_builder!(like, Like);

    aggregate_builder!(sum, Sum);
    aggregate_builder!(count, Count);
    aggregate_builder!(avg, Avg);
    aggregate_builder!(min, Min);
    aggregate_builder!(max, Max);

    pub fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Neg,
            expr: Box::new(self),
        }
    }

    pub fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    pub fn between(self, low: Expr, high: Expr) -> Expr {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
        }
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn count_distinct(self) -> Expr {
        Expr::Aggregate {
            func: AggFunc::Count,
            arg: Some(Box::new(self)),
            distinct: true,
        }
    }

    pub fn count_star() -> Expr {
        Expr::Aggregate {
            func: AggFunc::CountStar,
            arg: None,
            distinct: false,
        }
    }

    pub fn distinct(self) -> Expr {
        Expr::DistinctValue(Box::new(self))
    }

    pub fn coalesce(args: Vec<Expr>) -> Expr {
        Expr::Coalesce(args)
    }

    pub fn in_list(self, list: Vec<Expr>) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    pub fn in_subquery(self, subquery: &PlanRef) -> Expr {
        Expr::InSubquery {
            expr: Box::new(self),
            subquery: subquery.clone(),
            negated: false,
        }
    }

    pub fn not_in_subquery(self, subquery: &PlanRef) -> Expr {
        Expr::InSubquery {
            expr: Box::new(self),
            subquery: subquery.clone(),
            negated: true,
        }
    }

    pub fn scalar_subquery(subquery: &PlanRef) -> Expr {
        Expr::ScalarSubquery(subquery.clone())
    }

    pub fn searched_case(
        branches: Vec<(Expr, Expr)>,
        default: Option<Expr>,
        result_type: Option<DataType>,
    ) -> Expr {
        Expr::Case {
            branches,
            default: default.map(Box::new),
            result_type,
        }
    }

    pub fn simple_case(
        operand: Expr,
        branches: Vec<(Expr, Expr)>,
        default: Option<Expr>,
    ) -> Expr {
        Expr::SimpleCase {
            operand: Box::new(operand),
            branches,
            default: default.map(Box::new),
            result_type: None,
        }
    }

    /// Name an expression carries without an explicit alias.
    pub fn implied_name(&self) -> Option<&str> {
        match self {
            Expr::Column { name, .. } | Expr::Field { name } => Some(name),
            Expr::DistinctValue(expr) => expr.implied_name(),
            _ => None,
        }
    }

    /// Best-effort result type, used for schema derivation and for typing
    /// untyped NULL branches. `input` is the relation the expression is
    /// evaluated against.
    pub fn result_type(&self, input: &PlanRef) -> DataType {
        match self {
            Expr::Column { relation, name } => relation
                .output_schema()
                .field(name)
                .map(|f| f.data_type)
                .unwrap_or(DataType::Unknown),
            Expr::Field { name } => input
                .output_schema()
                .field(name)
                .map(|f| f.data_type)
                .unwrap_or(DataType::Unknown),
            Expr::Literal(value) => match value {
                Value::Null => DataType::Unknown,
                Value::Bool(_) => DataType::Bool,
                Value::Int(_) => DataType::Int64,
                Value::Float(_) => DataType::Float64,
                Value::String(_) => DataType::String,
                Value::Timestamp(_) => DataType::Timestamp,
            },
            Expr::Binary { op, left, .. } => match op {
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Like => DataType::Bool,
                _ => left.result_type(input),
            },
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => DataType::Bool,
                UnaryOp::Neg => expr.result_type(input),
            },
            Expr::Between { .. } | Expr::IsNull { .. } => DataType::Bool,
            Expr::Case {
                branches,
                result_type,
                ..
            }
            | Expr::SimpleCase {
                branches,
                result_type,
                ..
            } => (*result_type).unwrap_or_else(|| {
                branches
                    .first()
                    .map(|(_, result)| result.result_type(input))
                    .unwrap_or(DataType::Unknown)
            }),
            Expr::Coalesce(args) => args
                .first()
                .map(|a| a.result_type(input))
                .unwrap_or(DataType::Unknown),
            Expr::Aggregate { func, arg, .. } => match func {
                AggFunc::Count | AggFunc::CountStar => DataType::Int64,
                AggFunc::Avg => DataType::Float64,
                _ => arg
                    .as_ref()
                    .map(|a| a.result_type(input))
                    .unwrap_or(DataType::Unknown),
            },
            Expr::InList { .. } | Expr::InSubquery { .. } => DataType::Bool,
            Expr::ScalarSubquery(subquery) => subquery
                .output_schema()
                .fields
                .first()
                .map(|f| f.data_type)
                .unwrap_or(DataType::Unknown),
            Expr::DistinctValue(expr) => expr.result_type(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star1() -> PlanRef {
        RelOp::scan(
            "star1",
            Schema::of(&[
                ("c", DataType::Int32),
                ("f", DataType::Float64),
                ("foo_id", DataType::String),
            ]),
        )
    }

    #[test]
    fn test_filter_preserves_schema() {
        let scan = star1();
        let plan = RelOp::filter(&scan, col(&scan, "f").gt(lit(0)));

        assert_eq!(plan.output_schema(), scan.output_schema());
    }

    #[test]
    fn test_aggregate_schema_is_keys_then_metrics() {
        let scan = star1();
        let plan = RelOp::aggregate(
            &scan,
            vec![col(&scan, "foo_id")],
            vec![("total".to_string(), col(&scan, "f").sum())],
        );

        let schema = plan.output_schema();
        assert_eq!(schema.names(), vec!["foo_id".to_string(), "total".to_string()]);
        assert_eq!(schema.field("total").unwrap().data_type, DataType::Float64);
    }

    #[test]
    fn test_semi_join_exposes_left_side_only() {
        let left = star1();
        let right = star1();
        let plan = RelOp::join(
            &left,
            &right,
            col(&left, "foo_id").eq(col(&right, "foo_id")),
            JoinKind::Semi,
        );

        assert_eq!(plan.output_schema(), left.output_schema());
    }

    #[test]
    fn test_shared_subplan_keeps_identity() {
        let scan = star1();
        let shared = RelOp::filter(&scan, col(&scan, "f").gt(lit(0)));
        let left = shared.clone();
        let right = shared.clone();

        assert!(Arc::ptr_eq(&left, &right));
    }

    #[test]
    fn test_comparison_types_are_boolean() {
        let scan = star1();
        let expr = col(&scan, "f").gt(lit(0));

        assert_eq!(expr.result_type(&scan), DataType::Bool);
        assert_eq!(col(&scan, "f").result_type(&scan), DataType::Float64);
    }
}
