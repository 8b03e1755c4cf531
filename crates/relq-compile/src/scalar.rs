//! Scalar expression translation
//!
//! Lowers plan expressions into target scalar SQL nodes. Translation
//! resolves aliases through the context but never creates them;
//! subquery-valued expressions recurse into the query compiler under a
//! pushed scope, which is how correlated references find their enclosing
//! statement's aliases.

use relq_plan::{AggFunc, BinaryOp, DataType, Expr, JoinKind, PlanRef, RelOp, UnaryOp, Value};
use relq_sql::{SqlBinaryOp, SqlLiteral, SqlScalar};

use crate::compiler::plain_items;
use crate::{
    to_native, CompileError, FieldResolution, QueryCompiler, Resolution, TranslationContext,
};

/// Translate a standalone expression with the default compiler configuration.
pub fn translate(expr: &Expr, ctx: &mut TranslationContext) -> Result<SqlScalar, CompileError> {
    QueryCompiler::default().translate_scalar(expr, ctx)
}

/// Like [`translate`], exposing the result under `name`.
pub fn translate_named(
    expr: &Expr,
    ctx: &mut TranslationContext,
    name: &str,
) -> Result<SqlScalar, CompileError> {
    QueryCompiler::default().translate_scalar_named(expr, ctx, name)
}

impl QueryCompiler {
    /// Translate one scalar expression against the current scope stack.
    pub fn translate_scalar(
        &self,
        expr: &Expr,
        ctx: &mut TranslationContext,
    ) -> Result<SqlScalar, CompileError> {
        match expr {
            Expr::Column { relation, name } => {
                if relation.output_schema().field(name).is_none() {
                    return Err(CompileError::MalformedPlan(format!(
                        "column '{}' is not produced by the referenced {} node",
                        name,
                        relation.name()
                    )));
                }
                let qualifier = self.resolve_qualifier(relation, name, ctx)?;
                Ok(SqlScalar::Column {
                    qualifier,
                    name: name.clone(),
                })
            }
            Expr::Field { name } => match ctx.resolve_field(name) {
                FieldResolution::Unscoped => Ok(SqlScalar::Column {
                    qualifier: None,
                    name: name.clone(),
                }),
                FieldResolution::Unique(alias) => Ok(SqlScalar::Column {
                    qualifier: Some(alias),
                    name: name.clone(),
                }),
                FieldResolution::Missing => Err(CompileError::MalformedPlan(format!(
                    "column '{}' is not produced by any relation in scope",
                    name
                ))),
                FieldResolution::Ambiguous(n) => Err(CompileError::AmbiguousColumnReference(
                    format!("column '{}' is produced by {} relations in scope", name, n),
                )),
            },
            Expr::Literal(value) => Ok(SqlScalar::Literal(lower_literal(value))),
            Expr::Binary { op, left, right } => Ok(SqlScalar::Binary {
                op: lower_binary_op(*op),
                left: Box::new(self.translate_scalar(left, ctx)?),
                right: Box::new(self.translate_scalar(right, ctx)?),
            }),
            Expr::Unary { op, expr } => {
                let inner = Box::new(self.translate_scalar(expr, ctx)?);
                match op {
                    UnaryOp::Not => Ok(SqlScalar::Not(inner)),
                    // Negating a boolean is logical NOT, not arithmetic minus.
                    UnaryOp::Neg if is_boolean(expr) => Ok(SqlScalar::Not(inner)),
                    UnaryOp::Neg => Ok(SqlScalar::Negative(inner)),
                }
            }
            Expr::Between { expr, low, high } => Ok(SqlScalar::Between {
                expr: Box::new(self.translate_scalar(expr, ctx)?),
                low: Box::new(self.translate_scalar(low, ctx)?),
                high: Box::new(self.translate_scalar(high, ctx)?),
            }),
            Expr::IsNull { expr, negated } => Ok(SqlScalar::IsNull {
                expr: Box::new(self.translate_scalar(expr, ctx)?),
                negated: *negated,
            }),
            Expr::Case {
                branches,
                default,
                result_type,
            } => self.lower_case(None, branches, default.as_deref(), *result_type, ctx),
            Expr::SimpleCase {
                operand,
                branches,
                default,
                result_type,
            } => self.lower_case(
                Some(operand),
                branches,
                default.as_deref(),
                *result_type,
                ctx,
            ),
            Expr::Coalesce(args) => {
                let args = args
                    .iter()
                    .map(|arg| self.translate_scalar(arg, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SqlScalar::Coalesce(args))
            }
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => self.lower_aggregate(*func, arg.as_deref(), *distinct, ctx),
            Expr::InList {
                expr,
                list,
                negated,
            } => Ok(SqlScalar::InList {
                expr: Box::new(self.translate_scalar(expr, ctx)?),
                list: list
                    .iter()
                    .map(|item| self.translate_scalar(item, ctx))
                    .collect::<Result<Vec<_>, _>>()?,
                negated: *negated,
            }),
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                if subquery.output_schema().fields.len() != 1 {
                    return Err(CompileError::MalformedPlan(format!(
                        "IN subquery over a {} node must produce exactly one column",
                        subquery.name()
                    )));
                }
                let expr = Box::new(self.translate_scalar(expr, ctx)?);
                ctx.push_scope();
                let compiled = self.compile_node(subquery, ctx);
                ctx.pop_scope();
                Ok(SqlScalar::InSubquery {
                    expr,
                    select: Box::new(compiled?),
                    negated: *negated,
                })
            }
            Expr::ScalarSubquery(subquery) => {
                if subquery.output_schema().fields.len() != 1 {
                    return Err(CompileError::MalformedPlan(format!(
                        "scalar subquery over a {} node must produce exactly one column",
                        subquery.name()
                    )));
                }
                ctx.push_scope();
                let compiled = self.compile_node(subquery, ctx);
                ctx.pop_scope();
                Ok(SqlScalar::Subquery(Box::new(compiled?)))
            }
            Expr::DistinctValue(expr) => Ok(SqlScalar::Distinct(Box::new(
                self.translate_scalar(expr, ctx)?,
            ))),
        }
    }

    /// Translate and expose the result as `AS name`. The returned node's
    /// observable name always equals the hint, so callers composing a select
    /// list never re-derive it from the expression shape.
    pub fn translate_scalar_named(
        &self,
        expr: &Expr,
        ctx: &mut TranslationContext,
        name: &str,
    ) -> Result<SqlScalar, CompileError> {
        let node = self.translate_scalar(expr, ctx)?;
        if node.output_name() == Some(name) {
            return Ok(node);
        }
        Ok(SqlScalar::Alias {
            expr: Box::new(node),
            name: name.to_string(),
        })
    }

    fn lower_case(
        &self,
        operand: Option<&Expr>,
        branches: &[(Expr, Expr)],
        default: Option<&Expr>,
        result_type: Option<DataType>,
        ctx: &mut TranslationContext,
    ) -> Result<SqlScalar, CompileError> {
        let mut whens = Vec::with_capacity(branches.len());
        for (condition, result) in branches {
            // The simple form matches its operand against branch values;
            // both forms lower to the searched shape.
            let when = match operand {
                Some(operand) => SqlScalar::Binary {
                    op: SqlBinaryOp::Eq,
                    left: Box::new(self.translate_scalar(operand, ctx)?),
                    right: Box::new(self.translate_scalar(condition, ctx)?),
                },
                None => self.translate_scalar(condition, ctx)?,
            };
            whens.push((when, self.translate_scalar(result, ctx)?));
        }
        let else_ = match (default, result_type) {
            (Some(Expr::Literal(Value::Null)), Some(t)) if t != DataType::Unknown => {
                Some(typed_null(t)?)
            }
            (Some(default), _) => Some(self.translate_scalar(default, ctx)?),
            (None, Some(t)) if t != DataType::Unknown => Some(typed_null(t)?),
            (None, _) => None,
        };
        Ok(SqlScalar::Case {
            whens,
            else_: else_.map(Box::new),
        })
    }

    fn lower_aggregate(
        &self,
        func: AggFunc,
        arg: Option<&Expr>,
        distinct: bool,
        ctx: &mut TranslationContext,
    ) -> Result<SqlScalar, CompileError> {
        let name = match func {
            AggFunc::Sum => "sum",
            AggFunc::Count | AggFunc::CountStar => "count",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        };
        match (func, arg) {
            (AggFunc::CountStar, None) => Ok(SqlScalar::Function {
                name: name.to_string(),
                args: vec![SqlScalar::Star { qualifier: None }],
                distinct: false,
            }),
            (AggFunc::CountStar, Some(_)) => Err(CompileError::UnsupportedExpression(
                "count(*) does not take an argument".to_string(),
            )),
            (_, None) => Err(CompileError::UnsupportedExpression(format!(
                "aggregate function {} requires an argument",
                name
            ))),
            (_, Some(arg)) => {
                let (arg, distinct) = match arg {
                    Expr::DistinctValue(inner) => (inner.as_ref(), true),
                    other => (other, distinct),
                };
                Ok(SqlScalar::Function {
                    name: name.to_string(),
                    args: vec![self.translate_scalar(arg, ctx)?],
                    distinct,
                })
            }
        }
    }

    fn resolve_qualifier(
        &self,
        relation: &PlanRef,
        name: &str,
        ctx: &TranslationContext,
    ) -> Result<Option<String>, CompileError> {
        match ctx.resolve_relation_column(relation, name) {
            Resolution::Unscoped => Ok(None),
            Resolution::Local(alias) | Resolution::Outer(alias) => Ok(Some(alias)),
            Resolution::Unknown => self.resolve_through(relation, name, ctx),
        }
    }

    /// Resolve a reference to an unbound node by drilling into the input
    /// that actually produces the column. References that bottom out on an
    /// unbound leaf cross a scope boundary the plan does not have.
    fn resolve_through(
        &self,
        relation: &PlanRef,
        name: &str,
        ctx: &TranslationContext,
    ) -> Result<Option<String>, CompileError> {
        match relation.as_ref() {
            RelOp::Filter { input, .. }
            | RelOp::Sort { input, .. }
            | RelOp::Limit { input, .. }
            | RelOp::Distinct { input }
            | RelOp::Exists { input, .. } => self.resolve_qualifier(input, name, ctx),
            RelOp::Project { input, items } if plain_items(items) => {
                self.resolve_qualifier(input, name, ctx)
            }
            RelOp::Aggregate {
                input, group_by, ..
            } if group_by.iter().any(|key| key.implied_name() == Some(name)) => {
                self.resolve_qualifier(input, name, ctx)
            }
            RelOp::Join {
                left, right, kind, ..
            } => {
                let in_left = left.output_schema().field(name).is_some();
                let in_right = !matches!(kind, JoinKind::Semi | JoinKind::Anti)
                    && right.output_schema().field(name).is_some();
                match (in_left, in_right) {
                    (true, true) => Err(CompileError::AmbiguousColumnReference(format!(
                        "column '{}' is produced by both sides of a join",
                        name
                    ))),
                    (true, false) => self.resolve_qualifier(left, name, ctx),
                    (false, true) => self.resolve_qualifier(right, name, ctx),
                    (false, false) => Err(CompileError::MalformedPlan(format!(
                        "column '{}' is not produced by either side of a join",
                        name
                    ))),
                }
            }
            _ => Err(CompileError::MalformedPlan(format!(
                "column '{}' references a {} scope that is not in the current ancestor chain",
                name,
                relation.name()
            ))),
        }
    }
}

// Structural booleanness, used to pick logical NOT over arithmetic negation.
fn is_boolean(expr: &Expr) -> bool {
    match expr {
        Expr::Binary { op, .. } => matches!(
            op,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Like
        ),
        Expr::Unary {
            op: UnaryOp::Not, ..
        }
        | Expr::Between { .. }
        | Expr::IsNull { .. }
        | Expr::InList { .. }
        | Expr::InSubquery { .. } => true,
        Expr::Literal(Value::Bool(_)) => true,
        _ => false,
    }
}

/// An untyped NULL branch with a known result type lowers to a typed cast.
fn typed_null(data_type: DataType) -> Result<SqlScalar, CompileError> {
    Ok(SqlScalar::Cast {
        expr: Box::new(SqlScalar::Literal(SqlLiteral::Null)),
        type_tag: to_native(&data_type)?.to_string(),
    })
}

fn lower_literal(value: &Value) -> SqlLiteral {
    match value {
        Value::Null => SqlLiteral::Null,
        Value::Bool(v) => SqlLiteral::Bool(*v),
        Value::Int(v) => SqlLiteral::Int(*v),
        Value::Float(v) => SqlLiteral::Float(*v),
        Value::String(v) => SqlLiteral::String(v.clone()),
        Value::Timestamp(v) => SqlLiteral::Timestamp(v.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

fn lower_binary_op(op: BinaryOp) -> SqlBinaryOp {
    match op {
        BinaryOp::Add => SqlBinaryOp::Add,
        BinaryOp::Sub => SqlBinaryOp::Sub,
        BinaryOp::Mul => SqlBinaryOp::Mul,
        BinaryOp::Div => SqlBinaryOp::Div,
        BinaryOp::Mod => SqlBinaryOp::Mod,
        BinaryOp::Eq => SqlBinaryOp::Eq,
        BinaryOp::Ne => SqlBinaryOp::Ne,
        BinaryOp::Lt => SqlBinaryOp::Lt,
        BinaryOp::Le => SqlBinaryOp::Le,
        BinaryOp::Gt => SqlBinaryOp::Gt,
        BinaryOp::Ge => SqlBinaryOp::Ge,
        BinaryOp::And => SqlBinaryOp::And,
        BinaryOp::Or => SqlBinaryOp::Or,
        BinaryOp::Like => SqlBinaryOp::Like,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relq_plan::{col, field, lit, RelOp, Schema};

    fn translate_text(expr: &Expr) -> String {
        let mut ctx = TranslationContext::new();
        translate(expr, &mut ctx)
            .expect("translation should succeed")
            .to_sql()
    }

    #[test]
    fn test_comparisons() {
        let cases = [
            (field("double_col").ge(lit(5)), "double_col >= 5"),
            (field("double_col").gt(lit(5)), "double_col > 5"),
            (field("double_col").lt(lit(5)), "double_col < 5"),
            (field("double_col").le(lit(5)), "double_col <= 5"),
            (field("double_col").eq(lit(5)), "double_col = 5"),
            (field("double_col").ne(lit(5)), "double_col <> 5"),
        ];
        for (expr, expected) in cases {
            assert_eq!(translate_text(&expr), expected);
        }
    }

    #[test]
    fn test_boolean_conjunction() {
        let d = || field("double_col");
        let cases = [
            (
                d().gt(lit(0)).and(d().lt(lit(5))),
                "double_col > 0 AND double_col < 5",
            ),
            (
                d().lt(lit(0)).or(d().gt(lit(5))),
                "double_col < 0 OR double_col > 5",
            ),
        ];
        for (expr, expected) in cases {
            assert_eq!(translate_text(&expr), expected);
        }
    }

    #[test]
    fn test_between_is_ternary() {
        let expr = field("double_col").between(lit(5), lit(10));
        assert_eq!(translate_text(&expr), "double_col BETWEEN 5 AND 10");
    }

    #[test]
    fn test_isnull_notnull() {
        assert_eq!(
            translate_text(&field("double_col").is_null()),
            "double_col IS NULL"
        );
        assert_eq!(
            translate_text(&field("double_col").not_null()),
            "double_col IS NOT NULL"
        );
    }

    #[test]
    fn test_negate_boolean_is_logical_not() {
        let expr = field("double_col").gt(lit(0)).neg();
        assert_eq!(translate_text(&expr), "NOT (double_col > 0)");

        let expr = field("double_col").neg();
        assert_eq!(translate_text(&expr), "-double_col");
    }

    #[test]
    fn test_coalesce_preserves_argument_order() {
        let conditional = Expr::searched_case(
            vec![(field("double_col").gt(lit(30)), field("double_col"))],
            Some(Expr::Literal(Value::Null)),
            None,
        );
        let expr = Expr::coalesce(vec![
            conditional,
            Expr::Literal(Value::Null),
            field("float_col"),
        ]);
        assert_eq!(
            translate_text(&expr),
            "COALESCE(CASE WHEN double_col > 30 THEN double_col ELSE NULL END, NULL, float_col)"
        );
    }

    #[test]
    fn test_named_expr() {
        let mut ctx = TranslationContext::new();
        let expr = field("double_col").mul(lit(2));
        let node = translate_named(&expr, &mut ctx, "foo").unwrap();
        assert_eq!(node.output_name(), Some("foo"));
        assert_eq!(node.to_sql(), "double_col * 2 AS foo");

        // A column already exposing the hint's name is not re-aliased.
        let node = translate_named(&field("double_col"), &mut ctx, "double_col").unwrap();
        assert_eq!(node.to_sql(), "double_col");
    }

    #[test]
    fn test_simple_case_lowers_to_searched_form() {
        let expr = Expr::simple_case(
            field("g"),
            vec![(lit("foo"), lit("bar")), (lit("baz"), lit("qux"))],
            Some(lit("default")),
        );
        assert_eq!(
            translate_text(&expr),
            "CASE WHEN g = 'foo' THEN 'bar' WHEN g = 'baz' THEN 'qux' ELSE 'default' END"
        );
    }

    #[test]
    fn test_searched_case_types_missing_default() {
        let expr = Expr::searched_case(
            vec![
                (field("f").gt(lit(0)), field("d").mul(lit(2))),
                (field("c").lt(lit(0)), field("a").mul(lit(2))),
            ],
            None,
            Some(DataType::Int64),
        );
        assert_eq!(
            translate_text(&expr),
            "CASE WHEN f > 0 THEN d * 2 WHEN c < 0 THEN a * 2 ELSE CAST(NULL AS BIGINT) END"
        );
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(translate_text(&field("f").sum()), "sum(f)");
        assert_eq!(translate_text(&Expr::count_star()), "count(*)");
        assert_eq!(
            translate_text(&field("int_col").count_distinct()),
            "count(DISTINCT int_col)"
        );
    }

    #[test]
    fn test_aggregate_requires_argument() {
        let expr = Expr::Aggregate {
            func: AggFunc::Sum,
            arg: None,
            distinct: false,
        };
        let mut ctx = TranslationContext::new();
        assert!(matches!(
            translate(&expr, &mut ctx),
            Err(CompileError::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_in_list() {
        let expr = field("g").in_list(vec![lit("a"), lit("b")]);
        assert_eq!(translate_text(&expr), "g IN ('a', 'b')");
    }

    #[test]
    fn test_timestamp_literal() {
        let ts = chrono::NaiveDate::from_ymd_opt(2015, 1, 1)
            .unwrap()
            .and_hms_opt(12, 34, 56)
            .unwrap();
        assert_eq!(translate_text(&lit(ts)), "TIMESTAMP '2015-01-01 12:34:56'");
    }

    #[test]
    fn test_scoped_reference_is_qualified() {
        let scan = RelOp::scan(
            "functional_alltypes",
            Schema::of(&[("double_col", DataType::Float64)]),
        );
        let mut ctx = TranslationContext::new();
        ctx.push_scope();
        let member = ctx.add_member("t0".to_string(), scan.output_schema());
        ctx.bind_node(&scan, member);

        let node = translate(&col(&scan, "double_col").gt(lit(0)), &mut ctx).unwrap();
        assert_eq!(node.to_sql(), "t0.double_col > 0");
    }

    #[test]
    fn test_unknown_column_is_malformed() {
        let scan = RelOp::scan("t", Schema::of(&[("a", DataType::Int64)]));
        let mut ctx = TranslationContext::new();
        assert!(matches!(
            translate(&col(&scan, "nope"), &mut ctx),
            Err(CompileError::MalformedPlan(_))
        ));
    }
}
