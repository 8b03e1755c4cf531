//! Rendering of statement trees to literal SQL text
//!
//! Single-line output with deterministic spacing. The compiler's contract
//! ends at a structurally correct tree; this printer exists so callers (and
//! tests) can observe the statement as SQL.

use crate::{Cte, Join, OrderByExpr, Select, SqlLiteral, SqlScalar, TableExpr};

/// Accumulator for SQL text.
pub struct Sql {
    text: String,
}

impl Sql {
    pub fn new() -> Self {
        Self {
            text: String::new(),
        }
    }

    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl Default for Sql {
    fn default() -> Self {
        Self::new()
    }
}

impl Select {
    /// Render the statement as literal SQL text.
    pub fn to_sql(&self) -> String {
        let mut sql = Sql::new();
        write_select(self, &mut sql);
        sql.into_text()
    }
}

impl SqlScalar {
    pub fn to_sql(&self) -> String {
        let mut sql = Sql::new();
        write_scalar(self, &mut sql);
        sql.into_text()
    }
}

fn write_select(select: &Select, out: &mut Sql) {
    if !select.with.is_empty() {
        out.push("WITH ");
        for (i, cte) in select.with.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            write_cte(cte, out);
        }
        out.push(" ");
    }

    out.push("SELECT ");
    if select.distinct {
        out.push("DISTINCT ");
    }
    if select.projections.is_empty() {
        out.push("*");
    } else {
        for (i, item) in select.projections.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            write_scalar(item, out);
        }
    }

    if let Some(from) = &select.from {
        out.push(" FROM ");
        write_table_expr(from, out);
    }
    for join in &select.joins {
        write_join(join, out);
    }

    if let Some(where_clause) = &select.where_clause {
        out.push(" WHERE ");
        write_scalar(where_clause, out);
    }

    if !select.group_by.is_empty() {
        out.push(" GROUP BY ");
        for (i, key) in select.group_by.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            write_scalar(key, out);
        }
    }

    if let Some(having) = &select.having {
        out.push(" HAVING ");
        write_scalar(having, out);
    }

    if !select.order_by.is_empty() {
        out.push(" ORDER BY ");
        for (i, key) in select.order_by.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            write_order_key(key, out);
        }
    }

    if let Some(limit) = select.limit {
        out.push(" LIMIT ");
        out.push(&limit.to_string());
    }
    if let Some(offset) = select.offset {
        out.push(" OFFSET ");
        out.push(&offset.to_string());
    }
}

fn write_cte(cte: &Cte, out: &mut Sql) {
    out.push(&cte.name);
    out.push(" AS (");
    write_select(&cte.select, out);
    out.push(")");
}

fn write_table_expr(table: &TableExpr, out: &mut Sql) {
    match table {
        TableExpr::Table { name, alias } => {
            out.push(name);
            out.push(" AS ");
            out.push(alias);
        }
        TableExpr::Subquery { select, alias } => {
            out.push("(");
            write_select(select, out);
            out.push(") AS ");
            out.push(alias);
        }
        TableExpr::CteRef { name, alias } => {
            out.push(name);
            if let Some(alias) = alias {
                out.push(" AS ");
                out.push(alias);
            }
        }
    }
}

fn write_join(join: &Join, out: &mut Sql) {
    out.push(" ");
    out.push(join.kind.keyword());
    out.push(" ");
    write_table_expr(&join.relation, out);
    out.push(" ON ");
    write_scalar(&join.on, out);
}

fn write_order_key(key: &OrderByExpr, out: &mut Sql) {
    write_scalar(&key.expr, out);
    if key.desc {
        out.push(" DESC");
    }
}

// Binding strengths used to decide parenthesization; atoms bind tightest.
fn precedence(scalar: &SqlScalar) -> u8 {
    match scalar {
        SqlScalar::Binary { op, .. } => op.precedence(),
        SqlScalar::Not(_) => 3,
        SqlScalar::Between { .. }
        | SqlScalar::IsNull { .. }
        | SqlScalar::InList { .. }
        | SqlScalar::InSubquery { .. } => 4,
        SqlScalar::Negative(_) => 7,
        _ => 8,
    }
}

fn write_operand(operand: &SqlScalar, min_precedence: u8, out: &mut Sql) {
    if precedence(operand) < min_precedence {
        out.push("(");
        write_scalar(operand, out);
        out.push(")");
    } else {
        write_scalar(operand, out);
    }
}

fn write_scalar(scalar: &SqlScalar, out: &mut Sql) {
    match scalar {
        SqlScalar::Column { qualifier, name } => {
            if let Some(qualifier) = qualifier {
                out.push(qualifier);
                out.push(".");
            }
            out.push(name);
        }
        SqlScalar::Star { qualifier } => {
            if let Some(qualifier) = qualifier {
                out.push(qualifier);
                out.push(".");
            }
            out.push("*");
        }
        SqlScalar::Literal(literal) => write_literal(literal, out),
        SqlScalar::Binary { op, left, right } => {
            let prec = op.precedence();
            write_operand(left, prec, out);
            out.push(" ");
            out.push(op.symbol());
            out.push(" ");
            // Right operands of non-associative arithmetic need parens at
            // equal precedence: a - (b - c).
            let right_min = match op {
                crate::SqlBinaryOp::Sub | crate::SqlBinaryOp::Div | crate::SqlBinaryOp::Mod => {
                    prec + 1
                }
                _ => prec,
            };
            write_operand(right, right_min, out);
        }
        SqlScalar::Not(expr) => {
            out.push("NOT ");
            write_operand(expr, 8, out);
        }
        SqlScalar::Negative(expr) => {
            out.push("-");
            write_operand(expr, 8, out);
        }
        SqlScalar::Between { expr, low, high } => {
            write_operand(expr, 5, out);
            out.push(" BETWEEN ");
            write_operand(low, 5, out);
            out.push(" AND ");
            write_operand(high, 5, out);
        }
        SqlScalar::IsNull { expr, negated } => {
            write_operand(expr, 5, out);
            out.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
        SqlScalar::Case { whens, else_ } => {
            out.push("CASE");
            for (when, then) in whens {
                out.push(" WHEN ");
                write_scalar(when, out);
                out.push(" THEN ");
                write_scalar(then, out);
            }
            if let Some(else_) = else_ {
                out.push(" ELSE ");
                write_scalar(else_, out);
            }
            out.push(" END");
        }
        SqlScalar::Coalesce(args) => {
            out.push("COALESCE(");
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push(", ");
                }
                write_scalar(arg, out);
            }
            out.push(")");
        }
        SqlScalar::Function {
            name,
            args,
            distinct,
        } => {
            out.push(name);
            out.push("(");
            if *distinct {
                out.push("DISTINCT ");
            }
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push(", ");
                }
                write_scalar(arg, out);
            }
            out.push(")");
        }
        SqlScalar::Cast { expr, type_tag } => {
            out.push("CAST(");
            write_scalar(expr, out);
            out.push(" AS ");
            out.push(type_tag);
            out.push(")");
        }
        SqlScalar::Alias { expr, name } => {
            write_scalar(expr, out);
            out.push(" AS ");
            out.push(name);
        }
        SqlScalar::Distinct(expr) => {
            out.push("DISTINCT ");
            write_scalar(expr, out);
        }
        SqlScalar::InList {
            expr,
            list,
            negated,
        } => {
            write_operand(expr, 5, out);
            out.push(if *negated { " NOT IN (" } else { " IN (" });
            for (i, item) in list.iter().enumerate() {
                if i > 0 {
                    out.push(", ");
                }
                write_scalar(item, out);
            }
            out.push(")");
        }
        SqlScalar::InSubquery {
            expr,
            select,
            negated,
        } => {
            write_operand(expr, 5, out);
            out.push(if *negated { " NOT IN (" } else { " IN (" });
            write_select(select, out);
            out.push(")");
        }
        SqlScalar::Exists { select, negated } => {
            out.push(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
            write_select(select, out);
            out.push(")");
        }
        SqlScalar::Subquery(select) => {
            out.push("(");
            write_select(select, out);
            out.push(")");
        }
    }
}

fn write_literal(literal: &SqlLiteral, out: &mut Sql) {
    match literal {
        SqlLiteral::Null => out.push("NULL"),
        SqlLiteral::Bool(true) => out.push("TRUE"),
        SqlLiteral::Bool(false) => out.push("FALSE"),
        SqlLiteral::Int(v) => out.push(&v.to_string()),
        SqlLiteral::Float(v) => {
            if v.is_finite() && v.fract() == 0.0 {
                out.push(&format!("{:.1}", v));
            } else {
                out.push(&v.to_string());
            }
        }
        SqlLiteral::String(v) => {
            out.push("'");
            out.push(&v.replace('\'', "''"));
            out.push("'");
        }
        SqlLiteral::Timestamp(v) => {
            out.push("TIMESTAMP '");
            out.push(v);
            out.push("'");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqlBinaryOp;

    fn column(qualifier: &str, name: &str) -> SqlScalar {
        SqlScalar::Column {
            qualifier: Some(qualifier.to_string()),
            name: name.to_string(),
        }
    }

    fn int(v: i64) -> SqlScalar {
        SqlScalar::Literal(SqlLiteral::Int(v))
    }

    fn binary(op: SqlBinaryOp, left: SqlScalar, right: SqlScalar) -> SqlScalar {
        SqlScalar::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn test_select_star_from_table() {
        let select = Select {
            from: Some(TableExpr::Table {
                name: "star1".to_string(),
                alias: "t0".to_string(),
            }),
            ..Select::new()
        };

        assert_eq!(select.to_sql(), "SELECT * FROM star1 AS t0");
    }

    #[test]
    fn test_where_and_limit_offset() {
        let select = Select {
            from: Some(TableExpr::Table {
                name: "t".to_string(),
                alias: "t0".to_string(),
            }),
            where_clause: Some(binary(SqlBinaryOp::Gt, column("t0", "f"), int(0))),
            limit: Some(10),
            offset: Some(5),
            ..Select::new()
        };

        assert_eq!(
            select.to_sql(),
            "SELECT * FROM t AS t0 WHERE t0.f > 0 LIMIT 10 OFFSET 5"
        );
    }

    #[test]
    fn test_conjunction_renders_flat() {
        let conj = binary(
            SqlBinaryOp::And,
            binary(SqlBinaryOp::Gt, column("t0", "f"), int(0)),
            binary(
                SqlBinaryOp::Lt,
                column("t0", "c"),
                binary(SqlBinaryOp::Mul, column("t0", "f"), int(2)),
            ),
        );

        assert_eq!(conj.to_sql(), "t0.f > 0 AND t0.c < t0.f * 2");
    }

    #[test]
    fn test_disjunction_inside_conjunction_is_parenthesized() {
        let or = binary(
            SqlBinaryOp::Or,
            binary(SqlBinaryOp::Lt, column("t0", "f"), int(0)),
            binary(SqlBinaryOp::Gt, column("t0", "f"), int(5)),
        );
        let and = binary(
            SqlBinaryOp::And,
            or,
            binary(SqlBinaryOp::Eq, column("t0", "g"), int(1)),
        );

        assert_eq!(
            and.to_sql(),
            "(t0.f < 0 OR t0.f > 5) AND t0.g = 1"
        );
    }

    #[test]
    fn test_not_parenthesizes_comparisons() {
        let not = SqlScalar::Not(Box::new(binary(
            SqlBinaryOp::Gt,
            column("t0", "double_col"),
            int(0),
        )));

        assert_eq!(not.to_sql(), "NOT (t0.double_col > 0)");
    }

    #[test]
    fn test_full_outer_join_keyword() {
        let select = Select {
            from: Some(TableExpr::Table {
                name: "a".to_string(),
                alias: "t0".to_string(),
            }),
            joins: vec![Join {
                kind: crate::JoinOp::FullOuter,
                relation: TableExpr::Table {
                    name: "b".to_string(),
                    alias: "t1".to_string(),
                },
                on: binary(SqlBinaryOp::Eq, column("t0", "k"), column("t1", "k")),
            }],
            ..Select::new()
        };

        assert_eq!(
            select.to_sql(),
            "SELECT * FROM a AS t0 FULL OUTER JOIN b AS t1 ON t0.k = t1.k"
        );
    }

    #[test]
    fn test_with_prefix_and_bare_cte_reference() {
        let body = Select {
            from: Some(TableExpr::Table {
                name: "alltypes".to_string(),
                alias: "t2".to_string(),
            }),
            projections: vec![column("t2", "g")],
            ..Select::new()
        };
        let select = Select {
            with: vec![Cte {
                name: "t0".to_string(),
                select: body,
            }],
            from: Some(TableExpr::CteRef {
                name: "t0".to_string(),
                alias: None,
            }),
            joins: vec![Join {
                kind: crate::JoinOp::Inner,
                relation: TableExpr::CteRef {
                    name: "t0".to_string(),
                    alias: Some("t1".to_string()),
                },
                on: binary(SqlBinaryOp::Eq, column("t0", "g"), column("t1", "g")),
            }],
            ..Select::new()
        };

        assert_eq!(
            select.to_sql(),
            "WITH t0 AS (SELECT t2.g FROM alltypes AS t2) \
             SELECT * FROM t0 JOIN t0 AS t1 ON t0.g = t1.g"
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(SqlScalar::Literal(SqlLiteral::Null).to_sql(), "NULL");
        assert_eq!(SqlScalar::Literal(SqlLiteral::Bool(true)).to_sql(), "TRUE");
        assert_eq!(SqlScalar::Literal(SqlLiteral::Float(5.0)).to_sql(), "5.0");
        assert_eq!(SqlScalar::Literal(SqlLiteral::Float(2.5)).to_sql(), "2.5");
        assert_eq!(
            SqlScalar::Literal(SqlLiteral::String("it's".to_string())).to_sql(),
            "'it''s'"
        );
        assert_eq!(
            SqlScalar::Literal(SqlLiteral::Timestamp("2015-01-01 12:34:56".to_string()))
                .to_sql(),
            "TIMESTAMP '2015-01-01 12:34:56'"
        );
    }

    #[test]
    fn test_count_distinct_function() {
        let call = SqlScalar::Function {
            name: "count".to_string(),
            args: vec![column("t0", "int_col")],
            distinct: true,
        };

        assert_eq!(call.to_sql(), "count(DISTINCT t0.int_col)");
    }
}
