//! SQL statement tree types
//!
//! All types are deterministically serializable; `Select::fingerprint` hashes
//! the canonical JSON of an alias-normalized clone, so two structurally
//! identical statements fingerprint identically even when their alias
//! numbering differs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A `SELECT` statement with ordered clauses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Select {
    /// Common table expressions, rendered as a `WITH` prefix.
    pub with: Vec<Cte>,
    pub distinct: bool,
    /// Empty renders as `*`.
    pub projections: Vec<SqlScalar>,
    pub from: Option<TableExpr>,
    pub joins: Vec<Join>,
    pub where_clause: Option<SqlScalar>,
    pub group_by: Vec<SqlScalar>,
    pub having: Option<SqlScalar>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cte {
    pub name: String,
    pub select: Select,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableExpr {
    Table {
        name: String,
        alias: String,
    },
    Subquery {
        select: Box<Select>,
        alias: String,
    },
    /// Reference to a CTE by name; `alias: None` renders as the bare name.
    CteRef {
        name: String,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinOp,
    pub relation: TableExpr,
    pub on: SqlScalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinOp {
    Inner,
    LeftOuter,
    FullOuter,
}

impl JoinOp {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinOp::Inner => "JOIN",
            JoinOp::LeftOuter => "LEFT OUTER JOIN",
            JoinOp::FullOuter => "FULL OUTER JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByExpr {
    pub expr: SqlScalar,
    pub desc: bool,
}

/// Scalar SQL node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlScalar {
    Column {
        qualifier: Option<String>,
        name: String,
    },
    Star {
        qualifier: Option<String>,
    },
    Literal(SqlLiteral),
    Binary {
        op: SqlBinaryOp,
        left: Box<SqlScalar>,
        right: Box<SqlScalar>,
    },
    Not(Box<SqlScalar>),
    Negative(Box<SqlScalar>),
    Between {
        expr: Box<SqlScalar>,
        low: Box<SqlScalar>,
        high: Box<SqlScalar>,
    },
    IsNull {
        expr: Box<SqlScalar>,
        negated: bool,
    },
    /// Searched case only; simple case is lowered before it gets here.
    Case {
        whens: Vec<(SqlScalar, SqlScalar)>,
        else_: Option<Box<SqlScalar>>,
    },
    Coalesce(Vec<SqlScalar>),
    Function {
        name: String,
        args: Vec<SqlScalar>,
        distinct: bool,
    },
    Cast {
        expr: Box<SqlScalar>,
        type_tag: String,
    },
    Alias {
        expr: Box<SqlScalar>,
        name: String,
    },
    /// Column-level `DISTINCT expr` in a select list.
    Distinct(Box<SqlScalar>),
    InList {
        expr: Box<SqlScalar>,
        list: Vec<SqlScalar>,
        negated: bool,
    },
    InSubquery {
        expr: Box<SqlScalar>,
        select: Box<Select>,
        negated: bool,
    },
    Exists {
        select: Box<Select>,
        negated: bool,
    },
    Subquery(Box<Select>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlLiteral {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Preformatted `YYYY-MM-DD HH:MM:SS` text.
    Timestamp(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlBinaryOp {
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

impl SqlBinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            SqlBinaryOp::Add => "+",
            SqlBinaryOp::Sub => "-",
            SqlBinaryOp::Mul => "*",
            SqlBinaryOp::Div => "/",
            SqlBinaryOp::Mod => "%",
            SqlBinaryOp::Eq => "=",
            SqlBinaryOp::Ne => "<>",
            SqlBinaryOp::Lt => "<",
            SqlBinaryOp::Le => "<=",
            SqlBinaryOp::Gt => ">",
            SqlBinaryOp::Ge => ">=",
            SqlBinaryOp::And => "AND",
            SqlBinaryOp::Or => "OR",
            SqlBinaryOp::Like => "LIKE",
        }
    }

    pub fn precedence(&self) -> u8 {
        match self {
            SqlBinaryOp::Or => 1,
            SqlBinaryOp::And => 2,
            SqlBinaryOp::Eq
            | SqlBinaryOp::Ne
            | SqlBinaryOp::Lt
            | SqlBinaryOp::Le
            | SqlBinaryOp::Gt
            | SqlBinaryOp::Ge
            | SqlBinaryOp::Like => 4,
            SqlBinaryOp::Add | SqlBinaryOp::Sub => 5,
            SqlBinaryOp::Mul | SqlBinaryOp::Div | SqlBinaryOp::Mod => 6,
        }
    }
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical structural fingerprint (SHA-256) for CTE deduplication.
    pub fn fingerprint(&self) -> String {
        let normalized = self.normalized();
        let json =
            serde_json::to_string(&normalized).expect("statement trees should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Clone with every alias defined inside the statement renamed to a
    /// canonical `s0, s1, ...` sequence in definition order. Qualifiers
    /// referencing aliases defined elsewhere (correlated references) are
    /// left untouched.
    pub fn normalized(&self) -> Select {
        let mut order: Vec<String> = Vec::new();
        collect_aliases(self, &mut order);

        let mut map: HashMap<String, String> = HashMap::new();
        for alias in order {
            if !map.contains_key(&alias) {
                let canonical = format!("s{}", map.len());
                map.insert(alias, canonical);
            }
        }

        let mut copy = self.clone();
        rename_select(&mut copy, &map);
        copy
    }
}

impl SqlScalar {
    /// The name this node exposes in a select list, if any.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            SqlScalar::Alias { name, .. } => Some(name),
            SqlScalar::Column { name, .. } => Some(name),
            SqlScalar::Distinct(expr) => expr.output_name(),
            _ => None,
        }
    }
}

fn collect_aliases(select: &Select, out: &mut Vec<String>) {
    for cte in &select.with {
        collect_aliases(&cte.select, out);
    }

    let members: Vec<&TableExpr> = select
        .from
        .iter()
        .chain(select.joins.iter().map(|j| &j.relation))
        .collect();

    for member in &members {
        match member {
            TableExpr::Table { alias, .. } | TableExpr::Subquery { alias, .. } => {
                out.push(alias.clone())
            }
            TableExpr::CteRef {
                alias: Some(alias), ..
            } => out.push(alias.clone()),
            TableExpr::CteRef { alias: None, .. } => {}
        }
    }
    for member in &members {
        if let TableExpr::Subquery { select, .. } = member {
            collect_aliases(select, out);
        }
    }

    for scalar in scalar_clauses(select) {
        collect_scalar_aliases(scalar, out);
    }
}

fn scalar_clauses(select: &Select) -> Vec<&SqlScalar> {
    let mut out: Vec<&SqlScalar> = Vec::new();
    out.extend(select.projections.iter());
    out.extend(select.joins.iter().map(|j| &j.on));
    out.extend(select.where_clause.iter());
    out.extend(select.group_by.iter());
    out.extend(select.having.iter());
    out.extend(select.order_by.iter().map(|k| &k.expr));
    out
}

fn collect_scalar_aliases(scalar: &SqlScalar, out: &mut Vec<String>) {
    match scalar {
        SqlScalar::Column { .. } | SqlScalar::Star { .. } | SqlScalar::Literal(_) => {}
        SqlScalar::Binary { left, right, .. } => {
            collect_scalar_aliases(left, out);
            collect_scalar_aliases(right, out);
        }
        SqlScalar::Not(expr)
        | SqlScalar::Negative(expr)
        | SqlScalar::Cast { expr, .. }
        | SqlScalar::Alias { expr, .. }
        | SqlScalar::Distinct(expr)
        | SqlScalar::IsNull { expr, .. } => collect_scalar_aliases(expr, out),
        SqlScalar::Between { expr, low, high } => {
            collect_scalar_aliases(expr, out);
            collect_scalar_aliases(low, out);
            collect_scalar_aliases(high, out);
        }
        SqlScalar::Case { whens, else_ } => {
            for (when, then) in whens {
                collect_scalar_aliases(when, out);
                collect_scalar_aliases(then, out);
            }
            if let Some(else_) = else_ {
                collect_scalar_aliases(else_, out);
            }
        }
        SqlScalar::Coalesce(args) => {
            for arg in args {
                collect_scalar_aliases(arg, out);
            }
        }
        SqlScalar::Function { args, .. } => {
            for arg in args {
                collect_scalar_aliases(arg, out);
            }
        }
        SqlScalar::InList { expr, list, .. } => {
            collect_scalar_aliases(expr, out);
            for item in list {
                collect_scalar_aliases(item, out);
            }
        }
        SqlScalar::InSubquery { expr, select, .. } => {
            collect_scalar_aliases(expr, out);
            collect_aliases(select, out);
        }
        SqlScalar::Exists { select, .. } => collect_aliases(select, out),
        SqlScalar::Subquery(select) => collect_aliases(select, out),
    }
}

fn rename_select(select: &mut Select, map: &HashMap<String, String>) {
    for cte in &mut select.with {
        rename_select(&mut cte.select, map);
    }

    for member in select
        .from
        .iter_mut()
        .chain(select.joins.iter_mut().map(|j| &mut j.relation))
    {
        match member {
            TableExpr::Table { alias, .. } => rename_alias(alias, map),
            TableExpr::Subquery { select, alias } => {
                rename_alias(alias, map);
                rename_select(select, map);
            }
            TableExpr::CteRef { alias, .. } => {
                if let Some(alias) = alias {
                    rename_alias(alias, map);
                }
            }
        }
    }

    for scalar in scalar_clauses_mut(select) {
        rename_scalar(scalar, map);
    }
}

fn scalar_clauses_mut(select: &mut Select) -> Vec<&mut SqlScalar> {
    let mut out: Vec<&mut SqlScalar> = Vec::new();
    out.extend(select.projections.iter_mut());
    out.extend(select.joins.iter_mut().map(|j| &mut j.on));
    out.extend(select.where_clause.iter_mut());
    out.extend(select.group_by.iter_mut());
    out.extend(select.having.iter_mut());
    out.extend(select.order_by.iter_mut().map(|k| &mut k.expr));
    out
}

fn rename_alias(alias: &mut String, map: &HashMap<String, String>) {
    if let Some(canonical) = map.get(alias) {
        *alias = canonical.clone();
    }
}

fn rename_scalar(scalar: &mut SqlScalar, map: &HashMap<String, String>) {
    match scalar {
        SqlScalar::Column {
            qualifier: Some(qualifier),
            ..
        }
        | SqlScalar::Star {
            qualifier: Some(qualifier),
        } => rename_alias(qualifier, map),
        SqlScalar::Column { qualifier: None, .. }
        | SqlScalar::Star { qualifier: None }
        | SqlScalar::Literal(_) => {}
        SqlScalar::Binary { left, right, .. } => {
            rename_scalar(left, map);
            rename_scalar(right, map);
        }
        SqlScalar::Not(expr)
        | SqlScalar::Negative(expr)
        | SqlScalar::Cast { expr, .. }
        | SqlScalar::Alias { expr, .. }
        | SqlScalar::Distinct(expr)
        | SqlScalar::IsNull { expr, .. } => rename_scalar(expr, map),
        SqlScalar::Between { expr, low, high } => {
            rename_scalar(expr, map);
            rename_scalar(low, map);
            rename_scalar(high, map);
        }
        SqlScalar::Case { whens, else_ } => {
            for (when, then) in whens {
                rename_scalar(when, map);
                rename_scalar(then, map);
            }
            if let Some(else_) = else_ {
                rename_scalar(else_, map);
            }
        }
        SqlScalar::Coalesce(args) => {
            for arg in args {
                rename_scalar(arg, map);
            }
        }
        SqlScalar::Function { args, .. } => {
            for arg in args {
                rename_scalar(arg, map);
            }
        }
        SqlScalar::InList { expr, list, .. } => {
            rename_scalar(expr, map);
            for item in list {
                rename_scalar(item, map);
            }
        }
        SqlScalar::InSubquery { expr, select, .. } => {
            rename_scalar(expr, map);
            rename_select(select, map);
        }
        SqlScalar::Exists { select, .. } => rename_select(select, map),
        SqlScalar::Subquery(select) => rename_select(select, map),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(table: &str, alias: &str) -> Select {
        Select {
            from: Some(TableExpr::Table {
                name: table.to_string(),
                alias: alias.to_string(),
            }),
            ..Select::new()
        }
    }

    fn qualified(alias: &str, name: &str) -> SqlScalar {
        SqlScalar::Column {
            qualifier: Some(alias.to_string()),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_alias_numbering() {
        let mut a = scan("alltypes", "t2");
        a.projections = vec![qualified("t2", "g")];
        a.group_by = vec![qualified("t2", "g")];

        let mut b = scan("alltypes", "t3");
        b.projections = vec![qualified("t3", "g")];
        b.group_by = vec![qualified("t3", "g")];

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_structure() {
        let a = scan("alltypes", "t0");
        let mut b = scan("alltypes", "t0");
        b.where_clause = Some(qualified("t0", "g"));

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), scan("other", "t0").fingerprint());
    }

    #[test]
    fn test_fingerprint_keeps_correlated_qualifiers() {
        // A qualifier not defined inside the statement must survive
        // normalization, so correlated bodies only match other bodies
        // correlated against the same outer alias.
        let mut a = scan("foo", "t1");
        a.where_clause = Some(SqlScalar::Binary {
            op: SqlBinaryOp::Eq,
            left: Box::new(qualified("t0", "dept_id")),
            right: Box::new(qualified("t1", "dept_id")),
        });

        let normalized = a.normalized();
        match normalized.where_clause.unwrap() {
            SqlScalar::Binary { left, .. } => match *left {
                SqlScalar::Column { qualifier, .. } => {
                    assert_eq!(qualifier.as_deref(), Some("t0"))
                }
                other => panic!("unexpected node: {:?}", other),
            },
            other => panic!("unexpected node: {:?}", other),
        }
    }

    #[test]
    fn test_determinism() {
        let mut a = scan("star1", "t0");
        a.where_clause = Some(qualified("t0", "f"));

        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }
}
