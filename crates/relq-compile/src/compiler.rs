//! Query compilation
//!
//! Recursive lowering of relational operator trees into SQL statement
//! trees. The walk is top-down but statements build bottom-up: each child
//! produces a fragment the parent either fuses into or wraps as an aliased
//! subquery. Wrapper aliases are assigned before their bodies compile, so
//! the outermost statement always carries the earliest alias.

use std::collections::HashMap;
use std::sync::Arc;

use relq_plan::{Expr, JoinKind, PlanRef, ProjectItem, RelOp, Schema, SortKey};
use relq_sql::{Join, JoinOp, OrderByExpr, Select, SqlBinaryOp, SqlLiteral, SqlScalar, TableExpr};
use tracing::{debug, trace};

use crate::{CompileError, CompilerConfig, Resolution, TranslationContext};

/// Lowers logical plans into SQL statement trees.
pub struct QueryCompiler {
    config: CompilerConfig,
}

impl Default for QueryCompiler {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

/// Compile a plan with the default configuration.
pub fn compile(plan: &PlanRef) -> Result<Select, CompileError> {
    QueryCompiler::default().compile(plan)
}

impl QueryCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile a plan from a fresh context. The plan itself is never
    /// mutated, so independent compilations can run concurrently as long as
    /// each uses its own context.
    pub fn compile(&self, plan: &PlanRef) -> Result<Select, CompileError> {
        let mut ctx = TranslationContext::new();
        self.compile_with(plan, &mut ctx)
    }

    /// Compile a plan against caller-provided translation state, factoring
    /// duplicate subplans into shared CTEs before returning.
    pub fn compile_with(
        &self,
        plan: &PlanRef,
        ctx: &mut TranslationContext,
    ) -> Result<Select, CompileError> {
        debug!(root = plan.name(), "compiling plan");
        ctx.push_scope();
        let compiled = self.compile_node(plan, ctx);
        ctx.pop_scope();
        let mut select = compiled?;
        self.factor_ctes(&mut select, ctx);
        Ok(select)
    }

    pub(crate) fn compile_node(
        &self,
        plan: &PlanRef,
        ctx: &mut TranslationContext,
    ) -> Result<Select, CompileError> {
        trace!(op = plan.name(), "lowering operator");
        match plan.as_ref() {
            RelOp::Scan { table, schema } => Ok(Select {
                from: Some(self.scan_member(plan, table, schema, ctx)),
                ..Select::new()
            }),
            RelOp::Filter { input, predicate } => self.compile_filter(input, predicate, ctx),
            RelOp::Project { input, items } => self.compile_project(input, items, ctx),
            RelOp::Join {
                left,
                right,
                predicate,
                kind,
            } => self.compile_join(left, right, predicate, *kind, ctx),
            RelOp::Aggregate {
                input,
                group_by,
                metrics,
            } => self.compile_aggregate(input, group_by, metrics, ctx),
            RelOp::Sort { input, keys } => self.compile_sort(input, keys, ctx),
            RelOp::Limit { input, n, offset } => self.compile_limit(input, *n, *offset, ctx),
            RelOp::Distinct { input } => self.compile_distinct(input, ctx),
            RelOp::Exists {
                input,
                subquery,
                predicate,
                negated,
            } => self.compile_exists(input, subquery, predicate.as_ref(), *negated, ctx),
        }
    }

    /// Resolve or assign the alias for a base table and register it in the
    /// current scope. A binding left by an already-finished statement is
    /// reused, which keeps repeated compilations of a shared scan textually
    /// identical; a binding still active in an enclosing statement is not,
    /// since reuse there would shadow it.
    fn scan_member(
        &self,
        plan: &PlanRef,
        table: &str,
        schema: &Schema,
        ctx: &mut TranslationContext,
    ) -> TableExpr {
        let alias = match ctx.alias_for(plan) {
            Some(alias) if !ctx.alias_is_active(&alias) => alias,
            _ => {
                let alias = ctx.new_alias();
                ctx.bind_alias(plan, &alias);
                alias
            }
        };
        let member = ctx.add_member(alias.clone(), schema.clone());
        ctx.bind_node(plan, member);
        TableExpr::Table {
            name: table.to_string(),
            alias,
        }
    }

    /// Compile `input` as an aliased subquery member of the current
    /// statement. The wrapper alias is assigned before the body compiles.
    fn wrap_as_subquery(
        &self,
        input: &PlanRef,
        ctx: &mut TranslationContext,
    ) -> Result<(Select, String), CompileError> {
        let alias = ctx.new_alias();
        ctx.push_scope();
        let body = self.compile_node(input, ctx);
        ctx.pop_scope();
        let member = ctx.add_member(alias.clone(), input.output_schema());
        bind_through(ctx, input, member);
        let select = Select {
            from: Some(TableExpr::Subquery {
                select: Box::new(body?),
                alias: alias.clone(),
            }),
            ..Select::new()
        };
        Ok((select, alias))
    }

    fn compile_filter(
        &self,
        input: &PlanRef,
        predicate: &Expr,
        ctx: &mut TranslationContext,
    ) -> Result<Select, CompileError> {
        match filter_sink(input) {
            FilterSink::Where => {
                let mut select = self.compile_node(input, ctx)?;
                let predicate = self.translate_scalar(predicate, ctx)?;
                select.where_clause = Some(conjoin(select.where_clause.take(), predicate));
                Ok(select)
            }
            FilterSink::Having => {
                let mut select = self.compile_node(input, ctx)?;
                // Predicates over an aggregate's computed columns cannot
                // name select-list aliases in HAVING; the metric expression
                // is inlined instead.
                let predicate = match underlying_aggregate(input) {
                    Some(agg) => {
                        if let RelOp::Aggregate { metrics, .. } = agg.as_ref() {
                            inline_metric_refs(predicate, agg, metrics)
                        } else {
                            predicate.clone()
                        }
                    }
                    None => predicate.clone(),
                };
                let predicate = self.translate_scalar(&predicate, ctx)?;
                select.having = Some(conjoin(select.having.take(), predicate));
                Ok(select)
            }
            FilterSink::Wrap => {
                let (mut select, _alias) = self.wrap_as_subquery(input, ctx)?;
                let predicate = self.translate_scalar(predicate, ctx)?;
                select.where_clause = Some(predicate);
                Ok(select)
            }
        }
    }

    fn compile_project(
        &self,
        input: &PlanRef,
        items: &[ProjectItem],
        ctx: &mut TranslationContext,
    ) -> Result<Select, CompileError> {
        let mut select = if project_fusable(input) {
            self.compile_node(input, ctx)?
        } else {
            self.wrap_as_subquery(input, ctx)?.0
        };
        let mut projections = Vec::with_capacity(items.len());
        for item in items {
            let node = match item {
                ProjectItem::AllOf(relation) => self.all_of(relation, ctx)?,
                ProjectItem::Expr {
                    expr,
                    name: Some(name),
                } => self.translate_scalar_named(expr, ctx, name)?,
                ProjectItem::Expr { expr, name: None } => self.translate_scalar(expr, ctx)?,
            };
            projections.push(node);
        }
        select.projections = projections;
        Ok(select)
    }

    /// Star projection over one relation of the current statement.
    fn all_of(
        &self,
        relation: &PlanRef,
        ctx: &mut TranslationContext,
    ) -> Result<SqlScalar, CompileError> {
        match ctx.resolve_relation(relation) {
            Resolution::Local(alias) | Resolution::Outer(alias) => Ok(SqlScalar::Star {
                qualifier: Some(alias),
            }),
            Resolution::Unscoped => Ok(SqlScalar::Star { qualifier: None }),
            Resolution::Unknown => match relation.as_ref() {
                RelOp::Filter { input, .. }
                | RelOp::Sort { input, .. }
                | RelOp::Limit { input, .. }
                | RelOp::Distinct { input }
                | RelOp::Exists { input, .. } => self.all_of(input, ctx),
                RelOp::Project { input, items } if plain_items(items) => self.all_of(input, ctx),
                // A join spans the whole FROM chain of its statement.
                RelOp::Join { .. } => Ok(SqlScalar::Star { qualifier: None }),
                _ => Err(CompileError::MalformedPlan(format!(
                    "projection references a {} node outside the current statement",
                    relation.name()
                ))),
            },
        }
    }

    fn compile_join(
        &self,
        left: &PlanRef,
        right: &PlanRef,
        predicate: &Expr,
        kind: JoinKind,
        ctx: &mut TranslationContext,
    ) -> Result<Select, CompileError> {
        let op = match kind {
            JoinKind::Inner => JoinOp::Inner,
            JoinKind::LeftOuter => JoinOp::LeftOuter,
            // A logical outer join is always a full outer join.
            JoinKind::FullOuter => JoinOp::FullOuter,
            JoinKind::Semi | JoinKind::Anti => {
                let negated = matches!(kind, JoinKind::Anti);
                return self.compile_exists(left, right, Some(predicate), negated, ctx);
            }
        };

        let mut members: Vec<PlanRef> = Vec::new();
        let mut specs: Vec<(JoinOp, Expr)> = Vec::new();
        collect_join_members(left, right, predicate, op, &mut members, &mut specs);

        // Aliases go to every member left to right before any subquery
        // member's body compiles, so the join's own aliases always precede
        // the aliases inside its subqueries.
        let mut exprs: Vec<Option<TableExpr>> = Vec::with_capacity(members.len());
        let mut aliases: Vec<String> = Vec::with_capacity(members.len());
        for plan in &members {
            match plan.as_ref() {
                RelOp::Scan { table, schema } => {
                    let member = self.scan_member(plan, table, schema, ctx);
                    aliases.push(String::new());
                    exprs.push(Some(member));
                }
                _ => {
                    aliases.push(ctx.new_alias());
                    exprs.push(None);
                }
            }
        }
        for (i, plan) in members.iter().enumerate() {
            if exprs[i].is_some() {
                continue;
            }
            ctx.push_scope();
            let body = self.compile_node(plan, ctx);
            ctx.pop_scope();
            let member = ctx.add_member(aliases[i].clone(), plan.output_schema());
            bind_through(ctx, plan, member);
            exprs[i] = Some(TableExpr::Subquery {
                select: Box::new(body?),
                alias: aliases[i].clone(),
            });
        }

        let mut exprs = exprs
            .into_iter()
            .map(|expr| expr.expect("every join member was compiled"));
        let mut select = Select {
            from: exprs.next(),
            ..Select::new()
        };
        for ((op, predicate), relation) in specs.iter().zip(exprs) {
            let on = self.translate_scalar(predicate, ctx)?;
            select.joins.push(Join {
                kind: *op,
                relation,
                on,
            });
        }
        Ok(select)
    }

    fn compile_aggregate(
        &self,
        input: &PlanRef,
        group_by: &[Expr],
        metrics: &[(String, Expr)],
        ctx: &mut TranslationContext,
    ) -> Result<Select, CompileError> {
        let mut select = if aggregate_fusable(input) {
            self.compile_node(input, ctx)?
        } else {
            self.wrap_as_subquery(input, ctx)?.0
        };
        let mut projections = Vec::with_capacity(group_by.len() + metrics.len());
        let mut keys = Vec::with_capacity(group_by.len());
        for key in group_by {
            let node = self.translate_scalar(key, ctx)?;
            keys.push(node.clone());
            projections.push(node);
        }
        for (name, metric) in metrics {
            projections.push(self.translate_scalar_named(metric, ctx, name)?);
        }
        select.projections = projections;
        select.group_by = keys;
        Ok(select)
    }

    fn compile_sort(
        &self,
        input: &PlanRef,
        keys: &[SortKey],
        ctx: &mut TranslationContext,
    ) -> Result<Select, CompileError> {
        // Reordering after a limit changes which rows survive, so a limited
        // input is sorted from a wrapper.
        if matches!(input.as_ref(), RelOp::Limit { .. }) {
            let (mut select, _alias) = self.wrap_as_subquery(input, ctx)?;
            select.order_by = self.translate_sort_keys(keys, input, ctx)?;
            return Ok(select);
        }
        if let RelOp::Aggregate { metrics, .. } = input.as_ref() {
            let on_metric = keys.iter().any(|key| references_metric(&key.expr, metrics));
            if on_metric && self.config.wrap_sort_on_aggregate_metric {
                let (mut select, _alias) = self.wrap_as_subquery(input, ctx)?;
                select.order_by = self.translate_sort_keys(keys, input, ctx)?;
                return Ok(select);
            }
        }
        let mut select = self.compile_node(input, ctx)?;
        select.order_by = self.translate_sort_keys(keys, input, ctx)?;
        Ok(select)
    }

    fn translate_sort_keys(
        &self,
        keys: &[SortKey],
        input: &PlanRef,
        ctx: &mut TranslationContext,
    ) -> Result<Vec<OrderByExpr>, CompileError> {
        keys.iter()
            .map(|key| self.translate_sort_key(key, input, ctx))
            .collect()
    }

    /// Sort keys naming a derived column of the input (a projection alias,
    /// or an aggregate metric when wrapping is disabled) have no underlying
    /// column to qualify; ORDER BY may reference the select-list name
    /// directly.
    fn translate_sort_key(
        &self,
        key: &SortKey,
        input: &PlanRef,
        ctx: &mut TranslationContext,
    ) -> Result<OrderByExpr, CompileError> {
        let expr = match self.translate_scalar(&key.expr, ctx) {
            Ok(expr) => expr,
            Err(CompileError::MalformedPlan(_))
                if key
                    .expr
                    .implied_name()
                    .map_or(false, |name| input.output_schema().field(name).is_some()) =>
            {
                SqlScalar::Column {
                    qualifier: None,
                    name: key
                        .expr
                        .implied_name()
                        .unwrap_or_default()
                        .to_string(),
                }
            }
            Err(err) => return Err(err),
        };
        Ok(OrderByExpr {
            expr,
            desc: key.desc,
        })
    }

    fn compile_limit(
        &self,
        input: &PlanRef,
        n: u64,
        offset: Option<u64>,
        ctx: &mut TranslationContext,
    ) -> Result<Select, CompileError> {
        let mut select = if matches!(input.as_ref(), RelOp::Limit { .. }) {
            self.wrap_as_subquery(input, ctx)?.0
        } else {
            self.compile_node(input, ctx)?
        };
        select.limit = Some(n);
        select.offset = offset;
        Ok(select)
    }

    fn compile_distinct(
        &self,
        input: &PlanRef,
        ctx: &mut TranslationContext,
    ) -> Result<Select, CompileError> {
        let mut select = if matches!(input.as_ref(), RelOp::Limit { .. }) {
            self.wrap_as_subquery(input, ctx)?.0
        } else {
            self.compile_node(input, ctx)?
        };
        // A single-column select list is a column-level distinct request.
        let column_level = select.projections.len() == 1
            && !matches!(
                select.projections[0],
                SqlScalar::Star { .. } | SqlScalar::Distinct(_)
            );
        if column_level {
            let only = select.projections.remove(0);
            select.projections.push(SqlScalar::Distinct(Box::new(only)));
        } else {
            select.distinct = true;
        }
        Ok(select)
    }

    fn compile_exists(
        &self,
        input: &PlanRef,
        subquery: &PlanRef,
        predicate: Option<&Expr>,
        negated: bool,
        ctx: &mut TranslationContext,
    ) -> Result<Select, CompileError> {
        let sink = filter_sink(input);
        let mut select = match sink {
            FilterSink::Wrap => self.wrap_as_subquery(input, ctx)?.0,
            _ => self.compile_node(input, ctx)?,
        };
        let exists = self.exists_predicate(subquery, predicate, negated, ctx)?;
        if matches!(sink, FilterSink::Having) {
            select.having = Some(conjoin(select.having.take(), exists));
        } else {
            select.where_clause = Some(conjoin(select.where_clause.take(), exists));
        }
        Ok(select)
    }

    /// Build an `EXISTS (SELECT 1 FROM ... WHERE ...)` test. The subquery
    /// compiles under a pushed scope, so a predicate touching the enclosing
    /// statement's relations resolves to their aliases and the correlation
    /// condition lands inside the subquery, never in the outer WHERE.
    fn exists_predicate(
        &self,
        subquery: &PlanRef,
        predicate: Option<&Expr>,
        negated: bool,
        ctx: &mut TranslationContext,
    ) -> Result<SqlScalar, CompileError> {
        ctx.push_scope();
        let compiled = self.compile_node(subquery, ctx).and_then(|mut inner| {
            if let Some(predicate) = predicate {
                let predicate = self.translate_scalar(predicate, ctx)?;
                inner.where_clause = Some(conjoin(inner.where_clause.take(), predicate));
            }
            inner.projections = vec![SqlScalar::Literal(SqlLiteral::Int(1))];
            inner.distinct = false;
            Ok(inner)
        });
        ctx.pop_scope();
        Ok(SqlScalar::Exists {
            select: Box::new(compiled?),
            negated,
        })
    }

    /// Deduplicate structurally identical subquery members into shared CTE
    /// definitions attached to the root statement.
    fn factor_ctes(&self, root: &mut Select, ctx: &mut TranslationContext) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        count_member_fingerprints(root, &mut counts);
        if !counts.values().any(|&n| n > 1) {
            return;
        }
        replace_duplicate_members(root, &counts, ctx);
        root.with = ctx.take_cte_definitions();
    }
}

/// Where a filter's predicate lands, given the shape of its input.
enum FilterSink {
    Where,
    Having,
    Wrap,
}

fn filter_sink(input: &PlanRef) -> FilterSink {
    match input.as_ref() {
        RelOp::Scan { .. } => FilterSink::Where,
        // A filter's statement keeps an open WHERE regardless of whether it
        // fused or wrapped; only a grouped statement redirects to HAVING.
        RelOp::Filter { input, .. } | RelOp::Exists { input, .. } => match filter_sink(input) {
            FilterSink::Having => FilterSink::Having,
            _ => FilterSink::Where,
        },
        RelOp::Project { items, .. } if plain_items(items) => FilterSink::Where,
        RelOp::Aggregate { .. } => FilterSink::Having,
        _ => FilterSink::Wrap,
    }
}

fn project_fusable(input: &PlanRef) -> bool {
    match input.as_ref() {
        RelOp::Scan { .. } | RelOp::Join { .. } => true,
        RelOp::Filter { input, .. } | RelOp::Exists { input, .. } => {
            !matches!(filter_sink(input), FilterSink::Having)
        }
        RelOp::Project { items, .. } => plain_items(items),
        _ => false,
    }
}

fn aggregate_fusable(input: &PlanRef) -> bool {
    match input.as_ref() {
        RelOp::Scan { .. } => true,
        RelOp::Filter { input, .. } | RelOp::Exists { input, .. } => {
            !matches!(filter_sink(input), FilterSink::Having)
        }
        RelOp::Project { items, .. } => plain_items(items),
        _ => false,
    }
}

/// True when every item passes an input column through under its own name.
pub(crate) fn plain_items(items: &[ProjectItem]) -> bool {
    items.iter().all(|item| match item {
        ProjectItem::AllOf(_) => true,
        ProjectItem::Expr { expr, name } => match expr {
            Expr::Column { name: column, .. } | Expr::Field { name: column } => {
                name.as_deref().map_or(true, |n| n == column)
            }
            _ => false,
        },
    })
}

fn conjoin(existing: Option<SqlScalar>, predicate: SqlScalar) -> SqlScalar {
    match existing {
        Some(left) => SqlScalar::Binary {
            op: SqlBinaryOp::And,
            left: Box::new(left),
            right: Box::new(predicate),
        },
        None => predicate,
    }
}

fn collect_join_members(
    left: &PlanRef,
    right: &PlanRef,
    predicate: &Expr,
    op: JoinOp,
    members: &mut Vec<PlanRef>,
    specs: &mut Vec<(JoinOp, Expr)>,
) {
    // Left-nested joins flatten into one FROM chain; a join on the right
    // side stays a subquery member.
    match left.as_ref() {
        RelOp::Join {
            left: nested_left,
            right: nested_right,
            predicate: nested_predicate,
            kind,
        } => match materializable_op(*kind) {
            Some(nested_op) => collect_join_members(
                nested_left,
                nested_right,
                nested_predicate,
                nested_op,
                members,
                specs,
            ),
            None => members.push(left.clone()),
        },
        _ => members.push(left.clone()),
    }
    members.push(right.clone());
    specs.push((op, predicate.clone()));
}

fn materializable_op(kind: JoinKind) -> Option<JoinOp> {
    match kind {
        JoinKind::Inner => Some(JoinOp::Inner),
        JoinKind::LeftOuter => Some(JoinOp::LeftOuter),
        JoinKind::FullOuter => Some(JoinOp::FullOuter),
        JoinKind::Semi | JoinKind::Anti => None,
    }
}

/// Bind a wrapped subtree's column-preserving interior to the wrapper's
/// member, so references built against any level of it resolve to the
/// wrapper's alias.
fn bind_through(ctx: &mut TranslationContext, plan: &PlanRef, member: usize) {
    ctx.bind_node(plan, member);
    match plan.as_ref() {
        RelOp::Filter { input, .. }
        | RelOp::Sort { input, .. }
        | RelOp::Limit { input, .. }
        | RelOp::Distinct { input }
        | RelOp::Exists { input, .. } => bind_through(ctx, input, member),
        RelOp::Project { input, items } if plain_items(items) => bind_through(ctx, input, member),
        RelOp::Join {
            left, right, kind, ..
        } => {
            bind_through(ctx, left, member);
            if !matches!(kind, JoinKind::Semi | JoinKind::Anti) {
                bind_through(ctx, right, member);
            }
        }
        _ => {}
    }
}

fn underlying_aggregate(plan: &PlanRef) -> Option<&PlanRef> {
    match plan.as_ref() {
        RelOp::Aggregate { .. } => Some(plan),
        RelOp::Filter { input, .. } | RelOp::Exists { input, .. } => underlying_aggregate(input),
        _ => None,
    }
}

fn references_metric(expr: &Expr, metrics: &[(String, Expr)]) -> bool {
    let name = match expr {
        Expr::Column { name, .. } | Expr::Field { name } => name,
        _ => return false,
    };
    metrics.iter().any(|(metric, _)| metric == name)
}

/// Rewrite references to an aggregate's computed columns into the metric
/// expressions themselves.
fn inline_metric_refs(expr: &Expr, agg: &PlanRef, metrics: &[(String, Expr)]) -> Expr {
    let lookup = |name: &str| {
        metrics
            .iter()
            .find(|(metric, _)| metric == name)
            .map(|(_, expr)| expr.clone())
    };
    match expr {
        Expr::Column { relation, name }
            if underlying_aggregate(relation).map_or(false, |node| Arc::ptr_eq(node, agg)) =>
        {
            lookup(name).unwrap_or_else(|| expr.clone())
        }
        Expr::Field { name } => lookup(name).unwrap_or_else(|| expr.clone()),
        Expr::Binary { op, left, right } => Expr::Binary {
            op: *op,
            left: Box::new(inline_metric_refs(left, agg, metrics)),
            right: Box::new(inline_metric_refs(right, agg, metrics)),
        },
        Expr::Unary { op, expr } => Expr::Unary {
            op: *op,
            expr: Box::new(inline_metric_refs(expr, agg, metrics)),
        },
        Expr::Between { expr, low, high } => Expr::Between {
            expr: Box::new(inline_metric_refs(expr, agg, metrics)),
            low: Box::new(inline_metric_refs(low, agg, metrics)),
            high: Box::new(inline_metric_refs(high, agg, metrics)),
        },
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(inline_metric_refs(expr, agg, metrics)),
            negated: *negated,
        },
        Expr::InList {
            expr,
            list,
            negated,
        } => Expr::InList {
            expr: Box::new(inline_metric_refs(expr, agg, metrics)),
            list: list
                .iter()
                .map(|item| inline_metric_refs(item, agg, metrics))
                .collect(),
            negated: *negated,
        },
        Expr::Coalesce(args) => Expr::Coalesce(
            args.iter()
                .map(|arg| inline_metric_refs(arg, agg, metrics))
                .collect(),
        ),
        Expr::Case {
            branches,
            default,
            result_type,
        } => Expr::Case {
            branches: branches
                .iter()
                .map(|(condition, result)| {
                    (
                        inline_metric_refs(condition, agg, metrics),
                        inline_metric_refs(result, agg, metrics),
                    )
                })
                .collect(),
            default: default
                .as_ref()
                .map(|d| Box::new(inline_metric_refs(d, agg, metrics))),
            result_type: *result_type,
        },
        _ => expr.clone(),
    }
}

fn count_member_fingerprints(select: &Select, counts: &mut HashMap<String, usize>) {
    for member in select
        .from
        .iter()
        .chain(select.joins.iter().map(|join| &join.relation))
    {
        if let TableExpr::Subquery { select: body, .. } = member {
            *counts.entry(body.fingerprint()).or_default() += 1;
            count_member_fingerprints(body, counts);
        }
    }
}

fn replace_duplicate_members(
    select: &mut Select,
    counts: &HashMap<String, usize>,
    ctx: &mut TranslationContext,
) {
    for member in select
        .from
        .iter_mut()
        .chain(select.joins.iter_mut().map(|join| &mut join.relation))
    {
        if let TableExpr::Subquery {
            select: body,
            alias,
        } = member
        {
            let fingerprint = body.fingerprint();
            if counts.get(&fingerprint).copied().unwrap_or(0) > 1 {
                let cte = ctx.register_cte(&fingerprint, alias, (**body).clone());
                debug!(name = %cte.name, "sharing duplicate subplan as CTE");
                let alias = if *alias == cte.name {
                    None
                } else {
                    Some(alias.clone())
                };
                *member = TableExpr::CteRef {
                    name: cte.name,
                    alias,
                };
            } else {
                replace_duplicate_members(body, counts, ctx);
            }
        }
    }
}
