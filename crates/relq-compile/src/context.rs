//! Per-compilation translation state
//!
//! All mutable compiler state lives here: the alias sequence, the binding of
//! plan nodes to aliases, the scope stack used for correlation tracking, and
//! the CTE registry. A context is created fresh for every top-level
//! compilation; nothing survives across invocations.

use std::collections::HashMap;
use std::sync::Arc;

use relq_plan::{PlanRef, Schema};
use relq_sql::{Cte, Select};

fn node_key(plan: &PlanRef) -> usize {
    Arc::as_ptr(plan) as usize
}

/// Handle to a registered common table expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteRef {
    pub name: String,
}

#[derive(Debug)]
struct ScopeMember {
    alias: String,
    schema: Schema,
}

/// Relations visible to one statement.
#[derive(Debug, Default)]
struct Scope {
    members: Vec<ScopeMember>,
    bound: HashMap<usize, usize>,
}

/// Where a scope-bound column reference resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No scopes are active (standalone expression translation).
    Unscoped,
    /// Bound in the current statement's scope.
    Local(String),
    /// Bound in an enclosing statement's scope: a correlated reference.
    Outer(String),
    /// Bound nowhere on the scope stack.
    Unknown,
}

/// How an unbound (by-name) column reference resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldResolution {
    Unscoped,
    Unique(String),
    Missing,
    Ambiguous(usize),
}

pub struct TranslationContext {
    alias_counter: usize,
    aliases: HashMap<usize, String>,
    scopes: Vec<Scope>,
    cte_index: HashMap<String, usize>,
    cte_defs: Vec<Cte>,
}

impl TranslationContext {
    pub fn new() -> Self {
        Self {
            alias_counter: 0,
            aliases: HashMap::new(),
            scopes: Vec::new(),
            cte_index: HashMap::new(),
            cte_defs: Vec::new(),
        }
    }

    /// Next alias in the deterministic `t0, t1, t2, ...` sequence.
    pub fn new_alias(&mut self) -> String {
        let alias = format!("t{}", self.alias_counter);
        self.alias_counter += 1;
        alias
    }

    /// Alias already assigned to this node's identity, if any. Consulted
    /// before `new_alias`, so a shared node keeps one alias.
    pub fn alias_for(&self, plan: &PlanRef) -> Option<String> {
        self.aliases.get(&node_key(plan)).cloned()
    }

    pub fn bind_alias(&mut self, plan: &PlanRef, alias: &str) {
        self.aliases.insert(node_key(plan), alias.to_string());
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Register a relation visible in the current scope; returns its index
    /// for node binding.
    pub(crate) fn add_member(&mut self, alias: String, schema: Schema) -> usize {
        if self.scopes.is_empty() {
            self.push_scope();
        }
        let scope = self.scopes.last_mut().expect("scope was just ensured");
        scope.members.push(ScopeMember { alias, schema });
        scope.members.len() - 1
    }

    /// Bind a plan node to a member of the current scope, so column
    /// references built against the node resolve to the member's alias.
    pub(crate) fn bind_node(&mut self, plan: &PlanRef, member: usize) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bound.insert(node_key(plan), member);
        }
    }

    pub(crate) fn resolve_relation(&self, plan: &PlanRef) -> Resolution {
        if self.scopes.is_empty() {
            return Resolution::Unscoped;
        }
        let key = node_key(plan);
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if let Some(&member) = scope.bound.get(&key) {
                let alias = scope.members[member].alias.clone();
                return if depth == 0 {
                    Resolution::Local(alias)
                } else {
                    Resolution::Outer(alias)
                };
            }
        }
        Resolution::Unknown
    }

    /// Like [`resolve_relation`](Self::resolve_relation), but skips bindings
    /// whose member does not expose `column`. A fused operator can be bound
    /// to its base relation while exposing derived names the base lacks;
    /// those references fall back to the caller's structural search.
    pub(crate) fn resolve_relation_column(&self, plan: &PlanRef, column: &str) -> Resolution {
        if self.scopes.is_empty() {
            return Resolution::Unscoped;
        }
        let key = node_key(plan);
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if let Some(&member) = scope.bound.get(&key) {
                let member = &scope.members[member];
                if member.schema.field(column).is_none() {
                    continue;
                }
                let alias = member.alias.clone();
                return if depth == 0 {
                    Resolution::Local(alias)
                } else {
                    Resolution::Outer(alias)
                };
            }
        }
        Resolution::Unknown
    }

    /// True while any active scope holds a member under this alias. An alias
    /// binding is only reusable once every statement that defined it has
    /// finished compiling; reuse inside an active statement would shadow it.
    pub(crate) fn alias_is_active(&self, alias: &str) -> bool {
        self.scopes
            .iter()
            .any(|scope| scope.members.iter().any(|member| member.alias == alias))
    }

    /// Resolve a bare column name against the current scope's members.
    pub(crate) fn resolve_field(&self, name: &str) -> FieldResolution {
        let Some(scope) = self.scopes.last() else {
            return FieldResolution::Unscoped;
        };
        let matches: Vec<&ScopeMember> = scope
            .members
            .iter()
            .filter(|member| member.schema.field(name).is_some())
            .collect();
        match matches.len() {
            0 => FieldResolution::Missing,
            1 => FieldResolution::Unique(matches[0].alias.clone()),
            n => FieldResolution::Ambiguous(n),
        }
    }

    /// True iff the node is bound in a strict ancestor of the current scope.
    pub fn is_correlated(&self, plan: &PlanRef) -> bool {
        matches!(self.resolve_relation(plan), Resolution::Outer(_))
    }

    /// Register a statement under its structural fingerprint. Idempotent: a
    /// second registration with an identical fingerprint returns the
    /// existing reference instead of creating a duplicate definition.
    pub fn register_cte(&mut self, fingerprint: &str, name: &str, statement: Select) -> CteRef {
        if let Some(&index) = self.cte_index.get(fingerprint) {
            return CteRef {
                name: self.cte_defs[index].name.clone(),
            };
        }
        self.cte_index
            .insert(fingerprint.to_string(), self.cte_defs.len());
        self.cte_defs.push(Cte {
            name: name.to_string(),
            select: statement,
        });
        CteRef {
            name: name.to_string(),
        }
    }

    /// Drain the registered definitions, in registration order.
    pub(crate) fn take_cte_definitions(&mut self) -> Vec<Cte> {
        self.cte_index.clear();
        std::mem::take(&mut self.cte_defs)
    }
}

impl Default for TranslationContext {
    fn default() -> Self {
        Self::new()
    }
}
