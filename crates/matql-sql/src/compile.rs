//! Query document → dialect SQL
//!
//! Compilation is pure: the same document and dialect always produce the
//! same SQL text and the same parameter vector. Filter and HAVING values are
//! bound as parameters; only the display form inlines them.

use std::collections::HashMap;

use matql_ir::{
    is_plain_ident, AggregateFunction, AggregateFunctionRef, CanonicalType, ColumnRef, ComparisonOp,
    Dialect, JoinEdge, JoinType, Predicate, QueryDocument, TableRef, TransformFunction, Value,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::literal;
use crate::naming::{aggregate_name, destination_name, sanitize_identifier};
use crate::validate::is_aggregated;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Nothing to select: no selected columns, aggregates or calculated columns")]
    NothingSelected,

    #[error("No source table can be derived from the document")]
    NoSourceTable,

    #[error("Table '{table}' is referenced by a column but not reachable through any join edge")]
    UnreachableTable { table: String },

    #[error("Alias '{alias}' on table '{table}' is not established by any join edge")]
    DanglingAlias { alias: String, table: String },

    #[error("Alias '{alias}' is bound to more than one table")]
    AliasConflict { alias: String },

    #[error("Destination column name '{name}' is produced more than once")]
    DuplicateColumnName { name: String },

    #[error("Invalid column reference '{reference}'")]
    InvalidReference { reference: String },

    #[error("Unsupported operator '{operator}'")]
    InvalidOperator { operator: String },

    #[error("Invalid predicate: {reason}")]
    InvalidPredicate { reason: String },

    #[error("Rejected SQL expression '{expression}'")]
    InvalidExpression { expression: String },
}

impl CompileError {
    /// Identifiers the caller has to fix
    pub fn offending(&self) -> Vec<String> {
        match self {
            CompileError::NothingSelected | CompileError::NoSourceTable | CompileError::InvalidPredicate { .. } => {
                Vec::new()
            }
            CompileError::UnreachableTable { table } => vec![table.clone()],
            CompileError::DanglingAlias { alias, table } => vec![alias.clone(), table.clone()],
            CompileError::AliasConflict { alias } => vec![alias.clone()],
            CompileError::DuplicateColumnName { name } => vec![name.clone()],
            CompileError::InvalidReference { reference } => vec![reference.clone()],
            CompileError::InvalidOperator { operator } => vec![operator.clone()],
            CompileError::InvalidExpression { expression } => vec![expression.clone()],
        }
    }
}

/// Where a SELECT item comes from; drives destination typing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputSource {
    Column(ColumnRef),
    Aggregate(AggregateFunctionRef),
    Expression { expression: String },
    Calculated {
        expression: String,
        canonical_type: Option<CanonicalType>,
    },
}

/// One SELECT item, named exactly as it appears in result rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputColumn {
    pub name: String,
    pub source: OutputSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub dialect: Dialect,
    pub sql: String,
    pub params: Vec<Value>,
    pub columns: Vec<OutputColumn>,
}

impl CompiledQuery {
    /// SQL with every placeholder replaced by its literal, for logs and
    /// provenance. Never executed.
    pub fn display_sql(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut chars = self.sql.chars().peekable();
        let mut quoted: Option<char> = None;
        let mut next_param = 0;

        while let Some(c) = chars.next() {
            if let Some(q) = quoted {
                out.push(c);
                if c == q {
                    quoted = None;
                }
                continue;
            }

            match c {
                '\'' | '"' | '`' => {
                    quoted = Some(c);
                    out.push(c);
                }
                '?' if uses_positional(self.dialect) => {
                    out.push_str(&self.inline(next_param));
                    next_param += 1;
                }
                '$' if !uses_positional(self.dialect) && chars.peek().is_some_and(|d| d.is_ascii_digit()) => {
                    let mut digits = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        digits.push(d);
                        chars.next();
                    }
                    match digits.parse::<usize>() {
                        Ok(n) if n >= 1 => out.push_str(&self.inline(n - 1)),
                        _ => {
                            out.push('$');
                            out.push_str(&digits);
                        }
                    }
                }
                _ => out.push(c),
            }
        }
        out
    }

    /// Destination names in SELECT order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn inline(&self, index: usize) -> String {
        self.params
            .get(index)
            .map(literal::render)
            .unwrap_or_else(|| "NULL".to_string())
    }
}

fn uses_positional(dialect: Dialect) -> bool {
    matches!(dialect, Dialect::MySql | Dialect::Sqlite)
}

/// Stateless SQL compiler for one source dialect
#[derive(Debug, Clone, Copy)]
pub struct Compiler {
    dialect: Dialect,
}

impl Compiler {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Compile a document that already passed grouping validation
    pub fn compile(&self, doc: &QueryDocument) -> Result<CompiledQuery, CompileError> {
        let mut w = Writer {
            dialect: self.dialect,
            doc,
            params: Vec::new(),
        };

        let (select, columns) = w.select_list()?;
        let from = w.from_clause()?;

        let mut sql = format!("SELECT {} {}", select.join(", "), from);

        if !doc.filters.is_empty() {
            for p in &doc.filters {
                if p.function.is_some() {
                    return Err(CompileError::InvalidPredicate {
                        reason: format!("aggregate function on '{}' is only valid in HAVING", p.column),
                    });
                }
            }
            sql.push_str(" WHERE ");
            sql.push_str(&w.predicate_chain(&doc.filters)?);
        }

        if !doc.grouping.group_by_columns.is_empty() {
            let items = doc
                .grouping
                .group_by_columns
                .iter()
                .map(|entry| w.group_item(entry))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&items.join(", "));
        }

        if !doc.grouping.having.is_empty() {
            let mut items = Vec::with_capacity(doc.grouping.having.len());
            for p in &doc.grouping.having {
                items.push(w.having_item(p)?);
            }
            sql.push_str(" HAVING ");
            sql.push_str(&items.join(" AND "));
        }

        if !doc.ordering.is_empty() {
            let mut items = Vec::with_capacity(doc.ordering.len());
            for order in &doc.ordering {
                let target = match columns.iter().find(|c| c.name == order.column) {
                    Some(out) => self.dialect.quote_ident(&out.name),
                    None => {
                        let col = doc.columns.iter().find(|c| c.matches(&order.column));
                        // A column consumed by an aggregate is ordered by that aggregate
                        let aggregate = columns.iter().find(|out| match &out.source {
                            OutputSource::Aggregate(agg) => {
                                agg.column == order.column || col.is_some_and(|c| c.matches(&agg.column))
                            }
                            _ => false,
                        });
                        match (aggregate, col) {
                            (Some(out), _) => self.dialect.quote_ident(&out.name),
                            (None, Some(col)) if col.is_selected_column && !is_aggregated(doc, col) => {
                                self.dialect.quote_ident(&destination_name(col))
                            }
                            _ => w.reference(&order.column)?,
                        }
                    }
                };
                items.push(format!("{} {}", target, order.direction.as_sql()));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&items.join(", "));
        }

        match (doc.limit(), doc.offset()) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            // MySQL and SQLite cannot OFFSET without a LIMIT
            (None, Some(offset)) => match self.dialect {
                Dialect::MySql => sql.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {}", offset)),
                Dialect::Sqlite => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
                Dialect::Postgres | Dialect::DuckDb => sql.push_str(&format!(" OFFSET {}", offset)),
            },
            (None, None) => {}
        }

        debug!(dialect = %self.dialect, sql = %sql, params = w.params.len(), "compiled query");

        Ok(CompiledQuery {
            dialect: self.dialect,
            sql,
            params: w.params,
            columns,
        })
    }
}

/// Accumulates bound parameters in textual order while clauses render
struct Writer<'a> {
    dialect: Dialect,
    doc: &'a QueryDocument,
    params: Vec<Value>,
}

impl<'a> Writer<'a> {
    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    fn quote(&self, ident: &str) -> String {
        self.dialect.quote_ident(ident)
    }

    fn column_sql(&self, col: &ColumnRef) -> String {
        match &col.table_alias {
            Some(alias) => format!("{}.{}", self.quote(alias), self.quote(&col.column_name)),
            None => format!(
                "{}.{}.{}",
                self.quote(&col.schema),
                self.quote(&col.table_name),
                self.quote(&col.column_name)
            ),
        }
    }

    fn select_expr(&self, col: &ColumnRef) -> String {
        let base = self.column_sql(col);
        match col.transform_function {
            Some(f) => transform_sql(self.dialect, f, &base),
            None => base,
        }
    }

    fn binding_sql(&self, table: &TableRef) -> String {
        match &table.alias {
            Some(alias) => self.quote(alias),
            None => format!("{}.{}", self.quote(&table.schema), self.quote(&table.table_name)),
        }
    }

    fn table_sql(&self, table: &TableRef) -> String {
        let physical = format!("{}.{}", self.quote(&table.schema), self.quote(&table.table_name));
        match &table.alias {
            Some(alias) => format!("{} AS {}", physical, self.quote(alias)),
            None => physical,
        }
    }

    /// Resolve a raw reference: a known column renders through its
    /// `ColumnRef`, anything else must be `ident(.ident){0,2}`
    fn reference(&self, raw: &str) -> Result<String, CompileError> {
        if let Some(col) = self.doc.columns.iter().find(|c| c.matches(raw)) {
            return Ok(self.column_sql(col));
        }

        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() <= 3 && parts.iter().all(|p| is_plain_ident(p)) {
            Ok(raw.to_string())
        } else {
            Err(CompileError::InvalidReference {
                reference: raw.to_string(),
            })
        }
    }

    fn aggregate_call(&self, function: AggregateFunction, column: &str, distinct: bool) -> Result<String, CompileError> {
        let arg = if column == "*" {
            if function != AggregateFunction::Count || distinct {
                return Err(CompileError::InvalidReference {
                    reference: column.to_string(),
                });
            }
            "*".to_string()
        } else {
            self.reference(column)?
        };

        let distinct = if distinct { "DISTINCT " } else { "" };
        Ok(format!("{}({}{})", function.as_sql(), distinct, arg))
    }

    fn select_list(&self) -> Result<(Vec<String>, Vec<OutputColumn>), CompileError> {
        let doc = self.doc;
        let mut items = Vec::new();
        let mut columns: Vec<OutputColumn> = Vec::new();

        let mut push = |expr: String, name: String, source: OutputSource| -> Result<(), CompileError> {
            if columns.iter().any(|c| c.name == name) {
                return Err(CompileError::DuplicateColumnName { name });
            }
            items.push(format!("{} AS {}", expr, self.dialect.quote_ident(&name)));
            columns.push(OutputColumn { name, source });
            Ok(())
        };

        for col in doc.selected_columns() {
            // Aggregate-only columns appear solely inside their aggregate
            if is_aggregated(doc, col) {
                continue;
            }
            push(self.select_expr(col), destination_name(col), OutputSource::Column(col.clone()))?;
        }

        for calc in &doc.calculated_columns {
            check_expression(&calc.expression)?;
            push(
                calc.expression.trim().to_string(),
                sanitize_identifier(&calc.alias),
                OutputSource::Calculated {
                    expression: calc.expression.clone(),
                    canonical_type: calc.canonical_type,
                },
            )?;
        }

        for agg in &doc.grouping.aggregate_functions {
            let call = self.aggregate_call(agg.function, &agg.column, agg.distinct)?;
            push(call, aggregate_name(agg), OutputSource::Aggregate(agg.clone()))?;
        }

        for expr in &doc.grouping.aggregate_expressions {
            check_expression(&expr.expression)?;
            push(
                expr.expression.trim().to_string(),
                sanitize_identifier(&expr.alias),
                OutputSource::Expression {
                    expression: expr.expression.clone(),
                },
            )?;
        }

        if items.is_empty() {
            return Err(CompileError::NothingSelected);
        }
        Ok((items, columns))
    }

    fn from_clause(&mut self) -> Result<String, CompileError> {
        if self.doc.join_edges.is_empty() {
            let table = self.sole_table()?;
            return Ok(format!("FROM {}", self.table_sql(&table)));
        }

        let plan = JoinPlan::build(self.doc)?;
        plan.check_columns(self.doc)?;

        let mut parts = Vec::with_capacity(plan.clauses.len());
        for clause in &plan.clauses {
            let table = self.table_sql(clause.table);
            let on = self.join_conditions(&clause.edges)?;
            let rendered = match (clause.kind, on) {
                (ClauseKind::From, _) => format!("FROM {}", table),
                (ClauseKind::Cross, None) => format!("CROSS JOIN {}", table),
                (ClauseKind::Cross, Some(on)) => format!("{} {} ON {}", JoinType::Inner.as_sql(), table, on),
                (ClauseKind::Join(jt), Some(on)) => format!("{} {} ON {}", jt.as_sql(), table, on),
                (ClauseKind::Join(jt), None) => format!("{} {}", jt.as_sql(), table),
            };
            parts.push(rendered);
        }
        Ok(parts.join(" "))
    }

    /// Single-table documents: every column must live on one occurrence
    fn sole_table(&self) -> Result<TableRef, CompileError> {
        let mut tables: Vec<TableRef> = Vec::new();
        for col in &self.doc.columns {
            let table = TableRef {
                schema: col.schema.clone(),
                table_name: col.table_name.clone(),
                alias: col.table_alias.clone(),
            };
            if !tables.contains(&table) {
                tables.push(table);
            }
        }

        if tables.len() > 1 {
            return Err(CompileError::UnreachableTable {
                table: tables[1].binding(),
            });
        }
        if let Some(table) = tables.pop() {
            return Ok(table);
        }

        // Aggregate-only documents name their table in the aggregate column
        self.doc
            .grouping
            .aggregate_functions
            .iter()
            .find_map(|agg| {
                let parts: Vec<&str> = agg.column.split('.').collect();
                match parts.as_slice() {
                    [schema, table, _] => Some(TableRef {
                        schema: schema.to_string(),
                        table_name: table.to_string(),
                        alias: None,
                    }),
                    _ => None,
                }
            })
            .ok_or(CompileError::NoSourceTable)
    }

    fn edge_side(&self, table: &TableRef, column: &str) -> Result<String, CompileError> {
        if column.contains('.') {
            return self.reference(column);
        }
        if column.is_empty() {
            return Err(CompileError::InvalidReference {
                reference: table.binding(),
            });
        }
        Ok(format!("{}.{}", self.binding_sql(table), self.quote(column)))
    }

    fn join_conditions(&mut self, edges: &[&JoinEdge]) -> Result<Option<String>, CompileError> {
        if edges.is_empty() {
            return Ok(None);
        }

        let mut groups = Vec::with_capacity(edges.len());
        for edge in edges {
            let op = ComparisonOp::parse(&edge.operator)
                .filter(|op| !op.is_list())
                .ok_or_else(|| CompileError::InvalidOperator {
                    operator: edge.operator.clone(),
                })?;

            let mut cond = format!(
                "{} {} {}",
                self.edge_side(&edge.left, &edge.left_column)?,
                op.as_sql(),
                self.edge_side(&edge.right, &edge.right_column)?
            );
            for p in &edge.extra_predicates {
                let item = self.predicate(p)?;
                cond.push_str(&format!(" {} {}", p.combinator.as_sql(), item));
            }
            groups.push(cond);
        }

        if groups.len() == 1 {
            Ok(groups.pop())
        } else {
            let wrapped: Vec<String> = groups.into_iter().map(|g| format!("({})", g)).collect();
            Ok(Some(wrapped.join(" AND ")))
        }
    }

    /// Predicates joined by their own combinators, declaration order
    fn predicate_chain(&mut self, predicates: &[Predicate]) -> Result<String, CompileError> {
        let mut sql = String::new();
        for (i, p) in predicates.iter().enumerate() {
            let item = self.predicate(p)?;
            if i > 0 {
                sql.push(' ');
                sql.push_str(p.combinator.as_sql());
                sql.push(' ');
            }
            sql.push_str(&item);
        }
        Ok(sql)
    }

    fn predicate(&mut self, p: &Predicate) -> Result<String, CompileError> {
        let lhs = self.reference(&p.column)?;
        self.comparison(lhs, p)
    }

    fn comparison(&mut self, lhs: String, p: &Predicate) -> Result<String, CompileError> {
        match (&p.value, p.operator) {
            (Value::Null, ComparisonOp::Eq) => Ok(format!("{} IS NULL", lhs)),
            (Value::Null, ComparisonOp::Ne) => Ok(format!("{} IS NOT NULL", lhs)),
            (Value::Null, op) => Err(CompileError::InvalidPredicate {
                reason: format!("NULL cannot be compared with {} on '{}'", op.as_sql(), p.column),
            }),
            (value, op) if op.is_list() => {
                let items = match value {
                    Value::Array(items) => items.clone(),
                    scalar => vec![scalar.clone()],
                };
                if items.is_empty() {
                    return Err(CompileError::InvalidPredicate {
                        reason: format!("empty {} list on '{}'", op.as_sql(), p.column),
                    });
                }
                let placeholders: Vec<String> = items.into_iter().map(|v| self.bind(v)).collect();
                Ok(format!("{} {} ({})", lhs, op.as_sql(), placeholders.join(", ")))
            }
            (Value::Array(_), op) => Err(CompileError::InvalidPredicate {
                reason: format!("a list value needs IN or NOT IN, got {} on '{}'", op.as_sql(), p.column),
            }),
            (value, op) => {
                let placeholder = self.bind(value.clone());
                Ok(format!("{} {} {}", lhs, op.as_sql(), placeholder))
            }
        }
    }

    fn having_item(&mut self, p: &Predicate) -> Result<String, CompileError> {
        let function = p.function.ok_or_else(|| CompileError::InvalidPredicate {
            reason: format!("HAVING on '{}' needs an aggregate function", p.column),
        })?;
        let lhs = self.aggregate_call(function, &p.column, false)?;
        self.comparison(lhs, p)
    }

    /// Grouping by a transformed column groups by the transformed value
    fn group_item(&self, entry: &str) -> Result<String, CompileError> {
        match self.doc.selected_columns().find(|c| c.matches(entry)) {
            Some(col) => Ok(self.select_expr(col)),
            None => self.reference(entry),
        }
    }
}

fn check_expression(expression: &str) -> Result<(), CompileError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() || trimmed.contains(';') || trimmed.contains("--") || trimmed.contains("/*") {
        return Err(CompileError::InvalidExpression {
            expression: expression.to_string(),
        });
    }
    Ok(())
}

fn transform_sql(dialect: Dialect, function: TransformFunction, arg: &str) -> String {
    let part = |name: &str, strftime: &str| match dialect {
        Dialect::Postgres | Dialect::DuckDb => format!("EXTRACT({} FROM {})", name, arg),
        Dialect::MySql => format!("{}({})", name, arg),
        Dialect::Sqlite => format!("CAST(strftime('{}', {}) AS INTEGER)", strftime, arg),
    };

    match function {
        TransformFunction::Date => match dialect {
            Dialect::Postgres | Dialect::DuckDb => format!("CAST({} AS DATE)", arg),
            Dialect::MySql | Dialect::Sqlite => format!("DATE({})", arg),
        },
        TransformFunction::Year => part("YEAR", "%Y"),
        TransformFunction::Month => part("MONTH", "%m"),
        TransformFunction::Day => part("DAY", "%d"),
        TransformFunction::Upper => format!("UPPER({})", arg),
        TransformFunction::Lower => format!("LOWER({})", arg),
        TransformFunction::Trim => format!("TRIM({})", arg),
        TransformFunction::Round => match dialect {
            Dialect::Postgres => format!("ROUND(CAST({} AS NUMERIC), 2)", arg),
            _ => format!("ROUND({}, 2)", arg),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClauseKind {
    From,
    Join(JoinType),
    /// Start of a disconnected component
    Cross,
}

struct Clause<'a> {
    kind: ClauseKind,
    table: &'a TableRef,
    edges: Vec<&'a JoinEdge>,
}

/// Order in which table occurrences enter FROM/JOIN
struct JoinPlan<'a> {
    clauses: Vec<Clause<'a>>,
    positions: HashMap<String, usize>,
}

impl<'a> JoinPlan<'a> {
    fn build(doc: &'a QueryDocument) -> Result<Self, CompileError> {
        let mut plan = JoinPlan {
            clauses: Vec::new(),
            positions: HashMap::new(),
        };

        for edge in &doc.join_edges {
            if edge.left.binding() == edge.right.binding() {
                return Err(CompileError::InvalidPredicate {
                    reason: format!("join edge joins '{}' to itself; alias one side", edge.left.binding()),
                });
            }
        }

        let mut pending: Vec<&'a JoinEdge> = doc.join_edges.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();

            for edge in pending {
                if plan.clauses.is_empty() {
                    plan.introduce(&edge.left, ClauseKind::From)?;
                }
                if plan.lookup(&edge.left)?.is_some() || plan.lookup(&edge.right)?.is_some() {
                    plan.attach(edge)?;
                } else {
                    deferred.push(edge);
                }
            }

            if deferred.len() == before {
                let edge = deferred.remove(0);
                let anchor = anchor_side(doc, edge);
                warn!(
                    table = %anchor.binding(),
                    left = %edge.left.binding(),
                    right = %edge.right.binding(),
                    "join edge touches no joined table, starting a CROSS JOIN component"
                );
                plan.introduce(anchor, ClauseKind::Cross)?;
                plan.attach(edge)?;
            }
            pending = deferred;
        }

        Ok(plan)
    }

    fn lookup(&self, table: &TableRef) -> Result<Option<usize>, CompileError> {
        let binding = table.binding();
        match self.positions.get(&binding) {
            Some(&i) if self.clauses[i].table.is_table(&table.schema, &table.table_name) => Ok(Some(i)),
            Some(_) => Err(CompileError::AliasConflict { alias: binding }),
            None => Ok(None),
        }
    }

    fn introduce(&mut self, table: &'a TableRef, kind: ClauseKind) -> Result<usize, CompileError> {
        if let Some(i) = self.lookup(table)? {
            return Ok(i);
        }
        self.clauses.push(Clause {
            kind,
            table,
            edges: Vec::new(),
        });
        let i = self.clauses.len() - 1;
        self.positions.insert(table.binding(), i);
        Ok(i)
    }

    fn attach(&mut self, edge: &'a JoinEdge) -> Result<(), CompileError> {
        match (self.lookup(&edge.left)?, self.lookup(&edge.right)?) {
            (Some(l), Some(r)) => {
                // Both sides present: the condition belongs to the later clause
                self.clauses[l.max(r)].edges.push(edge);
            }
            (Some(_), None) => {
                let i = self.introduce(&edge.right, ClauseKind::Join(edge.join_type))?;
                self.clauses[i].edges.push(edge);
            }
            (None, Some(_)) => {
                let i = self.introduce(&edge.left, ClauseKind::Join(flip(edge.join_type)))?;
                self.clauses[i].edges.push(edge);
            }
            (None, None) => {
                return Err(CompileError::UnreachableTable {
                    table: edge.left.binding(),
                })
            }
        }
        Ok(())
    }

    /// Every column must sit on an occurrence the plan introduced
    fn check_columns(&self, doc: &QueryDocument) -> Result<(), CompileError> {
        for col in &doc.columns {
            let binding = col.binding();
            let reachable = self
                .positions
                .get(&binding)
                .is_some_and(|&i| self.clauses[i].table.is_table(&col.schema, &col.table_name));
            if reachable {
                continue;
            }
            return Err(match &col.table_alias {
                Some(alias) => CompileError::DanglingAlias {
                    alias: alias.clone(),
                    table: format!("{}.{}", col.schema, col.table_name),
                },
                None => CompileError::UnreachableTable { table: binding },
            });
        }
        Ok(())
    }
}

/// Joining from the other side mirrors outer joins
fn flip(join_type: JoinType) -> JoinType {
    match join_type {
        JoinType::Left => JoinType::Right,
        JoinType::Right => JoinType::Left,
        other => other,
    }
}

/// Prefer the side selected columns already reference, else the right side
fn anchor_side<'a>(doc: &QueryDocument, edge: &'a JoinEdge) -> &'a TableRef {
    let referenced = |t: &TableRef| doc.selected_columns().any(|c| c.binding() == t.binding());
    if referenced(&edge.left) && !referenced(&edge.right) {
        &edge.left
    } else {
        &edge.right
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matql_ir::{AggregateFunctionRef, CalculatedColumn, Combinator, OrderRef, SortDirection};

    fn column(schema: &str, table: &str, name: &str, selected: bool) -> ColumnRef {
        ColumnRef {
            schema: schema.to_string(),
            table_name: table.to_string(),
            column_name: name.to_string(),
            data_type: "text".to_string(),
            max_length: None,
            is_selected_column: selected,
            alias_name: None,
            table_alias: None,
            transform_function: None,
        }
    }

    fn aliased(mut col: ColumnRef, alias: &str) -> ColumnRef {
        col.table_alias = Some(alias.to_string());
        col
    }

    fn table(schema: &str, name: &str, alias: Option<&str>) -> TableRef {
        TableRef {
            schema: schema.to_string(),
            table_name: name.to_string(),
            alias: alias.map(str::to_string),
        }
    }

    fn edge(left: TableRef, left_column: &str, right: TableRef, right_column: &str) -> JoinEdge {
        JoinEdge {
            left,
            left_column: left_column.to_string(),
            right,
            right_column: right_column.to_string(),
            join_type: JoinType::Inner,
            operator: "=".to_string(),
            extra_predicates: vec![],
        }
    }

    fn filter(column: &str, operator: ComparisonOp, value: Value) -> Predicate {
        Predicate {
            column: column.to_string(),
            operator,
            value,
            combinator: Combinator::And,
            function: None,
        }
    }

    fn empty_doc() -> QueryDocument {
        serde_json::from_str("{}").unwrap()
    }

    fn sales_doc() -> QueryDocument {
        let mut doc = empty_doc();
        doc.columns = vec![
            column("public", "sales", "region", true),
            column("public", "sales", "amount", false),
        ];
        doc.grouping.aggregate_functions = vec![AggregateFunctionRef {
            column: "public.sales.amount".to_string(),
            function: AggregateFunction::Sum,
            alias: None,
            distinct: false,
        }];
        doc.grouping.group_by_columns = vec!["public.sales.region".to_string()];
        doc
    }

    fn compile(doc: &QueryDocument) -> Result<CompiledQuery, CompileError> {
        Compiler::new(Dialect::Postgres).compile(doc)
    }

    #[test]
    fn test_simple_aggregate() {
        let compiled = compile(&sales_doc()).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT public.sales.region AS public_sales_region, SUM(public.sales.amount) AS sum_amount \
             FROM public.sales GROUP BY public.sales.region"
        );
        assert!(compiled.params.is_empty());
        assert_eq!(compiled.column_names(), vec!["public_sales_region", "sum_amount"]);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let mut doc = sales_doc();
        doc.filters = vec![filter("public.sales.region", ComparisonOp::In, serde_json::from_str(r#"["EU", "US"]"#).unwrap())];
        doc.ordering = vec![OrderRef {
            column: "sum_amount".to_string(),
            direction: SortDirection::Desc,
        }];

        let first = compile(&doc).unwrap();
        let second = compile(&doc.clone()).unwrap();
        assert_eq!(first.sql, second.sql);
        assert_eq!(first.params, second.params);
    }

    #[test]
    fn test_self_join() {
        let mut doc = empty_doc();
        doc.columns = vec![
            aliased(column("hr", "employees", "name", true), "emp"),
            aliased(column("hr", "employees", "name", true), "mgr"),
        ];
        doc.join_edges = vec![edge(
            table("hr", "employees", Some("emp")),
            "manager_id",
            table("hr", "employees", Some("mgr")),
            "employee_id",
        )];

        let compiled = compile(&doc).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT emp.name AS hr_emp_name, mgr.name AS hr_mgr_name \
             FROM hr.employees AS emp INNER JOIN hr.employees AS mgr ON emp.manager_id = mgr.employee_id"
        );
    }

    #[test]
    fn test_filters_are_bound() {
        let mut doc = sales_doc();
        doc.filters = vec![
            filter("public.sales.region", ComparisonOp::Eq, Value::from("O'Hare")),
            Predicate {
                combinator: Combinator::Or,
                ..filter("public.sales.amount", ComparisonOp::In, Value::Array(vec![Value::Int(1), Value::Int(2)]))
            },
            filter("public.sales.region", ComparisonOp::Ne, Value::Null),
        ];

        let compiled = compile(&doc).unwrap();
        assert!(compiled.sql.contains(
            "WHERE public.sales.region = $1 OR public.sales.amount IN ($2, $3) AND public.sales.region IS NOT NULL"
        ));
        assert_eq!(compiled.params, vec![Value::from("O'Hare"), Value::Int(1), Value::Int(2)]);
        assert!(compiled
            .display_sql()
            .contains("WHERE public.sales.region = 'O''Hare' OR public.sales.amount IN (1, 2)"));

        let mysql = Compiler::new(Dialect::MySql).compile(&doc).unwrap();
        assert!(mysql.sql.contains("public.sales.amount IN (?, ?)"));
        assert!(mysql.display_sql().contains("public.sales.region = 'O''Hare'"));
    }

    #[test]
    fn test_having_and_ordering() {
        let mut doc = sales_doc();
        doc.grouping.having = vec![Predicate {
            function: Some(AggregateFunction::Sum),
            ..filter("public.sales.amount", ComparisonOp::Gt, Value::Int(1000))
        }];
        doc.ordering = vec![OrderRef {
            column: "public.sales.region".to_string(),
            direction: SortDirection::Asc,
        }];
        doc.limit = 10;

        let compiled = compile(&doc).unwrap();
        assert!(compiled.sql.ends_with(
            "GROUP BY public.sales.region HAVING SUM(public.sales.amount) > $1 ORDER BY public_sales_region ASC LIMIT 10"
        ));
    }

    #[test]
    fn test_ordering_by_aggregated_column_uses_aggregate() {
        let mut doc = sales_doc();
        doc.columns[1].is_selected_column = true;
        doc.ordering = vec![OrderRef {
            column: "public.sales.amount".to_string(),
            direction: SortDirection::Desc,
        }];

        let compiled = compile(&doc).unwrap();
        assert_eq!(compiled.column_names(), vec!["public_sales_region", "sum_amount"]);
        assert!(compiled.sql.ends_with("GROUP BY public.sales.region ORDER BY sum_amount DESC"));

        doc.columns[1].is_selected_column = false;
        let compiled = compile(&doc).unwrap();
        assert!(compiled.sql.ends_with("ORDER BY sum_amount DESC"));
    }

    #[test]
    fn test_having_requires_function() {
        let mut doc = sales_doc();
        doc.grouping.having = vec![filter("public.sales.amount", ComparisonOp::Gt, Value::Int(1))];
        assert!(matches!(compile(&doc), Err(CompileError::InvalidPredicate { .. })));
    }

    #[test]
    fn test_offset_without_limit() {
        let mut doc = sales_doc();
        doc.offset = 5;
        assert!(compile(&doc).unwrap().sql.ends_with(" OFFSET 5"));
        assert!(Compiler::new(Dialect::Sqlite)
            .compile(&doc)
            .unwrap()
            .sql
            .ends_with("LIMIT -1 OFFSET 5"));
    }

    #[test]
    fn test_transforms_per_dialect() {
        let mut doc = empty_doc();
        let mut created = column("public", "orders", "created_at", true);
        created.transform_function = Some(TransformFunction::Year);
        doc.columns = vec![created];

        let sql = |d: Dialect| Compiler::new(d).compile(&doc).unwrap().sql;
        assert!(sql(Dialect::Postgres).starts_with("SELECT EXTRACT(YEAR FROM public.orders.created_at) AS"));
        assert!(sql(Dialect::MySql).starts_with("SELECT YEAR(public.orders.created_at) AS"));
        assert!(sql(Dialect::Sqlite).starts_with("SELECT CAST(strftime('%Y', public.orders.created_at) AS INTEGER) AS"));
    }

    #[test]
    fn test_group_by_transformed_column() {
        let mut doc = sales_doc();
        doc.columns[0].transform_function = Some(TransformFunction::Upper);
        let compiled = compile(&doc).unwrap();
        assert!(compiled.sql.ends_with("GROUP BY UPPER(public.sales.region)"));
    }

    #[test]
    fn test_quoted_identifiers() {
        let mut doc = empty_doc();
        doc.columns = vec![column("public", "Sheet 1", "Total Sales ($)", true)];
        let compiled = compile(&doc).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT public.\"Sheet 1\".\"Total Sales ($)\" AS public_sheet_1_total_sales FROM public.\"Sheet 1\""
        );
    }

    #[test]
    fn test_nothing_selected() {
        let mut doc = empty_doc();
        doc.columns = vec![column("public", "sales", "region", false)];
        assert_eq!(compile(&doc), Err(CompileError::NothingSelected));
    }

    #[test]
    fn test_unreachable_table_without_edges() {
        let mut doc = empty_doc();
        doc.columns = vec![
            column("public", "sales", "region", true),
            column("public", "stores", "city", true),
        ];
        assert_eq!(
            compile(&doc),
            Err(CompileError::UnreachableTable {
                table: "public.stores".to_string()
            })
        );
    }

    #[test]
    fn test_unreachable_table_with_edges() {
        let mut doc = empty_doc();
        doc.columns = vec![
            column("public", "a", "x", true),
            column("public", "b", "y", true),
            column("public", "c", "z", true),
        ];
        doc.join_edges = vec![edge(table("public", "a", None), "id", table("public", "b", None), "a_id")];
        assert_eq!(
            compile(&doc),
            Err(CompileError::UnreachableTable {
                table: "public.c".to_string()
            })
        );
    }

    #[test]
    fn test_dangling_alias() {
        let mut doc = empty_doc();
        doc.columns = vec![
            aliased(column("hr", "employees", "name", true), "emp"),
            aliased(column("hr", "employees", "name", true), "boss"),
        ];
        doc.join_edges = vec![edge(
            table("hr", "employees", Some("emp")),
            "manager_id",
            table("hr", "employees", Some("mgr")),
            "employee_id",
        )];
        assert_eq!(
            compile(&doc),
            Err(CompileError::DanglingAlias {
                alias: "boss".to_string(),
                table: "hr.employees".to_string()
            })
        );
    }

    #[test]
    fn test_single_table_alias_without_edges() {
        let mut doc = empty_doc();
        doc.columns = vec![aliased(column("public", "sales", "region", true), "s")];
        let compiled = compile(&doc).unwrap();
        assert_eq!(compiled.sql, "SELECT s.region AS public_s_region FROM public.sales AS s");
    }

    #[test]
    fn test_deferred_edge_joins_after_its_anchor() {
        let mut doc = empty_doc();
        doc.columns = vec![column("public", "a", "x", true), column("public", "d", "w", true)];
        doc.join_edges = vec![
            edge(table("public", "a", None), "id", table("public", "b", None), "a_id"),
            edge(table("public", "c", None), "id", table("public", "d", None), "c_id"),
            edge(table("public", "b", None), "id", table("public", "c", None), "b_id"),
        ];

        let compiled = compile(&doc).unwrap();
        assert!(compiled.sql.ends_with(
            "FROM public.a \
             INNER JOIN public.b ON public.a.id = public.b.a_id \
             INNER JOIN public.c ON public.b.id = public.c.b_id \
             INNER JOIN public.d ON public.c.id = public.d.c_id"
        ));
    }

    #[test]
    fn test_disconnected_edge_starts_cross_join() {
        let mut doc = empty_doc();
        doc.columns = vec![column("public", "a", "x", true)];
        doc.join_edges = vec![
            edge(table("public", "a", None), "id", table("public", "b", None), "a_id"),
            edge(table("public", "c", None), "id", table("public", "d", None), "c_id"),
        ];

        let compiled = compile(&doc).unwrap();
        assert!(compiled.sql.ends_with(
            "FROM public.a INNER JOIN public.b ON public.a.id = public.b.a_id \
             CROSS JOIN public.d INNER JOIN public.c ON public.c.id = public.d.c_id"
        ));
    }

    #[test]
    fn test_joining_from_right_side_flips_outer_join() {
        let mut doc = empty_doc();
        doc.columns = vec![column("public", "orders", "id", true)];
        let mut customers = edge(table("public", "orders", None), "customer_id", table("public", "customers", None), "id");
        customers.join_type = JoinType::Left;
        let mut regions = edge(table("public", "regions", None), "id", table("public", "customers", None), "region_id");
        regions.join_type = JoinType::Left;
        doc.join_edges = vec![customers, regions];

        let compiled = compile(&doc).unwrap();
        assert!(compiled.sql.ends_with(
            "LEFT JOIN public.customers ON public.orders.customer_id = public.customers.id \
             RIGHT JOIN public.regions ON public.regions.id = public.customers.region_id"
        ));
    }

    #[test]
    fn test_extra_join_predicates_bind_before_where() {
        let mut doc = empty_doc();
        doc.columns = vec![column("public", "a", "x", true)];
        let mut e = edge(table("public", "a", None), "id", table("public", "b", None), "a_id");
        e.extra_predicates = vec![filter("public.b.kind", ComparisonOp::Eq, Value::from("primary"))];
        doc.join_edges = vec![e];
        doc.filters = vec![filter("public.a.x", ComparisonOp::Gt, Value::Int(3))];

        let compiled = compile(&doc).unwrap();
        assert!(compiled
            .sql
            .ends_with("ON public.a.id = public.b.a_id AND public.b.kind = $1 WHERE public.a.x > $2"));
        assert_eq!(compiled.params, vec![Value::from("primary"), Value::Int(3)]);
    }

    #[test]
    fn test_invalid_references_and_operators() {
        let mut doc = sales_doc();
        doc.filters = vec![filter("region; DROP TABLE x", ComparisonOp::Eq, Value::Int(1))];
        assert!(matches!(compile(&doc), Err(CompileError::InvalidReference { .. })));

        let mut doc = empty_doc();
        doc.columns = vec![column("public", "a", "x", true)];
        let mut e = edge(table("public", "a", None), "id", table("public", "b", None), "a_id");
        e.operator = "LIKE".to_string();
        doc.join_edges = vec![e];
        assert_eq!(
            compile(&doc),
            Err(CompileError::InvalidOperator {
                operator: "LIKE".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_predicates() {
        let mut doc = sales_doc();
        doc.filters = vec![filter("public.sales.region", ComparisonOp::In, Value::Array(vec![]))];
        assert!(matches!(compile(&doc), Err(CompileError::InvalidPredicate { .. })));

        doc.filters = vec![filter("public.sales.region", ComparisonOp::Gt, Value::Null)];
        assert!(matches!(compile(&doc), Err(CompileError::InvalidPredicate { .. })));
    }

    #[test]
    fn test_duplicate_column_name() {
        let mut doc = empty_doc();
        let mut a = column("public", "sales", "region", true);
        a.alias_name = Some("area".to_string());
        let mut b = column("public", "sales", "city", true);
        b.alias_name = Some("Area".to_string());
        doc.columns = vec![a, b];
        assert_eq!(
            compile(&doc),
            Err(CompileError::DuplicateColumnName {
                name: "area".to_string()
            })
        );
    }

    #[test]
    fn test_calculated_columns_and_count_star() {
        let mut doc = empty_doc();
        doc.columns = vec![column("public", "sales", "region", true)];
        doc.calculated_columns = vec![CalculatedColumn {
            expression: "public.sales.price * public.sales.qty".to_string(),
            alias: "Line Total".to_string(),
            canonical_type: None,
        }];
        doc.grouping.aggregate_functions = vec![AggregateFunctionRef {
            column: "*".to_string(),
            function: AggregateFunction::Count,
            alias: Some("rows".to_string()),
            distinct: false,
        }];

        let compiled = compile(&doc).unwrap();
        assert!(compiled.sql.starts_with(
            "SELECT public.sales.region AS public_sales_region, \
             public.sales.price * public.sales.qty AS line_total, COUNT(*) AS rows FROM public.sales"
        ));

        doc.calculated_columns[0].expression = "1; DROP TABLE sales".to_string();
        assert!(matches!(compile(&doc), Err(CompileError::InvalidExpression { .. })));
    }

    #[test]
    fn test_aggregate_only_document() {
        let mut doc = empty_doc();
        doc.grouping.aggregate_functions = vec![AggregateFunctionRef {
            column: "public.sales.amount".to_string(),
            function: AggregateFunction::Avg,
            alias: None,
            distinct: true,
        }];
        let compiled = compile(&doc).unwrap();
        assert_eq!(compiled.sql, "SELECT AVG(DISTINCT public.sales.amount) AS avg_amount FROM public.sales");
    }

    #[test]
    fn test_error_offending_identifiers() {
        let err = CompileError::DanglingAlias {
            alias: "boss".to_string(),
            table: "hr.employees".to_string(),
        };
        assert_eq!(err.offending(), vec!["boss".to_string(), "hr.employees".to_string()]);
    }
}
