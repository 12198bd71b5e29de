//! MATQL Intermediate Representation (IR)
//!
//! The declarative query document consumed by the compiler and the
//! materializer. Field names are the JSON wire contract shared with the
//! conversational/UI layer; everything here is deterministically
//! serializable so a document can be fingerprinted and stored for replay.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod types;
mod value;
pub use types::*;
pub use value::Value;

/// `limit`/`offset` sentinel meaning "not present"
pub const NONE: i64 = -1;

fn none() -> i64 {
    NONE
}

/// Top-level query document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDocument {
    #[serde(default)]
    pub columns: Vec<ColumnRef>,

    #[serde(default)]
    pub join_edges: Vec<JoinEdge>,

    #[serde(default)]
    pub filters: Vec<Predicate>,

    #[serde(default)]
    pub grouping: Grouping,

    #[serde(default)]
    pub ordering: Vec<OrderRef>,

    #[serde(default = "none")]
    pub limit: i64,

    #[serde(default = "none")]
    pub offset: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calculated_columns: Vec<CalculatedColumn>,
}

impl QueryDocument {
    /// Parse a document from its JSON wire form
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Calculate fingerprint (SHA-256) of the canonical JSON form
    pub fn fingerprint(&self) -> String {
        // Plain structs, enums and strings only; serialization cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Columns that appear in the SELECT list
    pub fn selected_columns(&self) -> impl Iterator<Item = &ColumnRef> {
        self.columns.iter().filter(|c| c.is_selected_column)
    }

    /// True when any aggregate function or expression is requested
    pub fn has_aggregates(&self) -> bool {
        !self.grouping.aggregate_functions.is_empty()
            || !self.grouping.aggregate_expressions.is_empty()
    }

    pub fn limit(&self) -> Option<u64> {
        (self.limit >= 0).then_some(self.limit as u64)
    }

    pub fn offset(&self) -> Option<u64> {
        (self.offset >= 0).then_some(self.offset as u64)
    }
}

/// A column involved in the query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub schema: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,

    #[serde(default)]
    pub is_selected_column: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_alias: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_function: Option<TransformFunction>,
}

impl ColumnRef {
    /// Reference used in SELECT, GROUP BY and aggregate matching.
    ///
    /// `alias.column` for an aliased table occurrence, otherwise
    /// `schema.table.column`.
    pub fn reference(&self) -> String {
        match &self.table_alias {
            Some(alias) => format!("{}.{}", alias, self.column_name),
            None => format!("{}.{}.{}", self.schema, self.table_name, self.column_name),
        }
    }

    /// Always `schema.table.column`, ignoring any alias
    pub fn physical_reference(&self) -> String {
        format!("{}.{}.{}", self.schema, self.table_name, self.column_name)
    }

    /// Name the table occurrence is bound to in FROM/JOIN
    pub fn binding(&self) -> String {
        match &self.table_alias {
            Some(alias) => alias.clone(),
            None => format!("{}.{}", self.schema, self.table_name),
        }
    }

    /// True if `reference` names this column, aliased or physical
    pub fn matches(&self, reference: &str) -> bool {
        reference == self.reference() || (self.table_alias.is_none() && reference == self.physical_reference())
    }
}

/// A physical table, optionally bound to an alias
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl TableRef {
    /// Same rule as [`ColumnRef::binding`]
    pub fn binding(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => format!("{}.{}", self.schema, self.table_name),
        }
    }

    pub fn is_table(&self, schema: &str, table_name: &str) -> bool {
        self.schema == schema && self.table_name == table_name
    }
}

fn default_join_operator() -> String {
    "=".to_string()
}

/// An already-chosen join between two table occurrences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinEdge {
    pub left: TableRef,
    pub left_column: String,
    pub right: TableRef,
    pub right_column: String,

    #[serde(default)]
    pub join_type: JoinType,

    #[serde(default = "default_join_operator")]
    pub operator: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_predicates: Vec<Predicate>,
}

/// `column operator value`, chained to its predecessor by `combinator`.
///
/// In HAVING, `function` wraps the column in an aggregate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub operator: ComparisonOp,

    #[serde(default)]
    pub value: Value,

    #[serde(default)]
    pub combinator: Combinator,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<AggregateFunction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grouping {
    #[serde(default)]
    pub aggregate_functions: Vec<AggregateFunctionRef>,

    #[serde(default)]
    pub aggregate_expressions: Vec<AggregateExpressionRef>,

    #[serde(default)]
    pub group_by_columns: Vec<String>,

    #[serde(default)]
    pub having: Vec<Predicate>,
}

/// `FUNC([DISTINCT] column)` over a fully-qualified column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateFunctionRef {
    pub column: String,
    pub function: AggregateFunction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default)]
    pub distinct: bool,
}

impl AggregateFunctionRef {
    /// Last segment of the qualified column
    pub fn column_name(&self) -> &str {
        self.column.rsplit('.').next().unwrap_or(&self.column)
    }
}

/// Raw SQL aggregate fragment, e.g. `SUM(CASE WHEN ... END)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateExpressionRef {
    pub expression: String,
    pub alias: String,
}

/// Non-aggregate derived column, e.g. `public.sales.price * public.sales.qty`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculatedColumn {
    pub expression: String,
    pub alias: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_type: Option<CanonicalType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub column: String,

    #[serde(default)]
    pub direction: SortDirection,
}
