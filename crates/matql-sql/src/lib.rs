//! Validation, compilation and literal encoding for MATQL query documents

pub mod compile;
pub mod literal;
pub mod naming;
pub mod validate;

pub use compile::{CompileError, CompiledQuery, Compiler, OutputColumn, OutputSource};
pub use literal::{coerce, encode};
pub use naming::{aggregate_name, destination_name};
pub use validate::{complete_grouping, GroupingError, GroupingPolicy, Validator};
