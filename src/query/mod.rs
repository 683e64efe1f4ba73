pub mod compile;
pub mod expr;
pub mod runtime;

pub use compile::{escape_tag, CompiledSearch, QueryCompiler, SearchOptions, SortSpec, VEC_SCORE_ALIAS};
pub use expr::{field, CompareOp, Expr, Field, GeoUnit, QueryValue};
pub use runtime::{Partial, Query};
