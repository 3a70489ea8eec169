pub mod apply_engine;
pub mod apply_service;
pub mod dialect; // Identifier and literal quoting per target dialect
pub mod query_compiler;
pub mod row_estimator;
pub mod schema_mapper;

pub use apply_engine::*;
pub use apply_service::*;
pub use dialect::*;
pub use query_compiler::*;
pub use row_estimator::*;
pub use schema_mapper::*;
