//! Query processing toolkit: statement splitting, pagination/EXPLAIN
//! rewriting, validation, and export rendering.

pub mod export;
pub mod paginate;
pub mod split;
pub mod validate;

pub use export::{render_csv, render_json, ExportFormat};
pub use paginate::{apply_pagination, is_select_like, rewrite_as_explain};
pub use split::split_statements;
pub use validate::{
    detect_destructive_statement, enforce_isolation, validate_query, ValidationContext,
};
