mod builder;
pub mod quote;
pub mod types;

pub use builder::{
    build_aggregate_insert, build_copy_into, build_create_table, build_delete_all,
    build_drop_table, build_merge, FileFormat,
};
pub use quote::{quote_identifier, quote_path, quote_table, string_literal};
pub use types::{cast_expression, column_type_name};
