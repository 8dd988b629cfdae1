use crate::bulkload::{ColumnDescriptor, SqlType};

/// Warehouse type name for a column, used both in DDL and in COPY casts.
///
/// Unsupported types are passed through untouched; the warehouse rejects them at
/// load time.
pub fn column_type_name(column: &ColumnDescriptor) -> String {
    if let Some(declared) = &column.declared_type {
        return declared.clone();
    }

    match column.simple_type_name.as_str() {
        "CLOB" => return "STRING".to_string(),
        "DOUBLE PRECISION" => return "DOUBLE".to_string(),
        // Without this FLOAT would be declared as FLOAT(n).
        "FLOAT" => return "FLOAT".to_string(),
        _ => {}
    }

    let name = &column.simple_type_name;
    match column.sql_type {
        SqlType::Char | SqlType::Varchar | SqlType::Binary | SqlType::Varbinary
            if column.size > 0 =>
        {
            format!("{}({})", name, column.size)
        }
        SqlType::Decimal | SqlType::Numeric if column.size > 0 => format!(
            "{}({},{})",
            name,
            column.size,
            column.decimal_digits.unwrap_or(0)
        ),
        _ => name.clone(),
    }
}

/// Positional cast of staged column `index`: `_c{index}::<type>`.
pub fn cast_expression(index: usize, column: &ColumnDescriptor) -> String {
    format!("_c{}::{}", index, column_type_name(column))
}
