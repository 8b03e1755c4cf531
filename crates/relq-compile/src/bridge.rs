//! Native ↔ portable column type mapping
//!
//! The backend hands us columns tagged with native SQL type names; plans
//! carry the portable vocabulary. Both directions are total over the
//! portable types and fail with `UnsupportedType` for anything else.

use relq_plan::{DataType, FieldType, Schema};

use crate::CompileError;

/// Column definition as the backend describes it.
#[derive(Debug, Clone)]
pub struct NativeColumn {
    pub name: String,
    pub type_tag: String,
    pub nullable: bool,
}

impl NativeColumn {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            nullable,
        }
    }
}

/// Map a native column definition to a portable field.
pub fn to_portable(column: &NativeColumn) -> Result<FieldType, CompileError> {
    let data_type = match column.type_tag.to_uppercase().as_str() {
        "TINYINT" => DataType::Int8,
        "SMALLINT" | "INT2" => DataType::Int16,
        "INTEGER" | "INT" | "INT4" => DataType::Int32,
        "BIGINT" => DataType::Int64,
        "REAL" | "FLOAT4" => DataType::Float32,
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" => DataType::Float64,
        "BOOLEAN" | "BOOL" => DataType::Bool,
        "TIMESTAMP" | "DATETIME" => DataType::Timestamp,
        "VARCHAR" | "TEXT" | "STRING" => DataType::String,
        other => {
            return Err(CompileError::UnsupportedType(format!(
                "native type '{}' for column '{}'",
                other, column.name
            )))
        }
    };
    Ok(FieldType::new(
        column.name.clone(),
        data_type,
        column.nullable,
    ))
}

/// Map a portable type to the native type tag used in CAST expressions.
pub fn to_native(data_type: &DataType) -> Result<&'static str, CompileError> {
    match data_type {
        DataType::Bool => Ok("BOOLEAN"),
        DataType::Int8 => Ok("TINYINT"),
        DataType::Int16 => Ok("SMALLINT"),
        DataType::Int32 => Ok("INTEGER"),
        DataType::Int64 => Ok("BIGINT"),
        DataType::Float32 => Ok("REAL"),
        DataType::Float64 => Ok("DOUBLE PRECISION"),
        DataType::String => Ok("VARCHAR"),
        DataType::Timestamp => Ok("TIMESTAMP"),
        DataType::Unknown => Err(CompileError::UnsupportedType(
            "cannot emit a cast for an unknown type".to_string(),
        )),
    }
}

/// Convert a full native column list to a portable schema.
pub fn schema_from_columns(columns: &[NativeColumn]) -> Result<Schema, CompileError> {
    let fields = columns
        .iter()
        .map(to_portable)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Schema::new(fields))
}
