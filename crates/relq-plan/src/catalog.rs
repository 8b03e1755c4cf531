//! Catalog trait for base-table schema lookup

use std::collections::HashMap;

use crate::Schema;

/// Trait for resolving base-table schemas when building plans
pub trait Catalog {
    /// Get the schema for a table by name
    fn table_schema(&self, table: &str) -> Result<Schema, String>;
}

/// In-memory catalog for testing and embedding
pub struct MemoryCatalog {
    tables: HashMap<String, Schema>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn add_table(&mut self, name: impl Into<String>, schema: Schema) {
        self.tables.insert(name.into(), schema);
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog for MemoryCatalog {
    fn table_schema(&self, table: &str) -> Result<Schema, String> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| format!("Table '{}' not found", table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;

    #[test]
    fn test_memory_catalog_lookup() {
        let mut catalog = MemoryCatalog::new();
        catalog.add_table(
            "users",
            Schema::of(&[("id", DataType::Int64), ("name", DataType::String)]),
        );

        let schema = catalog.table_schema("users").unwrap();
        assert_eq!(schema.fields.len(), 2);

        assert!(catalog.table_schema("missing").is_err());
    }
}
