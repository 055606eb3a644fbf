use crate::schema::{ColumnSchema, ColumnType, DestinationTableSchema, SchemaRegistry, TableName};

pub fn items_table() -> TableName {
    TableName::new("public", "items")
}

/// `public.items (pk bigint primary key, a bigint, b bigint)`.
pub fn items_schema() -> DestinationTableSchema {
    DestinationTableSchema::new(
        items_table(),
        vec![
            ColumnSchema::new("pk", ColumnType::Int8, false),
            ColumnSchema::new("a", ColumnType::Int8, true),
            ColumnSchema::new("b", ColumnType::Int8, true),
        ],
        "pk",
    )
    .expect("items schema is valid")
}

pub fn documents_table() -> TableName {
    TableName::new("public", "documents")
}

/// `public.documents (id bigint primary key, title text, body text, meta jsonb)`, where
/// `body` is a wide column that updates may leave out.
pub fn documents_schema() -> DestinationTableSchema {
    DestinationTableSchema::new(
        documents_table(),
        vec![
            ColumnSchema::new("id", ColumnType::Int8, false),
            ColumnSchema::new("title", ColumnType::Text, true),
            ColumnSchema::new("body", ColumnType::Text, true),
            ColumnSchema::new("meta", ColumnType::Jsonb, true),
        ],
        "id",
    )
    .expect("documents schema is valid")
}

/// A registry holding both test schemas.
pub fn test_registry() -> SchemaRegistry {
    SchemaRegistry::new([items_schema(), documents_schema()])
}
