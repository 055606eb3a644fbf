use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use pg_escape::quote_identifier;
use thiserror::Error;

/// Errors raised while building table schemas.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The name is not of the form `schema.table`.
    #[error("table name `{0}` must be of the form `schema.table`")]
    InvalidTableName(String),

    /// The designated primary key column is not part of the column list.
    #[error("primary key column `{column}` is not a column of table {table}")]
    UnknownPrimaryKey { table: String, column: String },

    /// The same column name appears more than once.
    #[error("column `{column}` appears more than once in table {table}")]
    DuplicateColumn { table: String, column: String },
}

/// A schema qualified Postgres table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parses `schema.table`, rejecting unqualified or ambiguous names such as `table` or
    /// `db.schema.table`.
    pub fn parse(value: &str) -> Result<TableName, SchemaError> {
        let invalid = || SchemaError::InvalidTableName(value.to_owned());

        let (schema, name) = value.split_once('.').ok_or_else(invalid)?;
        if schema.is_empty() || name.is_empty() || name.contains('.') {
            return Err(invalid());
        }

        Ok(TableName::new(schema, name))
    }

    /// Returns `"schema"."table"` quoted for use in SQL.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl FromStr for TableName {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableName::parse(s)
    }
}

/// Column types supported in destination tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytea,
    Json,
    Jsonb,
    Uuid,
    Date,
    Timestamp,
    TimestampTz,
}

impl ColumnType {
    /// Returns the Postgres type name used in DDL and casts.
    pub fn as_pg_type(&self) -> &'static str {
        match self {
            ColumnType::Bool => "boolean",
            ColumnType::Int2 => "smallint",
            ColumnType::Int4 => "integer",
            ColumnType::Int8 => "bigint",
            ColumnType::Float4 => "real",
            ColumnType::Float8 => "double precision",
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Bytea => "bytea",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
            ColumnType::Uuid => "uuid",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::TimestampTz => "timestamptz",
        }
    }

    /// Maps a catalog type name (as returned by `format_type`) to a [`ColumnType`].
    ///
    /// Unknown types fall back to [`ColumnType::Text`].
    pub fn from_pg_type(type_name: &str) -> ColumnType {
        match type_name {
            "boolean" | "bool" => ColumnType::Bool,
            "smallint" | "int2" => ColumnType::Int2,
            "integer" | "int" | "int4" => ColumnType::Int4,
            "bigint" | "int8" => ColumnType::Int8,
            "real" | "float4" => ColumnType::Float4,
            "double precision" | "float8" => ColumnType::Float8,
            "bytea" => ColumnType::Bytea,
            "json" => ColumnType::Json,
            "jsonb" => ColumnType::Jsonb,
            "uuid" => ColumnType::Uuid,
            "date" => ColumnType::Date,
            "timestamp without time zone" | "timestamp" => ColumnType::Timestamp,
            "timestamp with time zone" | "timestamptz" => ColumnType::TimestampTz,
            other if other.starts_with("numeric") => ColumnType::Numeric,
            _ => ColumnType::Text,
        }
    }
}

/// A column of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: ColumnType, nullable: bool) -> ColumnSchema {
        Self {
            name: name.into(),
            typ,
            nullable,
        }
    }
}

/// Ordered columns of a destination table together with its single primary key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTableSchema {
    pub name: TableName,
    pub columns: Vec<ColumnSchema>,
    primary_key_index: usize,
}

impl DestinationTableSchema {
    /// Builds a schema, checking that column names are unique and that `primary_key` names
    /// one of the columns.
    pub fn new(
        name: TableName,
        columns: Vec<ColumnSchema>,
        primary_key: impl Into<String>,
    ) -> Result<DestinationTableSchema, SchemaError> {
        let primary_key = primary_key.into();

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: name.to_string(),
                    column: column.name.clone(),
                });
            }
        }

        let Some(primary_key_index) = columns
            .iter()
            .position(|column| column.name == primary_key)
        else {
            return Err(SchemaError::UnknownPrimaryKey {
                table: name.to_string(),
                column: primary_key,
            });
        };

        Ok(Self {
            name,
            columns,
            primary_key_index,
        })
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key_column().name
    }

    pub fn primary_key_column(&self) -> &ColumnSchema {
        &self.columns[self.primary_key_index]
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|column| column.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_columns() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("id", ColumnType::Int8, false),
            ColumnSchema::new("name", ColumnType::Text, true),
            ColumnSchema::new("avatar", ColumnType::Bytea, true),
        ]
    }

    #[test]
    fn parse_requires_exactly_one_qualifier() {
        assert_eq!(
            TableName::parse("public.users").unwrap(),
            TableName::new("public", "users")
        );

        for invalid in ["users", "db.public.users", ".users", "public.", ""] {
            assert_eq!(
                TableName::parse(invalid),
                Err(SchemaError::InvalidTableName(invalid.to_owned()))
            );
        }
    }

    #[test]
    fn quoted_identifier_escapes_both_parts() {
        let name = TableName::new("Sales", "order items");
        assert_eq!(name.as_quoted_identifier(), r#""Sales"."order items""#);
        assert_eq!(name.to_string(), "Sales.order items");
    }

    #[test]
    fn schema_requires_known_primary_key() {
        let name = TableName::new("public", "users");
        let err = DestinationTableSchema::new(name.clone(), users_columns(), "email").unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownPrimaryKey {
                table: "public.users".to_owned(),
                column: "email".to_owned()
            }
        );

        let schema = DestinationTableSchema::new(name, users_columns(), "id").unwrap();
        assert_eq!(schema.primary_key_column().typ, ColumnType::Int8);
        assert_eq!(
            schema.column_names().collect::<Vec<_>>(),
            vec!["id", "name", "avatar"]
        );
    }

    #[test]
    fn schema_rejects_duplicate_columns() {
        let mut columns = users_columns();
        columns.push(ColumnSchema::new("name", ColumnType::Text, true));

        let err =
            DestinationTableSchema::new(TableName::new("public", "users"), columns, "id").unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateColumn { ref column, .. } if column == "name"));
    }

    #[test]
    fn catalog_types_map_to_column_types() {
        assert_eq!(ColumnType::from_pg_type("numeric(10,2)"), ColumnType::Numeric);
        assert_eq!(
            ColumnType::from_pg_type("timestamp with time zone"),
            ColumnType::TimestampTz
        );
        assert_eq!(ColumnType::from_pg_type("citext"), ColumnType::Text);
    }
}
