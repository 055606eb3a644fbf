mod registry;

pub use mirror_postgres::schema::{
    ColumnSchema, ColumnType, DestinationTableSchema, SchemaError, TableName,
};
pub use registry::*;
