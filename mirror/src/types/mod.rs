mod change;
mod job;

pub use change::*;
pub use job::*;
pub use mirror_postgres::schema::TableName;
