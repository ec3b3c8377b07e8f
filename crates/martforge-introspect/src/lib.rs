//! Source collaborators: relational introspection and bounded row access.

pub mod adapter;
pub mod memory;
pub mod options;
pub mod postgres;

pub use adapter::{ExportedKey, RowSource, SchemaScope, SourceIntrospector};
pub use memory::MemorySource;
pub use options::IntrospectOptions;
pub use postgres::PostgresAdapter;
