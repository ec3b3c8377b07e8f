//! Entity model: schemas, tables, columns, keys and relations held in one
//! arena ([`Mart`]) and addressed by stable handles.

mod column;
mod key;
mod mart;
mod schema;
mod table;

pub use column::{Column, DatasetColumn, DatasetColumnKind, UnrolledRole};
pub use key::{Key, Relation};
pub use mart::{Mart, NAME_SEPARATOR};
pub use schema::{Dataset, PendingExpression, Schema, SchemaKind, SourceSettings};
pub use table::{DatasetTableInfo, Table};

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            JsonSchema,
        )]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Handle of a source schema or dataset.
    SchemaId,
    "s"
);
entity_id!(
    /// Handle of a source or generated table.
    TableId,
    "t"
);
entity_id!(
    /// Handle of a source or generated column.
    ColumnId,
    "c"
);
entity_id!(KeyId, "k");
entity_id!(RelationId, "r");
