mod field;
pub use field::{Field, FieldType, SqlType};

mod permission;
pub use permission::{AutomaticFilter, FieldPermission};

mod relation;
pub use relation::{Relation, RelationKind};

mod table;
pub use table::Table;
