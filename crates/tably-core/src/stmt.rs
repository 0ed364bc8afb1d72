mod document;
pub use document::Document;

mod op;
pub use op::CmpOp;

mod value;
pub use value::Value;
