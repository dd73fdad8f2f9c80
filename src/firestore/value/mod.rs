mod array_value;
mod json;
mod map_value;
mod value;

pub use array_value::ArrayValue;
pub use json::{map_from_json, map_to_json};
pub use map_value::MapValue;
pub use value::{FirestoreValue, SentinelValue, ValueKind};
