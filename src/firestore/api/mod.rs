mod aggregate;
mod bulk_writer;
mod query;
mod reference;
mod snapshot;
mod store;
mod update;
mod watch;

pub use aggregate::{AggregateDefinition, Aggregation};
pub use bulk_writer::{BulkWriteOutcome, BulkWriterSession};
pub use query::{build_query, FilterOperator, Query, QueryParameter};
pub use reference::DocumentReference;
pub use snapshot::DocumentSnapshot;
pub use store::{DocumentData, GenericStore};
pub use update::FieldUpdate;
pub use watch::{WatchHandle, WatchState};
