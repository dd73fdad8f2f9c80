pub mod datastore;

pub use datastore::{
    BufferedSnapshotDocuments, BulkWriter, BulkWriterJob, BulkWriterJobResolver, CollectionHandle,
    Datastore, DriverCall, DriverOperation, InMemoryDatastore, SnapshotDocuments, SnapshotStream,
};
