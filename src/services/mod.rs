pub mod catalog;
pub mod locks;
pub mod registry;
pub mod tiered_fs;

pub use catalog::{CatalogEntry, MetadataCatalog, SqliteFileCatalog, TimeWindow};
pub use locks::{InMemoryLockService, LockService, ObjectLock, SqliteLockService};
pub use registry::ObjectRegistry;
pub use tiered_fs::{TieredFileSystem, Transfer};
