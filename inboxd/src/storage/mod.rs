pub mod db;
pub mod memory;

use anyhow::Result;

pub use db::SqliteStorage;
pub use memory::VolatileStorage;

/// Keyed storage of values of type `V`.
///
/// Implementations report faults as errors; callers on the mutation path log
/// them and carry on as if nothing was stored.
pub trait Storage<V>: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<V>>;

    fn put(&self, key: &str, value: &V) -> Result<()>;

    /// Removes the value, returning it if it was present
    fn remove(&self, key: &str) -> Result<Option<V>>;

    fn values(&self) -> Result<Vec<V>>;
}
