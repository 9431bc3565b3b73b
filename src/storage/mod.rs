mod kv_store;
mod mem_store;
mod sled_store;


#[doc(hidden)]
pub use kv_store::*;
#[doc(hidden)]
pub use mem_store::*;
#[doc(hidden)]
pub use sled_store::*;

use std::path::Path;

use tracing::debug;
use tracing::warn;

/// Opens the control plane database under `db_path`.
///
/// The lock, event and applog namespaces are trees inside this single
/// database. sled holds an exclusive file lock on `db_path`, so only one
/// process can open it; every component of that process shares the handle.
pub fn init_sled_db(
    db_path: impl AsRef<Path> + std::fmt::Debug
) -> std::result::Result<sled::Db, std::io::Error> {
    debug!("init_sled_db from path: {:?}", &db_path);

    sled::Config::default()
        .path(db_path.as_ref())
        .cache_capacity(64 * 1024 * 1024) //64MB
        .flush_every_ms(Some(3))
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            warn!("Try to open DB at this location: {:?} and failed: {:?}", db_path, e);
            std::io::Error::other(e)
        })
}
