pub mod change_feed;
pub mod db;
pub mod local_identity;
pub mod memory;

pub use change_feed::PgChangeFeed;
pub use db::DbAdapter;
pub use local_identity::LocalIdentityStore;
pub use memory::MemoryBackend;
