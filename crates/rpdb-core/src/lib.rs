//! In-memory mirror, execution scheduler and live socket for RPdb.
//!
//! The [`Persistence`] facade keeps both entity sets of the scheduling
//! service in process-local caches, keeps them consistent in real time
//! over a socket connection and fires a callback at the instant each
//! entry is due. Reads answer with cache latency; mutations go to the
//! server first and merge their result back before observers are
//! notified.
//!
//! # Example
//!
//! ```rust,ignore
//! use rpdb_api::ApiConfig;
//! use rpdb_core::{Persistence, PersistenceOptions};
//!
//! let options = PersistenceOptions::new()
//!     .with_executor(|entry, kind| println!("run #{} ({kind:?})", entry.id));
//! let persistence = Persistence::new(ApiConfig::new("my-api-key"), options)?;
//! persistence.start().await?;
//!
//! let mut observer = persistence.register_observer();
//! while let Some(update) = observer.recv().await {
//!     println!("data changed: {update}");
//! }
//! ```

pub mod bus;
pub mod config;
pub mod persistence;
pub mod scheduler;
pub mod socket;
pub mod store;

pub use bus::{UpdateBus, UpdateObserver};
pub use config::{BeforeInitialUpdateHook, PersistenceOptions};
pub use persistence::Persistence;
pub use scheduler::{
    ExecResponseExecutor, ExecutionType, Executor, Scheduler, SchedulerOptions,
};
pub use socket::{
    reconnect_timeout, Socket, SocketOptions, DEFAULT_SOCKET_URL, KEEPALIVE_TIMEOUT,
};
pub use store::{AttributeStore, EntryStore};

// The wire model is part of this crate's public surface.
pub use rpdb_api::{self as api, ApiClient, ApiConfig, Error};
