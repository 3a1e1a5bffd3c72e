//! Typed REST client and wire model for the RPdb scheduling service.
//!
//! This crate covers the request/response surface only: building
//! authenticated requests, decoding the wire shapes and mapping error
//! responses. Caching, live updates over the socket and execution
//! scheduling live in `rpdb-core` on top of this.
//!
//! # Example
//!
//! ```rust,ignore
//! use rpdb_api::{ApiClient, ApiConfig, EntryFilter};
//!
//! let client = ApiClient::new(ApiConfig::new("my-api-key"))?;
//! let entries = client.get_entries(&EntryFilter::default()).await?;
//! for entry in &entries {
//!     println!("#{} at {}", entry.id, entry.date_time.format_pretty());
//! }
//! ```

pub mod client;
pub mod error;
pub mod model;
pub mod transport;

pub use client::{ApiClient, EntryDeleteFiltered};
pub use error::{Error, RemoteErrorBody, RemoteErrorDebug};
pub use transport::{ApiConfig, CLIENT_VERSION, DEFAULT_BASE_URL};

// Re-export the model types at the crate root for ergonomics.
pub use model::{
    Attribute, AttributeExecResponse, AttributeLink, AttributeParameter, BulkData, BulkOverview,
    BulkResponse, BulkStatus, DateTime, Entry, EntryFilter, EntryParameter, ExecutionResponse,
    NullInt, NullString, ParameterPreset, ParameterType, ResponseMessage, ResponseMessageWrapper,
    Right, SocketClientMessage, SocketMessage, Update, UpdateData, UpdateRequest,
    PARAMETER_ANY_VALUE,
};
