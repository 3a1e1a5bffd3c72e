// Wire model of the RPdb API.

pub mod attribute;
pub mod bulk;
pub mod entry;
pub mod filter;
pub mod message;
pub mod time;
pub mod update;

pub use attribute::{
    Attribute, AttributeExecResponse, AttributeParameter, ParameterPreset, ParameterType, Right,
};
pub use bulk::{BulkData, BulkOverview, BulkResponse, BulkStatus};
pub use entry::{AttributeLink, Entry, EntryParameter, ExecutedFlag};
pub use filter::EntryFilter;
pub use message::{
    ExecutionResponse, ResponseMessage, ResponseMessageWrapper, SocketClientMessage, SocketMessage,
};
pub use time::{DateTime, NullInt, NullString, TIME_FORMAT, TIME_FORMAT_PRETTY};
pub use update::{Update, UpdateData, UpdateRequest};

/// Placeholder used in parameter filters for "any value": the position
/// is not filtered at all.
pub const PARAMETER_ANY_VALUE: &str = "<#~NotNULL~Any~#>";
