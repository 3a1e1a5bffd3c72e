// Attribute entities: the named groupings entries belong to.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Grouping of entries to a shared executable operation.
///
/// Every entry references exactly one attribute. The attribute decides
/// whether its entries fire once or always (`execute_always`), whether
/// they are ever persisted server-side (`no_db`) and whether executing
/// them requires returning a response (`execution_response`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Attribute {
    /// Unique id of the attribute.
    pub id: i64,

    /// Name of the attribute, unique within the account.
    pub name: String,

    /// Entries of this attribute stay executable even when their date
    /// is past, until the client registers them as executed.
    pub execute_always: bool,

    /// The entry is never written to server storage; it is sent once
    /// over the socket connection only.
    pub no_db: bool,

    /// A response message and code is expected back from the client
    /// immediately after the entry was executed.
    pub execution_response: AttributeExecResponse,

    /// Rights of the authenticated key for entries of this attribute.
    pub rights: Right,

    /// Default right applied when not overwritten per key.
    pub default_right: Right,

    /// Parameter definitions available for this attribute (up to six).
    pub parameters: Vec<AttributeParameter>,

    /// Server-side sort weight.
    pub sort_order: i64,
}

impl Attribute {
    /// A stub carrying only the id, as delivered inside entries when
    /// the server does not expand shared resources.
    pub fn stub(id: i64) -> Self {
        Attribute {
            id,
            ..Attribute::default()
        }
    }

    /// Find a parameter definition by its id.
    pub fn parameter(&self, id: i64) -> Option<&AttributeParameter> {
        self.parameters.iter().find(|p| p.id == id)
    }
}

/// Parameter definition of an attribute.
///
/// In an execution context these are the arguments passed to the
/// program, ordered by `position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AttributeParameter {
    /// Unique id of the parameter.
    pub id: i64,

    /// Unique name of the parameter within the attribute.
    pub name: String,

    /// Position in an execution context, 1 through 6.
    pub position: u8,

    /// Data type of the parameter.
    #[serde(rename = "type")]
    pub parameter_type: ParameterType,

    /// Only predefined preset values may be used for this parameter.
    pub force_preset: bool,

    /// Predefined values for this parameter.
    pub presets: Vec<ParameterPreset>,
}

impl AttributeParameter {
    /// Look up a preset by name, case-insensitively.
    pub fn preset(&self, name: &str) -> Option<&ParameterPreset> {
        self.presets.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// A predefined value for an attribute parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ParameterPreset {
    /// Unique name of the preset within the parameter.
    pub name: String,

    /// Short abbreviation of the preset name.
    #[serde(rename = "name_short")]
    pub short_name: String,

    /// The underlying value used for executions.
    pub value: String,

    /// Server-side sort weight.
    pub sort_order: i64,
}

/// Behaviour of the "execution response" attribute flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AttributeExecResponse {
    /// Whether the server expects a response after execution.
    pub enabled: bool,

    /// Entries may also be scheduled with a delayed execution time.
    /// By default the execution time has to be "now".
    pub allow_delayed_execution: bool,

    /// Default number of seconds to wait for an execution response.
    pub default_timeout: i64,
}

/// Access right of the authenticated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Right {
    None,
    #[default]
    All,
    Read,
    Write,
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Right::None => "none",
            Right::All => "all",
            Right::Read => "read",
            Right::Write => "write",
        };
        f.write_str(s)
    }
}

/// Data type of an attribute parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    Text,
    Number,
    Boolean,
}

// ── Tests ────────────────────────────────────────────────────────────
