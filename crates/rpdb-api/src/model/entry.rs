// Entry entities: single scheduled execution units.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use super::attribute::Attribute;
use super::message::ResponseMessage;
use super::time::{local_now, DateTime, NullInt, NullString};

/// A single scheduled execution with parameters and two time fields.
///
/// `date_time` is the instant given at creation; `date_time_execution`
/// is the effective instant derived server-side from the key's
/// execution offset. Entries returned by the cache are shared read-only
/// snapshots; only the execution flag is mutable through a shared
/// reference.
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Entry {
    /// Unique id of the entry.
    pub id: i64,

    /// The attribute this entry belongs to. Delivered as an id-only
    /// stub when the server does not expand shared resources; the
    /// cache replaces the stub with its owned instance.
    pub attribute: AttributeLink,

    /// The date and time given at entry creation.
    pub date_time: DateTime,

    /// When the entry should actually be executed
    /// (`date_time` + the key's execution offset).
    pub date_time_execution: DateTime,

    /// Parameter values of the entry, ordered by parameter position.
    pub parameters: Vec<EntryParameter>,

    /// Id of the key which created the entry.
    pub creator: i64,

    /// Operation summary returned by mutating calls.
    pub message: ResponseMessage,

    // Creation-only transport fields. Never persisted in the cache. //
    /// Relative time instead of an absolute one, e.g. `"+20m"` or `"now"`.
    pub offset: String,

    /// Zero the seconds when resolving `offset`.
    pub full_minutes: bool,

    /// Keep the provided date when the offset overflows the day.
    #[serde(rename = "keep_date_on_overflow")]
    pub keep_date: bool,

    /// Per-field offset pattern, an extension of `offset` covering every
    /// component of the ISO-8601 string (weekdays included).
    pub offset_pattern: String,

    /// Maximum seconds to wait for an execution response (max 60).
    pub timeout: NullInt,

    // Execution-response transport fields. //
    /// Id of the entry an execution response belongs to.
    #[serde(rename = "entry_id")]
    pub execution_response_id: i64,

    /// Response code of the execution.
    pub response_code: i64,

    /// Response message of the execution.
    pub response: String,

    /// Whether this client already executed the entry. Local only.
    #[serde(skip)]
    pub executed: ExecutedFlag,
}

impl Entry {
    /// Whether this client already executed the entry.
    pub fn was_executed(&self) -> bool {
        self.executed.get()
    }

    /// Store the execution flag. Safe through a shared reference.
    pub fn set_executed(&self, executed: bool) {
        self.executed.set(executed);
    }

    /// Whether all time fields of this entry lie in the past.
    ///
    /// An entry without a `date_time` is never past. The execution time
    /// can be excluded from the check.
    pub fn is_past(&self, ignore_execution_time: bool) -> bool {
        if !self.date_time.is_set() {
            return false;
        }
        let now = local_now();
        self.date_time.before(now)
            && (ignore_execution_time
                || !self.date_time_execution.is_set()
                || self.date_time_execution.before(now))
    }

    /// The instant the entry should be executed at: the execution time
    /// when set (and not ignored), the plain date otherwise.
    pub fn execution_time(&self, ignore_execution_time: bool) -> DateTime {
        if ignore_execution_time || !self.date_time_execution.is_set() {
            self.date_time
        } else {
            self.date_time_execution
        }
    }

    /// Whether the entry should be executed right now.
    ///
    /// True when the effective time lies within a window of −2.0 s to
    /// +0.5 s around the current instant, or — for attributes with
    /// `execute_always` — whenever the effective time is past. Already
    /// executed entries never qualify again.
    pub fn should_execute_now(&self) -> bool {
        if self.was_executed() {
            return false;
        }

        let effective = self.execution_time(false);
        if !effective.is_set() {
            return false;
        }

        let now = local_now();
        if self.attribute.get().execute_always && effective.before(now) {
            return true;
        }

        let offset = effective.seconds_until(now);
        (-2.0..=0.5).contains(&offset)
    }
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Entry {
            id: self.id,
            attribute: self.attribute.clone(),
            date_time: self.date_time,
            date_time_execution: self.date_time_execution,
            parameters: self.parameters.clone(),
            creator: self.creator,
            message: self.message.clone(),
            offset: self.offset.clone(),
            full_minutes: self.full_minutes,
            keep_date: self.keep_date,
            offset_pattern: self.offset_pattern.clone(),
            timeout: self.timeout,
            execution_response_id: self.execution_response_id,
            response_code: self.response_code,
            response: self.response.clone(),
            executed: self.executed.clone(),
        }
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.attribute == other.attribute
            && self.date_time == other.date_time
            && self.date_time_execution == other.date_time_execution
            && self.parameters == other.parameters
            && self.creator == other.creator
            && self.offset == other.offset
            && self.full_minutes == other.full_minutes
            && self.keep_date == other.keep_date
            && self.offset_pattern == other.offset_pattern
            && self.timeout == other.timeout
    }
}

// ── ExecutedFlag ─────────────────────────────────────────────────────

/// Interior-mutable execution marker of an entry.
///
/// Writable through a shared reference so the flag can be flipped while
/// the entry sits inside the cache. Cloning copies the current value.
#[derive(Debug, Default)]
pub struct ExecutedFlag(AtomicBool);

impl ExecutedFlag {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

impl Clone for ExecutedFlag {
    fn clone(&self) -> Self {
        ExecutedFlag(AtomicBool::new(self.get()))
    }
}

// ── AttributeLink ────────────────────────────────────────────────────

/// Shared reference from an entry to its attribute.
///
/// Holds the wire stub until the cache links the entry, after which it
/// points at the instance owned by the attribute cache. Relinking is
/// safe through a shared reference.
pub struct AttributeLink {
    inner: RwLock<Arc<Attribute>>,
}

impl AttributeLink {
    pub fn new(attribute: Attribute) -> Self {
        AttributeLink {
            inner: RwLock::new(Arc::new(attribute)),
        }
    }

    /// A link carrying only the attribute id.
    pub fn by_id(id: i64) -> Self {
        AttributeLink::new(Attribute::stub(id))
    }

    /// Id of the referenced attribute.
    pub fn id(&self) -> i64 {
        self.get().id
    }

    /// The currently referenced attribute. This is the cache-owned
    /// instance once the entry was linked, the wire stub before.
    pub fn get(&self) -> Arc<Attribute> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Point this link at the given (cache-owned) attribute.
    pub fn link(&self, attribute: Arc<Attribute>) {
        match self.inner.write() {
            Ok(mut guard) => *guard = attribute,
            Err(poisoned) => *poisoned.into_inner() = attribute,
        }
    }
}

impl Default for AttributeLink {
    fn default() -> Self {
        AttributeLink::by_id(0)
    }
}

impl Clone for AttributeLink {
    fn clone(&self) -> Self {
        AttributeLink {
            inner: RwLock::new(self.get()),
        }
    }
}

impl PartialEq for AttributeLink {
    fn eq(&self, other: &Self) -> bool {
        *self.get() == *other.get()
    }
}

impl std::fmt::Debug for AttributeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let attr = self.get();
        f.debug_struct("AttributeLink")
            .field("id", &attr.id)
            .field("name", &attr.name)
            .finish()
    }
}

impl From<Attribute> for AttributeLink {
    fn from(attribute: Attribute) -> Self {
        AttributeLink::new(attribute)
    }
}

impl Serialize for AttributeLink {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttributeLink {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Attribute::deserialize(deserializer).map(AttributeLink::new)
    }
}

// ── EntryParameter ───────────────────────────────────────────────────

/// Value of a single attribute parameter within an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EntryParameter {
    /// Reference to the attribute's parameter definition. Not required
    /// for creation, where the position within the array decides.
    pub parameter_id: i64,

    /// Raw value of the parameter. Null when a preset is used.
    pub value: NullString,

    /// Name of the parameter preset to use; overrides `value`.
    pub preset: NullString,
}

impl EntryParameter {
    /// Shorthand for a raw-value parameter.
    pub fn with_value(value: impl Into<String>) -> Self {
        EntryParameter {
            value: NullString::new(value),
            ..EntryParameter::default()
        }
    }

    /// Shorthand for a preset-named parameter.
    pub fn with_preset(name: impl Into<String>) -> Self {
        EntryParameter {
            preset: NullString::new(name),
            ..EntryParameter::default()
        }
    }

    /// The value to pass to an executing program: the preset's value
    /// when a preset name is set, the raw value otherwise. Unresolvable
    /// presets are logged and yield an empty value.
    pub fn value_for_execution(&self, attribute: &Attribute) -> String {
        let Some(preset_name) = self.preset.as_deref() else {
            return self.value.as_deref().unwrap_or_default().to_string();
        };

        if let Some(parameter) = attribute.parameter(self.parameter_id) {
            if let Some(preset) = parameter.preset(preset_name) {
                return preset.value.clone();
            }
            warn!(
                attribute = %attribute.name,
                preset = preset_name,
                "no parameter preset with that name"
            );
        } else {
            warn!(
                attribute = %attribute.name,
                parameter_id = self.parameter_id,
                "no parameter with that id"
            );
        }

        String::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
