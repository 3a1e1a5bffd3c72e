// Entry filtering: the query shape sent to the server and the local
// predicate used when the cache can answer without a request.

use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use super::entry::Entry;
use super::time::{local_now, NullString};
use super::PARAMETER_ANY_VALUE;

/// Filter conditions for entry queries.
///
/// An empty filter matches every entry. Date expressions (`pattern`,
/// `later_than`, `earlier_than`) and `old_dates` are resolved by the
/// server only; everything else can also be evaluated in-process via
/// [`matches`](EntryFilter::matches).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EntryFilter {
    /// Only entries whose id is contained in this list.
    pub ids: Vec<i64>,

    /// Only entries belonging to one of these attributes.
    #[serde(rename = "attribute")]
    pub attributes: Vec<i64>,

    /// Per-position matchers for parameter values or preset names.
    /// A null member accepts any value at that position; an absent list
    /// skips parameter filtering entirely.
    #[serde(serialize_with = "serialize_parameters")]
    pub parameters: Option<Vec<NullString>>,

    /// Only entries created by this key id (0 = no condition).
    pub creator: i64,

    /// Server-side date offset pattern, wildcards allowed.
    #[serde(rename = "pattern")]
    pub date_pattern: String,

    /// Server-side "date later than" expression (instant or offset).
    pub later_than: String,

    /// Server-side "date earlier than" expression (instant or offset).
    pub earlier_than: String,

    /// Also return entries whose dates are already past.
    pub old_dates: bool,

    /// Ignore the `execute_always` flag for all attributes.
    #[serde(rename = "ignore_execute_always")]
    pub ignore_ea: bool,

    /// Ignore the `execute_always` flag for these attributes.
    #[serde(rename = "ignore_execute_always_attribute")]
    pub ignore_ea_attributes: Vec<i64>,

    /// Maximum number of entries to return (server caps at 200).
    pub max_entries: i64,

    /// Ids of `execute_always` entries this client already executed.
    pub executed: Vec<i64>,

    /// Which date field gates past entries:
    /// 0 = both fields, 1 = `date_time` only, 2 = `date_time_execution` only.
    #[serde(rename = "IgnoreExecutionDate")]
    pub ignore_execution_date: u8,
}

/// Null parameter matchers travel as the "any value" placeholder.
fn serialize_parameters<S: Serializer>(
    parameters: &Option<Vec<NullString>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match parameters {
        None => serializer.serialize_none(),
        Some(list) => {
            let mut seq = serializer.serialize_seq(Some(list.len()))?;
            for p in list {
                seq.serialize_element(p.as_deref().unwrap_or(PARAMETER_ANY_VALUE))?;
            }
            seq.end()
        }
    }
}

impl EntryFilter {
    /// Whether this filter carries no condition at all.
    pub fn is_zero(&self) -> bool {
        self == &EntryFilter::default()
    }

    /// Whether the filtering can be evaluated in-process by plain
    /// comparisons, without asking the server.
    pub fn can_handle_locally(&self) -> bool {
        self.date_pattern.is_empty()
            && self.later_than.is_empty()
            && self.earlier_than.is_empty()
            && !self.old_dates
    }

    /// Evaluate the filter against a single entry.
    ///
    /// Only meaningful when [`can_handle_locally`](Self::can_handle_locally)
    /// holds; server-side date expressions are not interpreted here.
    pub fn matches(&self, entry: &Entry) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&entry.id) {
            return false;
        }

        let attribute = entry.attribute.get();
        if !self.attributes.is_empty() && !self.attributes.contains(&attribute.id) {
            return false;
        }

        if let Some(wanted) = &self.parameters {
            for (i, parameter) in entry.parameters.iter().enumerate() {
                // No matcher for this position anymore, the rest is free.
                let Some(matcher) = wanted.get(i) else { break };

                // A null matcher accepts any value.
                let Some(expected) = matcher.as_deref() else {
                    continue;
                };

                let value_matches = parameter
                    .value
                    .as_deref()
                    .is_some_and(|v| v == expected);
                let preset_matches = parameter
                    .preset
                    .as_deref()
                    .is_some_and(|p| p.eq_ignore_ascii_case(expected));

                if value_matches || preset_matches {
                    continue;
                }

                if expected.is_empty()
                    && parameter.value.is_null()
                    && parameter.preset.is_null()
                {
                    // Matcher and entry parameter are both null.
                    continue;
                }

                // The matcher may name the underlying value of the
                // entry's preset instead of the preset name itself.
                if let Some(preset_name) = parameter.preset.as_deref() {
                    if let Some(definition) = attribute.parameters.get(i) {
                        return definition
                            .preset(preset_name)
                            .is_some_and(|preset| preset.value == expected);
                    }
                }

                return false;
            }
        }

        if self.creator != 0 && self.creator != entry.creator {
            return false;
        }

        // Past entries of execute-always attributes stay visible unless
        // the filter opts out of that behaviour.
        let ignore_ea = self.ignore_ea || self.ignore_ea_attributes.contains(&attribute.id);
        let ea_keeps_entry = attribute.execute_always && !ignore_ea;

        let now = local_now();
        let past = match self.ignore_execution_date {
            1 => entry.date_time.before(now),
            2 => entry.date_time_execution.before(now),
            _ => entry.date_time.before(now) && entry.date_time_execution.before(now),
        };

        !(past && !ea_keeps_entry)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
