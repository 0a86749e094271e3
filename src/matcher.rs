use crate::schedule::{Event, ScheduleSnapshot};
use std::fmt;

/// Why a recording could not be associated with a talk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoMatch {
    NoLeadingId,
    UnknownId(u64),
    /// Digits present but too large to be a talk id.
    IdOutOfRange(String),
}

impl fmt::Display for NoMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoMatch::NoLeadingId => write!(f, "no leading numeric id"),
            NoMatch::UnknownId(id) => write!(f, "id {id} not in schedule"),
            NoMatch::IdOutOfRange(digits) => write!(f, "id {digits} out of range"),
        }
    }
}

/// The maximal run of ASCII digits at the start of `filename`, if any.
pub fn leading_id(filename: &str) -> Option<&str> {
    let end = filename
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(filename.len());
    (end > 0).then(|| &filename[..end])
}

pub fn match_file<'a>(
    filename: &str,
    snapshot: &'a ScheduleSnapshot,
) -> Result<&'a Event, NoMatch> {
    let digits = leading_id(filename).ok_or(NoMatch::NoLeadingId)?;
    let id: u64 = digits
        .parse()
        .map_err(|_| NoMatch::IdOutOfRange(digits.to_string()))?;
    snapshot.get(id).ok_or(NoMatch::UnknownId(id))
}
