//! Transformation between the staging and warehouse layers.
//!
//! - [`expansion`]: schedule records to dated occurrences
//! - [`rules`]: per-entity dispatch (expansion, date coercion, deduplication)

pub mod dates;
pub mod expansion;
pub mod rules;
pub mod schedule;

pub use dates::DateParser;
pub use expansion::{expand, expand_all, Occurrence};
pub use rules::{EntityKind, RuleSet, TransformOutput};
pub use schedule::{Schedule, WeekdaySet};
