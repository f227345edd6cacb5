//! Topic templates
//!
//! Templates such as `rtl_433/[hostname]/devices[/type][/model][/id]` are
//! compiled once at startup into a [`TopicTemplate`] and expanded per record
//! against a [`WellKnownFields`] index.

pub mod index;
pub mod template;

pub use index::{WellKnownFields, WellKnownKey};
pub use template::{TemplateError, TokenName, TopicTemplate};
