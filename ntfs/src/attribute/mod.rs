//! NTFS attributes: record headers, attribute lists, multi-extent values.

mod buffer;
mod extents;
mod list;
mod record;
mod types;

pub use buffer::{AttributeBuffer, NonResidentBuffer};
pub use extents::{AttributeExtent, NtfsAttribute};
pub use list::{AttributeList, AttributeListRecord};
pub use record::{AttributeBody, AttributeRecord, NonResidentBody, ResidentBody};
pub use types::{AttributeFlags, AttributeType};
