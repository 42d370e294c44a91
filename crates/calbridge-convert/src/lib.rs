//! Schema-driven field conversion between provider event shapes.
//!
//! Each provider event type declares a static schema of tagged field
//! bindings. `deconvert` walks a source value into a flat tag -> value map;
//! `convert` populates a destination value from such a map. No per-pair
//! mapping code exists anywhere: two types that share a tag set can be
//! converted through the map in either direction.

pub mod engine;
pub mod error;
pub mod schema;
pub mod time;
pub mod value;

pub use engine::{convert, deconvert, deconvert_into};
pub use error::ConvertError;
pub use schema::{Binding, Composite, FieldSchema, Slot};
pub use time::{Moment, TimeCodec};
pub use value::{FieldMap, FieldValue};
