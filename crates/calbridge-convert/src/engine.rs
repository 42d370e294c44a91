//! The conversion walk: source -> flat map -> destination.

use crate::error::ConvertError;
use crate::schema::{FieldSchema, Slot};
use crate::value::FieldMap;

/// Walk a source value into a fresh flat tag -> value map.
///
/// Untagged fields are skipped entirely; unset optional fields contribute
/// nothing; nested composites contribute their tagged sub-fields in place.
pub fn deconvert<T: FieldSchema>(source: &T) -> Result<FieldMap, ConvertError> {
    let mut out = FieldMap::new();
    deconvert_into(source, &mut out)?;
    Ok(out)
}

/// Walk a source value into an existing map (used by nested composites).
pub fn deconvert_into<T: FieldSchema>(
    source: &T,
    out: &mut FieldMap,
) -> Result<(), ConvertError> {
    for slot in T::SCHEMA {
        match slot {
            Slot::Field(binding) => {
                if let Some(value) = (binding.get)(source)? {
                    out.insert(binding.tag, value);
                }
            }
            Slot::Nested(composite) => (composite.deconvert)(source, out)?,
        }
    }
    Ok(())
}

/// Populate a destination value from a flat map.
///
/// Each tagged slot is offered the value found under its tag (or `None`);
/// the slot's setter decides whether an absent tag is tolerable. Tags in
/// the map that the destination does not declare are ignored.
pub fn convert<T: FieldSchema>(dest: &mut T, fields: &FieldMap) -> Result<(), ConvertError> {
    for slot in T::SCHEMA {
        match slot {
            Slot::Field(binding) => (binding.set)(dest, fields.get(binding.tag))?,
            Slot::Nested(composite) => (composite.convert)(dest, fields)?,
        }
    }
    Ok(())
}
