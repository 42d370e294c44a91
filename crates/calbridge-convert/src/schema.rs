//! Static per-type field descriptors.
//!
//! A schema is a flat list of slots. A tagged slot binds one cross-provider
//! tag to a getter and a setter; a composite slot delegates to a nested
//! struct whose own tagged fields land in the same flat map. Fields without
//! a slot are provider-private and never cross the conversion boundary.

use crate::error::ConvertError;
use crate::value::{FieldMap, FieldValue};

/// One tagged field of a convertible type.
///
/// The getter returns `None` for an unset optional field, which the engine
/// skips rather than defaults. The setter receives the looked-up value (or
/// `None` when the tag is absent from the map) and owns the policy for the
/// absent case: plain text fields leave the current value in place,
/// date/time fields fail.
pub struct Binding<T: 'static> {
    pub tag: &'static str,
    pub get: fn(&T) -> Result<Option<FieldValue>, ConvertError>,
    pub set: fn(&mut T, Option<&FieldValue>) -> Result<(), ConvertError>,
}

/// A nested composite field whose sub-schema contributes tags in place.
pub struct Composite<T: 'static> {
    pub deconvert: fn(&T, &mut FieldMap) -> Result<(), ConvertError>,
    pub convert: fn(&mut T, &FieldMap) -> Result<(), ConvertError>,
}

/// One entry of a type's schema.
pub enum Slot<T: 'static> {
    Field(Binding<T>),
    Nested(Composite<T>),
}

/// A type that can be converted through the flat field map.
pub trait FieldSchema: Sized + 'static {
    const SCHEMA: &'static [Slot<Self>];
}
