use crate::codec::{
    string_bytes_length, write_bool, write_f64, write_i32, write_string, write_u32, ByteReader,
    ProtoError,
};
use crate::entity::EntityId;
use crate::registry::Registry;

/// The value kinds a property slot can hold. Resolved from the property URN
/// through the [`Registry`] when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Int,
    Double,
    Bool,
    Str,
    IntList,
    Ref,
    RefList,
}

impl PropertyKind {
    pub fn name(self) -> &'static str {
        match self {
            PropertyKind::Int => "int",
            PropertyKind::Double => "double",
            PropertyKind::Bool => "bool",
            PropertyKind::Str => "string",
            PropertyKind::IntList => "int-list",
            PropertyKind::Ref => "entity-ref",
            PropertyKind::RefList => "entity-ref-list",
        }
    }
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i32),
    Double(f64),
    Bool(bool),
    Str(String),
    IntList(Vec<i32>),
    Ref(EntityId),
    RefList(Vec<EntityId>),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Double(_) => PropertyKind::Double,
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::Str(_) => PropertyKind::Str,
            PropertyValue::IntList(_) => PropertyKind::IntList,
            PropertyValue::Ref(_) => PropertyKind::Ref,
            PropertyValue::RefList(_) => PropertyKind::RefList,
        }
    }

    pub fn bytes_length(&self) -> usize {
        match self {
            PropertyValue::Int(_) => 4,
            PropertyValue::Double(_) => 8,
            PropertyValue::Bool(_) => 1,
            PropertyValue::Str(value) => string_bytes_length(value),
            PropertyValue::IntList(values) => 4 + 4 * values.len(),
            PropertyValue::Ref(_) => 4,
            PropertyValue::RefList(ids) => 4 + 4 * ids.len(),
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            PropertyValue::Int(value) => write_i32(*value, out),
            PropertyValue::Double(value) => write_f64(*value, out),
            PropertyValue::Bool(value) => write_bool(*value, out),
            PropertyValue::Str(value) => write_string(value, out),
            PropertyValue::IntList(values) => {
                write_i32(values.len() as i32, out);
                for value in values {
                    write_i32(*value, out);
                }
            }
            PropertyValue::Ref(id) => write_u32(id.0, out),
            PropertyValue::RefList(ids) => {
                write_i32(ids.len() as i32, out);
                for id in ids {
                    write_u32(id.0, out);
                }
            }
        }
    }

    pub fn read_from(kind: PropertyKind, reader: &mut ByteReader<'_>) -> Result<Self, ProtoError> {
        Ok(match kind {
            PropertyKind::Int => PropertyValue::Int(reader.read_i32()?),
            PropertyKind::Double => PropertyValue::Double(reader.read_f64()?),
            PropertyKind::Bool => PropertyValue::Bool(reader.read_bool()?),
            PropertyKind::Str => PropertyValue::Str(reader.read_string()?),
            PropertyKind::IntList => {
                let count = reader.read_len()?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(reader.read_i32()?);
                }
                PropertyValue::IntList(values)
            }
            PropertyKind::Ref => PropertyValue::Ref(EntityId(reader.read_u32()?)),
            PropertyKind::RefList => {
                let count = reader.read_len()?;
                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    ids.push(EntityId(reader.read_u32()?));
                }
                PropertyValue::RefList(ids)
            }
        })
    }
}

/// A typed, optionally-undefined value slot on an entity.
///
/// Undefined is distinct from any default value: an agent must be able to
/// tell "not yet perceived" apart from "known to be zero".
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    urn: String,
    value: Option<PropertyValue>,
}

impl Property {
    /// A property with no defined value.
    pub fn undefined(urn: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            value: None,
        }
    }

    pub fn new(urn: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            urn: urn.into(),
            value: Some(value),
        }
    }

    pub fn urn(&self) -> &str {
        &self.urn
    }

    pub fn is_defined(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&PropertyValue> {
        self.value.as_ref()
    }

    /// Set the value, marking the property defined. Returns true when the
    /// stored value actually changed; callers use this to decide whether a
    /// change-set entry should be recorded.
    pub fn set_value(&mut self, value: PropertyValue) -> bool {
        let changed = self.value.as_ref() != Some(&value);
        self.value = Some(value);
        changed
    }

    /// Clear the value. Returns true when the property was defined.
    pub fn undefine(&mut self) -> bool {
        self.value.take().is_some()
    }

    /// Adopt the defined/undefined state and value of `other`. Fails when the
    /// two properties hold different value kinds.
    pub fn take_value(&mut self, other: &Property) -> Result<bool, ProtoError> {
        let Some(incoming) = &other.value else {
            return Ok(self.undefine());
        };
        if let Some(current) = &self.value {
            if current.kind() != incoming.kind() {
                return Err(ProtoError::PropertyKindMismatch {
                    urn: self.urn.clone(),
                    expected: current.kind().name(),
                    got: incoming.kind().name(),
                });
            }
        }
        Ok(self.set_value(incoming.clone()))
    }

    /// Encoded size: URN, defined flag, and for defined values a 4-byte
    /// payload-size prefix plus the payload.
    pub fn bytes_length(&self) -> usize {
        let mut total = string_bytes_length(&self.urn) + 1;
        if let Some(value) = &self.value {
            total += 4 + value.bytes_length();
        }
        total
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        write_string(&self.urn, out);
        write_bool(self.value.is_some(), out);
        if let Some(value) = &self.value {
            write_i32(value.bytes_length() as i32, out);
            value.write_to(out);
        }
    }

    pub fn read_from(reader: &mut ByteReader<'_>, registry: &Registry) -> Result<Self, ProtoError> {
        let urn = reader.read_string()?;
        let defined = reader.read_bool()?;
        if !defined {
            return Ok(Property::undefined(urn));
        }
        let kind = registry
            .property_kind(&urn)
            .ok_or_else(|| ProtoError::UnknownPropertyUrn(urn.clone()))?;
        let declared = reader.read_len()?;
        let start = reader.position();
        let value = PropertyValue::read_from(kind, reader)?;
        let consumed = reader.position() - start;
        if consumed != declared {
            return Err(ProtoError::LengthMismatch { declared, consumed });
        }
        Ok(Property::new(urn, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HP: &str = "urn:test:property:hp";

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_property(HP, PropertyKind::Int);
        registry.register_property("urn:test:property:position", PropertyKind::Double);
        registry
    }

    #[test]
    fn set_value_reports_change() {
        let mut property = Property::undefined(HP);
        assert!(!property.is_defined());
        assert!(property.set_value(PropertyValue::Int(10)));
        assert!(!property.set_value(PropertyValue::Int(10)));
        assert!(property.set_value(PropertyValue::Int(11)));
    }

    #[test]
    fn round_trip_defined_and_undefined() {
        let registry = registry();
        for property in [
            Property::new(HP, PropertyValue::Int(42)),
            Property::undefined(HP),
            Property::new("urn:test:property:position", PropertyValue::Double(-1.25)),
        ] {
            let mut out = Vec::new();
            property.write_to(&mut out);
            assert_eq!(out.len(), property.bytes_length(), "{property:?}");
            let mut reader = ByteReader::new(&out);
            let decoded = Property::read_from(&mut reader, &registry).unwrap();
            assert_eq!(decoded, property);
        }
    }

    #[test]
    fn unknown_property_urn_is_rejected() {
        let registry = registry();
        let property = Property::new("urn:test:property:mystery", PropertyValue::Int(1));
        let mut out = Vec::new();
        property.write_to(&mut out);
        let mut reader = ByteReader::new(&out);
        assert!(matches!(
            Property::read_from(&mut reader, &registry),
            Err(ProtoError::UnknownPropertyUrn(_))
        ));
    }

    #[test]
    fn take_value_rejects_kind_mismatch() {
        let mut target = Property::new(HP, PropertyValue::Int(5));
        let other = Property::new(HP, PropertyValue::Double(5.0));
        assert!(matches!(
            target.take_value(&other),
            Err(ProtoError::PropertyKindMismatch { .. })
        ));
    }

    #[test]
    fn take_value_adopts_undefined_state() {
        let mut target = Property::new(HP, PropertyValue::Int(5));
        let other = Property::undefined(HP);
        assert!(target.take_value(&other).unwrap());
        assert!(!target.is_defined());
    }
}
