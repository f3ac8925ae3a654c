//! Typed archive-level metadata attributes.
//!
//! A format may expose named attributes beside its file list: the WAD
//! IWAD/PWAD type, the RFF version, a POD or EPF description comment.
//! Values changed through [`crate::Archive::set_attribute`] are persisted
//! by the format at the next flush.

use crate::error::{Error, Result};

/// Attribute value plus its constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Text {
        value: String,
        /// Maximum byte length, or `None` for unlimited.
        max_len: Option<usize>,
    },
    Enum {
        names: Vec<String>,
        value: usize,
    },
    Int {
        value: i64,
        min: i64,
        max: i64,
    },
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub desc: String,
    pub value: AttrValue,
    /// Set when the value differs from the on-disk state.
    pub changed: bool,
}

impl Attribute {
    pub fn text(name: &str, desc: &str, value: String, max_len: Option<usize>) -> Self {
        Self {
            name: name.to_string(),
            desc: desc.to_string(),
            value: AttrValue::Text { value, max_len },
            changed: false,
        }
    }

    pub fn enumeration(name: &str, desc: &str, names: Vec<String>, value: usize) -> Self {
        Self {
            name: name.to_string(),
            desc: desc.to_string(),
            value: AttrValue::Enum { names, value },
            changed: false,
        }
    }

    /// Replace the value, enforcing kind and range.
    pub fn update(&mut self, new: AttrValue) -> Result<()> {
        match (&mut self.value, new) {
            (
                AttrValue::Text { value, max_len },
                AttrValue::Text {
                    value: new_value, ..
                },
            ) => {
                if let Some(max) = *max_len {
                    if new_value.len() > max {
                        return Err(Error::AttributeValue(format!(
                            "text for \"{}\" is {} bytes, limit is {}",
                            self.name,
                            new_value.len(),
                            max
                        )));
                    }
                }
                *value = new_value;
            }
            (
                AttrValue::Enum { names, value },
                AttrValue::Enum {
                    value: new_value, ..
                },
            ) => {
                if new_value >= names.len() {
                    return Err(Error::AttributeValue(format!(
                        "enum value {} for \"{}\" out of range 0..{}",
                        new_value,
                        self.name,
                        names.len()
                    )));
                }
                *value = new_value;
            }
            (
                AttrValue::Int { value, min, max },
                AttrValue::Int {
                    value: new_value, ..
                },
            ) => {
                if new_value < *min || new_value > *max {
                    return Err(Error::AttributeValue(format!(
                        "integer value {} for \"{}\" outside {}..={}",
                        new_value, self.name, min, max
                    )));
                }
                *value = new_value;
            }
            _ => {
                return Err(Error::AttributeValue(format!(
                    "wrong value kind for \"{}\"",
                    self.name
                )));
            }
        }
        self.changed = true;
        Ok(())
    }

    /// Current enum selection, if this is an enum attribute.
    pub fn enum_value(&self) -> Option<usize> {
        match &self.value {
            AttrValue::Enum { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Current text, if this is a text attribute.
    pub fn text_value(&self) -> Option<&str> {
        match &self.value {
            AttrValue::Text { value, .. } => Some(value),
            _ => None,
        }
    }
}
