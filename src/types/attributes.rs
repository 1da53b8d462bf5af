//! Ordered attribute maps attached to variables and datasets.

use crate::types::DValue;

/// The value of a single attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    /// A single value
    Scalar(DValue),
    /// Several values of one type
    List(Vec<DValue>),
    /// A nested attribute container
    Container(Attributes),
}

impl AttrValue {
    /// Returns the nested container, if this value is one.
    pub fn as_container(&self) -> Option<&Attributes> {
        match self {
            AttrValue::Container(attributes) => Some(attributes),
            _ => None,
        }
    }

    /// Returns the values of a scalar or list attribute.
    pub fn values(&self) -> &[DValue] {
        match self {
            AttrValue::Scalar(value) => std::slice::from_ref(value),
            AttrValue::List(values) => values,
            AttrValue::Container(_) => &[],
        }
    }
}

impl From<DValue> for AttrValue {
    fn from(value: DValue) -> Self {
        AttrValue::Scalar(value)
    }
}

impl From<Vec<DValue>> for AttrValue {
    /// A single element list collapses to a scalar.
    fn from(mut values: Vec<DValue>) -> Self {
        if values.len() == 1 {
            AttrValue::Scalar(values.remove(0))
        } else {
            AttrValue::List(values)
        }
    }
}

impl From<Attributes> for AttrValue {
    fn from(attributes: Attributes) -> Self {
        AttrValue::Container(attributes)
    }
}

/// Ordered, string keyed map of attributes.
///
/// Insertion order is preserved. Inserting an existing name replaces the value in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
}

impl Attributes {
    /// Return an empty attribute map.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AttrValue> {
        self.entries
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert an attribute, replacing any existing value of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        let name = name.into();
        let value = value.into();
        match self.get_mut(&name) {
            Some(existing) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Remove an attribute, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<AttrValue> {
        let position = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(position).1)
    }

    /// Insert every attribute of `other`, replacing existing names.
    pub fn update(&mut self, other: Attributes) {
        for (name, value) in other.entries {
            self.insert(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl IntoIterator for Attributes {
    type Item = (String, AttrValue);
    type IntoIter = std::vec::IntoIter<(String, AttrValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, AttrValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, AttrValue)>>(iter: I) -> Self {
        let mut attributes = Attributes::new();
        for (name, value) in iter {
            attributes.insert(name, value);
        }
        attributes
    }
}
