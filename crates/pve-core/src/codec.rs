//! Wire encodings used by the Proxmox VE API.
//!
//! Request parameters travel as `application/x-www-form-urlencoded` bodies,
//! built either ad hoc with [`FormParams`] or from a declarative
//! [`FormSchema`] table. Responses occasionally carry integers as JSON strings,
//! which [`IntOrString`] normalises.

use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use url::form_urlencoded;

/// Integer that may arrive as a JSON string or a JSON number of any width.
///
/// Decoding tries, in order, a quoted string, a signed 64-bit number and an
/// unsigned 64-bit number, and always yields an `i64`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct IntOrString(pub i64);

impl IntOrString {
    /// Returns the normalised value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<IntOrString> for i64 {
    fn from(value: IntOrString) -> Self {
        value.0
    }
}

impl Display for IntOrString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for IntOrString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Text(text) => text.trim().parse::<i64>().map(Self).map_err(|err| {
                D::Error::custom(format!("expected an integer string, got {text:?}: {err}"))
            }),
            Wire::Signed(value) => Ok(Self(value)),
            Wire::Unsigned(value) => i64::try_from(value)
                .map(Self)
                .map_err(|_| D::Error::custom(format!("integer {value} overflows i64"))),
        }
    }
}

/// `deserialize_with` helpers for plain `i64` fields carried as [`IntOrString`].
pub mod int_or_string {
    use super::IntOrString;
    use serde::{Deserialize, Deserializer};

    /// Decode a required string-or-number field.
    ///
    /// # Errors
    ///
    /// Fails if the value is neither an integer string nor an integer.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        IntOrString::deserialize(deserializer).map(i64::from)
    }

    /// Decode an optional string-or-number field.
    ///
    /// # Errors
    ///
    /// Fails if a present value is neither an integer string nor an integer.
    pub fn option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<IntOrString>::deserialize(deserializer).map(|value| value.map(i64::from))
    }
}

/// Builder for form-encoded request bodies.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormParams {
    pairs: Vec<(&'static str, String)>,
}

impl FormParams {
    /// Create a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Append a key/value pair.
    pub fn push<T>(&mut self, key: &'static str, value: T)
    where
        T: Display,
    {
        self.pairs.push((key, value.to_string()));
    }

    /// Append a boolean encoded as `0`/`1`.
    pub fn push_flag(&mut self, key: &'static str, value: bool) {
        self.pairs.push((key, FieldValue::Flag(value).encode()));
    }

    /// Borrow the collected key/value pairs.
    #[must_use]
    pub fn pairs(&self) -> &[(&'static str, String)] {
        &self.pairs
    }

    /// Return the value recorded for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Returns true if no parameters have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Encode as `application/x-www-form-urlencoded`.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.pairs {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

/// Typed value produced by a [`FormField`] accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Sent verbatim
    Text(String),
    /// Sent in decimal
    Number(u64),
    /// Sent as `1` or `0`
    Flag(bool),
}

impl FieldValue {
    /// Wire representation of the value.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Number(number) => number.to_string(),
            Self::Flag(true) => "1".to_string(),
            Self::Flag(false) => "0".to_string(),
        }
    }
}

/// One row of a [`FormSchema`]: a parameter name and how to read it from `T`.
pub struct FormField<T: 'static> {
    /// Form parameter name
    pub param: &'static str,
    /// Accessor producing the typed value
    pub value: fn(&T) -> FieldValue,
}

/// Declarative mapping from a request struct to form parameters.
///
/// Built with [`FormSchema::new`], which rejects empty and duplicate parameter
/// names. Declared in a `static` over a `const` field table, that check runs
/// at compile time.
pub struct FormSchema<T: 'static> {
    fields: &'static [FormField<T>],
}

impl<T: 'static> FormSchema<T> {
    /// Create a schema from its field table.
    ///
    /// # Panics
    ///
    /// Panics if a parameter name is empty or appears twice.
    #[must_use]
    pub const fn new(fields: &'static [FormField<T>]) -> Self {
        let mut i = 0;
        while i < fields.len() {
            assert!(
                !fields[i].param.is_empty(),
                "form parameter names must not be empty"
            );
            let mut j = i + 1;
            while j < fields.len() {
                assert!(
                    !same_name(fields[i].param, fields[j].param),
                    "duplicate form parameter"
                );
                j += 1;
            }
            i += 1;
        }
        Self { fields }
    }

    /// Parameter names in table order.
    #[must_use]
    pub fn params(&self) -> Vec<&'static str> {
        self.fields.iter().map(|field| field.param).collect()
    }

    /// Encode `value` into form parameters, in table order.
    #[must_use]
    pub fn encode(&self, value: &T) -> FormParams {
        let mut params = FormParams::new();
        for field in self.fields {
            params.push(field.param, (field.value)(value).encode());
        }
        params
    }
}

const fn same_name(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}
