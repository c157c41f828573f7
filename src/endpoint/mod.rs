//! Endpoint configuration handed to the plugin for one backup or restore job.
//!
//! The endpoint is a flat JSON object. Values are read through typed
//! accessors with per-key defaults; the bag itself is never mutated.

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised when reading endpoint configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EndpointError {
    /// The endpoint document is not valid JSON.
    #[error("endpoint is not valid JSON: {0}")]
    Parse(String),
    /// The endpoint document is valid JSON but not an object.
    #[error("endpoint must be a JSON object")]
    NotAnObject,
    /// A key without a default was not supplied.
    #[error("missing required endpoint key `{key}`")]
    MissingKey {
        /// Key that was looked up.
        key: String,
    },
    /// A key holds a value of the wrong JSON type.
    #[error("endpoint key `{key}` must be {expected}")]
    WrongType {
        /// Key that was looked up.
        key: String,
        /// Description of the accepted shapes.
        expected: &'static str,
    },
    /// A key holds a blank value where a value is required.
    #[error("endpoint key `{key}` must not be empty")]
    Empty {
        /// Key that was looked up.
        key: String,
    },
    /// One or more keys failed validation; details were reported per key.
    #[error("invalid endpoint configuration")]
    Invalid,
}

/// Immutable key/value bag with typed lookups.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Endpoint {
    values: Map<String, Value>,
}

impl Endpoint {
    /// Parses an endpoint from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Parse`] for malformed JSON and
    /// [`EndpointError::NotAnObject`] when the document is not an object.
    pub fn from_json(text: &str) -> Result<Self, EndpointError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| EndpointError::Parse(err.to_string()))?;
        Self::from_value(value)
    }

    /// Wraps an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NotAnObject`] when `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self, EndpointError> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            _ => Err(EndpointError::NotAnObject),
        }
    }

    /// Looks up a required string.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::MissingKey`] when the key is absent or null,
    /// and [`EndpointError::WrongType`] when it is not a string or number.
    pub fn string_value(&self, key: &str) -> Result<String, EndpointError> {
        self.optional_string(key)?
            .ok_or_else(|| EndpointError::MissingKey {
                key: key.to_owned(),
            })
    }

    /// Looks up a string, falling back to `default` when absent or null.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::WrongType`] when the value is not a string or
    /// number.
    pub fn string_value_or(&self, key: &str, default: &str) -> Result<String, EndpointError> {
        Ok(self
            .optional_string(key)?
            .unwrap_or_else(|| default.to_owned()))
    }

    /// Looks up a list of names, falling back to `default` when absent or
    /// null.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::WrongType`] when the value is neither a string
    /// nor an array of strings.
    pub fn string_list_value_or(
        &self,
        key: &str,
        default: &[&str],
    ) -> Result<Vec<String>, EndpointError> {
        Ok(self.optional_string_list(key)?.unwrap_or_else(|| {
            default.iter().map(|value| (*value).to_owned()).collect()
        }))
    }

    /// Looks up a list of names that has no default.
    ///
    /// A JSON array of strings is taken as-is; a single string is split on
    /// whitespace and commas. Absent and null values yield `None`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::WrongType`] when the value is neither a string
    /// nor an array of strings.
    pub fn optional_string_list(&self, key: &str) -> Result<Option<Vec<String>>, EndpointError> {
        let wrong_type = || EndpointError::WrongType {
            key: key.to_owned(),
            expected: "a string or an array of strings",
        };
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(split_names(text))),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned).ok_or_else(wrong_type))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(wrong_type()),
        }
    }

    /// Returns `true` when `key` is present with a non-null value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|value| !value.is_null())
    }

    fn optional_string(&self, key: &str) -> Result<Option<String>, EndpointError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(Value::Number(number)) => Ok(Some(number.to_string())),
            Some(_) => Err(EndpointError::WrongType {
                key: key.to_owned(),
                expected: "a string",
            }),
        }
    }
}

fn split_names(text: &str) -> Vec<String> {
    text.split(|ch: char| ch.is_whitespace() || ch == ',')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}
