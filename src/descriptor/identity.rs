// src/descriptor/identity.rs

//! Component version ids and element identities

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Identity attribute holding the element name
pub const IDENTITY_NAME: &str = "name";

/// Key of one component version: `(name, version)`
///
/// Used for closure bookkeeping and cycle detection. Displayed as
/// `name:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentVersionId {
    pub name: String,
    pub version: String,
}

impl ComponentVersionId {
    /// Create a new id
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ComponentVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

impl FromStr for ComponentVersionId {
    type Err = Error;

    /// Parse `name:version`; the version is everything after the last colon
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(Self::new(name, version))
            }
            _ => Err(Error::ParseError(format!(
                "invalid component version id '{}': expected name:version",
                s
            ))),
        }
    }
}

/// Local identity of a resource, source, or reference inside one list
///
/// The `name` attribute is always present; extra identity attributes
/// disambiguate elements sharing a name. Attributes are kept sorted so two
/// identities compare equal regardless of declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(BTreeMap<String, String>);

impl Identity {
    /// Identity with only a name
    pub fn named(name: impl Into<String>) -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert(IDENTITY_NAME.to_string(), name.into());
        Self(attrs)
    }

    /// Identity from a name plus extra attributes
    pub fn with_extra(name: &str, extra: &BTreeMap<String, String>) -> Self {
        let mut attrs = extra.clone();
        attrs.insert(IDENTITY_NAME.to_string(), name.to_string());
        Self(attrs)
    }

    /// Add an attribute (builder style)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Name attribute
    pub fn name(&self) -> &str {
        self.0.get(IDENTITY_NAME).map(String::as_str).unwrap_or_default()
    }

    /// Look up an attribute
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate attributes in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        let extras: Vec<String> = self
            .0
            .iter()
            .filter(|(k, _)| k.as_str() != IDENTITY_NAME)
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if !extras.is_empty() {
            write!(f, "[{}]", extras.join(","))?;
        }
        Ok(())
    }
}
