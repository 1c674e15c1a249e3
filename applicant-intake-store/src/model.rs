use core::fmt::{self, Display};
use core::str::FromStr;
use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Longest key the hosted database accepts.
const MAX_KEY_LEN: usize = 768;

/// Key of a record inside a collection.
///
/// Only ASCII alphanumerics, `-` and `_` are accepted so a key can be placed into a
/// store path without escaping.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Result<Self, StoreError> {
        let value = value.into();
        if is_valid_key(&value) {
            Ok(Self(value))
        } else {
            Err(StoreError::InvalidKey(value))
        }
    }

    /// Draws an id of the form `IT` followed by a number in `1000..9999`.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(format!("IT{}", rng.gen_range(1000..9999)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub(crate) fn is_valid_key(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_KEY_LEN
        && value
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_')
}

pub(crate) fn check_collection(collection: &str) -> Result<(), StoreError> {
    if is_valid_key(collection) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(collection.to_owned()))
    }
}

impl TryFrom<String> for RecordId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Course {
    #[serde(rename = "Website Development")]
    WebsiteDevelopment,
    #[serde(rename = "Graphic Designing")]
    GraphicDesigning,
    #[serde(rename = "Digital Marketing")]
    DigitalMarketing,
    #[serde(rename = "CCO")]
    Cco,
}

impl Course {
    pub const ALL: [Self; 4] = [
        Self::WebsiteDevelopment,
        Self::GraphicDesigning,
        Self::DigitalMarketing,
        Self::Cco,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WebsiteDevelopment => "Website Development",
            Self::GraphicDesigning => "Graphic Designing",
            Self::DigitalMarketing => "Digital Marketing",
            Self::Cco => "CCO",
        }
    }
}

impl Display for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown course {0:?}")]
pub struct UnknownCourse(pub String);

impl FromStr for Course {
    type Err = UnknownCourse;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|course| course.as_str() == s)
            .ok_or_else(|| UnknownCourse(s.to_owned()))
    }
}

/// One submitted application, stored flat under `students/<id>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: RecordId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub course: Course,
    #[serde(default)]
    pub message: String,
}

/// Full contents of a collection, in the store's key order.
pub type Snapshot = BTreeMap<RecordId, Application>;
