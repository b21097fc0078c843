//! Image tags and their merge rules.

use std::fmt;

use serde_json::Value;

use super::{BuildSpec, SpecError};

/// Tag key always set to the build name.
pub const NAME_TAG: &str = "Name";
/// Tag key always set to the build description.
pub const DESCRIPTION_TAG: &str = "Description";

/// A key/value pair attached to the output image.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Parses the `tags` value: a list of objects, usually one key each.
pub(super) fn parse_tags(value: Option<&Value>) -> Result<Vec<Tag>, SpecError> {
    let Some(raw) = value else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let entries = raw
        .as_array()
        .ok_or_else(|| SpecError::Invalid(String::from("tags must be a list of objects")))?;

    let mut tags = Vec::new();
    for entry in entries {
        let object = entry.as_object().ok_or_else(|| {
            SpecError::Invalid(format!("tag entry {entry} must be an object"))
        })?;
        for (key, tag_value) in object {
            let rendered = match tag_value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            tags.push(Tag::new(key.clone(), rendered));
        }
    }
    Ok(tags)
}

/// Tags applied to the output image: `Name` and `Description` first, then
/// the spec's own tags. A user tag named `Name` or `Description` is dropped
/// in favour of the build's values.
#[must_use]
pub fn merge_tags(spec: &BuildSpec) -> Vec<Tag> {
    let mut merged = vec![
        Tag::new(NAME_TAG, spec.name.clone()),
        Tag::new(DESCRIPTION_TAG, spec.description.clone()),
    ];
    merged.extend(
        spec.tags
            .iter()
            .filter(|tag| tag.key != NAME_TAG && tag.key != DESCRIPTION_TAG)
            .cloned(),
    );
    merged
}
