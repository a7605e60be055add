//! Tag sets and release tag resolution.

use serde::{Deserialize, Serialize};

use sandcast_state::template_ref;

use super::error::ValidationError;
use super::version::VersionRecord;

/// Alias appended next to every version tag.
pub const LTS_ALIAS: &str = "lts";

/// Channel whose artifact receives version tags when no override is given.
pub const DEFAULT_SOURCE_CHANNEL: &str = "dev";

/// Ordered, duplicate-free set of tags for one artifact.
///
/// The first tag is the primary tag; a `TagSet` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct TagSet(Vec<String>);

impl TagSet {
    /// Start a set from its primary tag.
    pub fn new(primary: impl Into<String>) -> Result<Self, ValidationError> {
        let primary = primary.into();
        validate_tag(&primary)?;
        Ok(Self(vec![primary]))
    }

    /// Append a tag, rejecting duplicates.
    pub fn push(&mut self, tag: impl Into<String>) -> Result<(), ValidationError> {
        let tag = tag.into();
        validate_tag(&tag)?;
        if self.0.contains(&tag) {
            return Err(ValidationError::DuplicateTag { tag });
        }
        self.0.push(tag);
        Ok(())
    }

    pub fn primary(&self) -> &str {
        &self.0[0]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl TryFrom<Vec<String>> for TagSet {
    type Error = ValidationError;

    fn try_from(tags: Vec<String>) -> Result<Self, Self::Error> {
        let mut iter = tags.into_iter();
        let primary = iter.next().ok_or(ValidationError::EmptyField { field: "tag set" })?;
        let mut set = TagSet::new(primary)?;
        for tag in iter {
            set.push(tag)?;
        }
        Ok(set)
    }
}

impl From<TagSet> for Vec<String> {
    fn from(set: TagSet) -> Self {
        set.0
    }
}

impl std::fmt::Display for TagSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}

/// Tags must be non-empty and made of `[A-Za-z0-9._-]`.
fn validate_tag(tag: &str) -> Result<(), ValidationError> {
    if tag.is_empty() {
        return Err(ValidationError::EmptyField { field: "tag" });
    }
    if let Some(c) = tag
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(ValidationError::InvalidTag {
            tag: tag.to_string(),
            reason: format!("unexpected character {:?}", c),
        });
    }
    Ok(())
}

/// Tags to point at an existing artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagAssignment {
    /// Existing reference (`name:channel`) whose artifact receives the tags.
    pub target: String,
    /// Tags to assign, primary version tag first.
    pub tags: TagSet,
}

/// Derives release tags from a template's version record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagResolver {
    alias: String,
    default_channel: String,
}

impl Default for TagResolver {
    fn default() -> Self {
        Self {
            alias: LTS_ALIAS.to_string(),
            default_channel: DEFAULT_SOURCE_CHANNEL.to_string(),
        }
    }
}

impl TagResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different alias than `lts`.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Resolve `[v{MAJOR}.{MINOR}.{PATCH}, alias]` for the artifact at
    /// `template:channel` (channel defaults to `dev`).
    ///
    /// The alias is appended for every version, pre-release or not.
    pub fn resolve_tags(
        &self,
        template: &str,
        version_record: &str,
        channel_override: Option<&str>,
    ) -> Result<TagAssignment, ValidationError> {
        if template.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "template name",
            });
        }
        let version = VersionRecord::parse(version_record)?;

        let mut tags = TagSet::new(version.tag())?;
        tags.push(self.alias.clone())?;

        let channel = channel_override
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.default_channel);
        Ok(TagAssignment {
            target: template_ref(template, Some(channel)),
            tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_primary_then_alias() {
        let assignment = TagResolver::new()
            .resolve_tags("tool", "1.2.3", None)
            .unwrap();
        assert_eq!(assignment.tags.as_slice(), ["v1.2.3", "lts"]);
        assert_eq!(assignment.tags.primary(), "v1.2.3");
        assert_eq!(assignment.target, "tool:dev");
    }

    #[test]
    fn test_channel_override_selects_target_only() {
        let assignment = TagResolver::new()
            .resolve_tags("codex", "0.4.1", Some("beta"))
            .unwrap();
        assert_eq!(assignment.target, "codex:beta");
        assert!(!assignment.tags.iter().any(|t| t == "beta"));
    }

    #[test]
    fn test_invalid_version_assigns_nothing() {
        let err = TagResolver::new()
            .resolve_tags("tool", "1.2", None)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidVersionFormat { .. }));
    }

    #[test]
    fn test_tag_set_rejects_duplicates() {
        let mut set = TagSet::new("v1.0.0").unwrap();
        let err = set.push("v1.0.0").unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateTag {
                tag: "v1.0.0".to_string()
            }
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_alias_colliding_with_version_tag_is_rejected() {
        let err = TagResolver::new()
            .with_alias("v1.0.0")
            .resolve_tags("tool", "1.0.0", None)
            .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateTag { .. }));
    }

    #[test]
    fn test_tag_charset() {
        assert!(TagSet::new("v1.2.3").is_ok());
        assert!(matches!(
            TagSet::new("tool:v1"),
            Err(ValidationError::InvalidTag { .. })
        ));
        assert!(matches!(
            TagSet::new(""),
            Err(ValidationError::EmptyField { .. })
        ));
    }

    #[test]
    fn test_tag_set_deserialize_validates() {
        let ok: TagSet = serde_json::from_str(r#"["v1.0.0","lts"]"#).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(serde_json::from_str::<TagSet>(r#"["lts","lts"]"#).is_err());
        assert!(serde_json::from_str::<TagSet>("[]").is_err());
    }
}
