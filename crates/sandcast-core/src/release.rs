//! Release tagging: read a template's version and point its tags at an
//! existing artifact. Tagging never rebuilds.

use sandcast_state::{ArtifactRef, TagRegistry, VersionStore};
use serde::Serialize;

use crate::domain::{Result, TagAssignment, TagResolver};
use crate::obs;

/// Tags applied by [`ReleaseTagger::tag_release`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagOutcome {
    pub assignment: TagAssignment,
    pub artifact: ArtifactRef,
}

/// Thin layer over a tag registry and a version store.
pub struct ReleaseTagger<R, V> {
    registry: R,
    versions: V,
    resolver: TagResolver,
}

impl<R, V> ReleaseTagger<R, V>
where
    R: TagRegistry,
    V: VersionStore,
{
    pub fn new(registry: R, versions: V) -> Self {
        Self {
            registry,
            versions,
            resolver: TagResolver::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: TagResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Resolve the release tags for `template` and assign them atomically
    /// to `template:channel`. A malformed version assigns nothing.
    pub async fn tag_release(
        &self,
        template: &str,
        channel_override: Option<&str>,
    ) -> Result<TagOutcome> {
        let raw = self.versions.read_version(template).await?;
        let assignment = self
            .resolver
            .resolve_tags(template, &raw, channel_override)?;

        let artifact = self
            .registry
            .assign_tags(&assignment.target, assignment.tags.as_slice())
            .await?;
        obs::emit_tags_assigned(&assignment.target, assignment.tags.as_slice(), artifact.as_str());

        Ok(TagOutcome {
            assignment,
            artifact,
        })
    }
}
