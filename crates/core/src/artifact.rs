//! The versioned offer artifact and its extraction from assistant text.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::offer;

/// A line whose value changed between two versions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedLine {
    /// The line in the previous version.
    pub before: String,
    /// The line in the new version.
    pub after: String,
}

/// The changes of one version transition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDiff {
    /// The version this diff leads to.
    pub version: u32,
    /// Lines only present in the new version.
    pub added: Vec<String>,
    /// Lines only present in the previous version.
    pub removed: Vec<String>,
    /// Lines whose key stayed but value changed.
    pub modified: Vec<ModifiedLine>,
}

impl ArtifactDiff {
    /// Returns `true` if nothing changed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// The structured commercial offer of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier.
    pub id: String,
    /// Starts at 1 and increments on every content change.
    pub version: u32,
    /// The raw offer payload.
    pub content: String,
    /// One entry per version transition, oldest first.
    pub diffs: Vec<ArtifactDiff>,
    /// When the artifact was created.
    pub created_at: DateTime<Utc>,
    /// When the content last changed.
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    /// Creates an artifact at version 1.
    pub fn new<S: Into<String>>(content: S) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            version: 1,
            content: content.into(),
            diffs: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the content, bumping the version and recording the diff.
    ///
    /// Returns `None` without touching anything if the content is the same.
    pub fn update<S: Into<String>>(&mut self, content: S) -> Option<&ArtifactDiff> {
        let content = content.into();
        if content == self.content {
            return None;
        }
        let mut diff = diff_lines(&self.content, &content);
        self.version += 1;
        diff.version = self.version;
        self.content = content;
        self.updated_at = Utc::now();
        self.diffs.push(diff);
        self.diffs.last()
    }

    /// Returns the offer fields of the current content.
    #[inline]
    pub fn fields(&self) -> Vec<(String, String)> {
        offer::parse_fields(&self.content)
    }
}

fn line_key(line: &str) -> Option<&str> {
    let (key, _) = line.split_once(':')?;
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}

/// Computes a line-level diff between two payloads.
///
/// Lines are compared as multisets, ignoring blank lines. A removed and an
/// added line sharing the same key are reported as one modification. The
/// returned diff has version 0.
pub fn diff_lines(old: &str, new: &str) -> ArtifactDiff {
    let mut old_counts: HashMap<&str, usize> = HashMap::new();
    for line in old.lines().filter(|l| !l.trim().is_empty()) {
        *old_counts.entry(line).or_default() += 1;
    }

    let mut added = Vec::new();
    for line in new.lines().filter(|l| !l.trim().is_empty()) {
        match old_counts.get_mut(line) {
            Some(count) if *count > 0 => *count -= 1,
            _ => added.push(line),
        }
    }

    // Keep the original order of removed lines.
    let mut removed = Vec::new();
    for line in old.lines().filter(|l| !l.trim().is_empty()) {
        if let Some(count) = old_counts.get_mut(line) {
            if *count > 0 {
                *count -= 1;
                removed.push(line);
            }
        }
    }

    let mut modified = Vec::new();
    let mut removed_left = Vec::new();
    for before in removed {
        let paired = line_key(before).and_then(|key| {
            added.iter().position(|after| line_key(after) == Some(key))
        });
        match paired {
            Some(pos) => modified.push(ModifiedLine {
                before: before.to_owned(),
                after: added.remove(pos).to_owned(),
            }),
            None => removed_left.push(before.to_owned()),
        }
    }

    ArtifactDiff {
        version: 0,
        added: added.into_iter().map(str::to_owned).collect(),
        removed: removed_left,
        modified,
    }
}

/// What extraction did to the artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extraction {
    /// A fresh artifact was created.
    Created(Artifact),
    /// The existing artifact got a new version.
    Updated(Artifact),
    /// The block repeated the current content.
    Unchanged,
}

impl Extraction {
    /// Returns the artifact to persist, if any.
    #[inline]
    pub fn into_artifact(self) -> Option<Artifact> {
        match self {
            Extraction::Created(artifact) | Extraction::Updated(artifact) => {
                Some(artifact)
            }
            Extraction::Unchanged => None,
        }
    }
}

/// Extracts the offer block of `text` against the current artifact.
///
/// Returns `None` if the text has no complete offer block.
pub fn extract(text: &str, existing: Option<&Artifact>) -> Option<Extraction> {
    let block = offer::find_block(text)?;
    if !block.closed {
        warn!("offer block is not terminated, skipping extraction");
        return None;
    }

    let existing = match existing {
        Some(existing) if !block.wants_new_artifact() => existing,
        _ => {
            let artifact = Artifact::new(block.content);
            debug!("created artifact {}", artifact.id);
            return Some(Extraction::Created(artifact));
        }
    };

    if let Some(id) = &block.artifact_id {
        if *id != existing.id {
            warn!(
                "offer block refers to artifact `{id}`, updating `{}` instead",
                existing.id
            );
        }
    }

    let mut artifact = existing.clone();
    let Some(diff) = artifact.update(block.content) else {
        return Some(Extraction::Unchanged);
    };
    let summary = format!(
        "+{} -{} ~{}",
        diff.added.len(),
        diff.removed.len(),
        diff.modified.len()
    );
    debug!(
        "updated artifact {} to version {}: {summary}",
        artifact.id, artifact.version
    );
    Some(Extraction::Updated(artifact))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_from_new_marker() {
        let text = r#"Price: <offer_tag artifact_id="new">key: "v"</offer_tag>"#;
        let existing = Artifact::new("a: 1");
        let Some(Extraction::Created(artifact)) = extract(text, Some(&existing))
        else {
            panic!("expected a new artifact");
        };
        assert_eq!(artifact.version, 1);
        assert_eq!(artifact.content, r#"key: "v""#);
        assert!(artifact.diffs.is_empty());
        assert_ne!(artifact.id, existing.id);
    }

    #[test]
    fn test_fields() {
        let artifact = Artifact::new(
            "customer: \"UAB Vandenys\"\nnotes: |\n  Delivery in 3 weeks.\n  Installation included.",
        );
        assert_eq!(artifact.fields(), vec![
            ("customer".to_owned(), "UAB Vandenys".to_owned()),
            (
                "notes".to_owned(),
                "Delivery in 3 weeks.\nInstallation included.".to_owned()
            ),
        ]);
    }

    #[test]
    fn test_update_bumps_version() {
        let mut existing = Artifact::new("a: 0");
        existing.update("a: 1");
        assert_eq!(existing.version, 2);

        let text = format!(
            "<offer_tag artifact_id=\"{}\">\na: 2\n</offer_tag>",
            existing.id
        );
        let Some(Extraction::Updated(artifact)) = extract(&text, Some(&existing))
        else {
            panic!("expected an update");
        };
        assert_eq!(artifact.id, existing.id);
        assert_eq!(artifact.version, 3);
        assert_eq!(artifact.diffs.len(), 2);
        let diff = artifact.diffs.last().unwrap();
        assert_eq!(diff.version, 3);
        assert_eq!(
            diff.modified,
            vec![ModifiedLine {
                before: "a: 1".to_owned(),
                after: "a: 2".to_owned(),
            }]
        );
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_id_mismatch_updates_existing() {
        let existing = Artifact::new("a: 1");
        let text = "<offer_tag artifact_id=\"someone-else\">a: 1\nb: 2</offer_tag>";
        let artifact = extract(text, Some(&existing))
            .and_then(Extraction::into_artifact)
            .unwrap();
        assert_eq!(artifact.id, existing.id);
        assert_eq!(artifact.version, 2);
        assert_eq!(artifact.diffs[0].added, vec!["b: 2"]);
    }

    #[test]
    fn test_unchanged_and_unterminated() {
        let existing = Artifact::new("a: 1");
        assert_eq!(
            extract("<offer_tag>a: 1</offer_tag>", Some(&existing)),
            Some(Extraction::Unchanged)
        );
        assert_eq!(extract("<offer_tag>a: 2", Some(&existing)), None);
        assert_eq!(extract("no offer here", Some(&existing)), None);
    }

    #[test]
    fn test_versions_are_monotonic() {
        let mut artifact = Artifact::new("n: 0");
        for n in 1..=5 {
            let text = format!("<offer_tag>n: {n}</offer_tag>");
            artifact = extract(&text, Some(&artifact))
                .and_then(Extraction::into_artifact)
                .unwrap();
            assert_eq!(artifact.version, n + 1);
        }
        assert_eq!(artifact.diffs.len(), 5);
        let versions: Vec<u32> = artifact.diffs.iter().map(|d| d.version).collect();
        assert_eq!(versions, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_diff_lines_multiset() {
        let diff = diff_lines("a: 1\nb: 2\nb: 2\nnote", "a: 1\nb: 2\nc: 3\n\nnote");
        assert_eq!(diff.added, vec!["c: 3"]);
        assert_eq!(diff.removed, vec!["b: 2"]);
        assert!(diff.modified.is_empty());
    }
}
