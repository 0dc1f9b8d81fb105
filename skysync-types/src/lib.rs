//! # skysync-types
//!
//! Shared type definitions for the skysync workspace.
//! Plain data passed between the sync core, its collaborators and the CLI.

use serde::{Deserialize, Serialize};

/// Identifier of an open project. Handed out by the project store and never
/// reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(u64);

impl ProjectId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressable unit of project content (e.g. one audio data segment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(i64);

impl BlockId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local identifier of one upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(u64);

impl SnapshotId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque access token. The empty token means "unauthenticated".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn unauthenticated() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens end up in log lines; never print the secret itself.
impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("AuthToken(<empty>)")
        } else {
            f.write_str("AuthToken(<redacted>)")
        }
    }
}

/// Progress report emitted by an upload session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotUpdate {
    pub blocks_uploaded: u64,
    pub total_blocks: u64,
    pub blob_uploaded: bool,
    pub completed: bool,
    pub successful: bool,
    pub error_message: Option<String>,
}

/// Answer from the UI collaborator when a save may be promoted to the cloud.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveDecision {
    pub save_to_cloud: bool,
    pub title: String,
}

impl SaveDecision {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn cloud(title: impl Into<String>) -> Self {
        Self {
            save_to_cloud: true,
            title: title.into(),
        }
    }
}

/// Where the UI should anchor a prompt (the project window, if any).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementHint {
    pub project: Option<ProjectId>,
}

impl PlacementHint {
    pub fn for_project(id: ProjectId) -> Self {
        Self { project: Some(id) }
    }
}
