//! Call policy: who may call whom, and how call rooms are named

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

const ROOM_PREFIX: &str = "call_";

/// Room shared by two participants, independent of who calls whom.
pub fn call_room_id(a: i64, b: i64) -> String {
    format!("{}{}_{}", ROOM_PREFIX, a.min(b), a.max(b))
}

/// Inverse of [`call_room_id`]. Returns `None` for rooms not in that form.
pub fn parse_call_room(room: &str) -> Option<(i64, i64)> {
    let rest = room.strip_prefix(ROOM_PREFIX)?;
    let (low, high) = rest.split_once('_')?;
    let low: i64 = low.parse().ok()?;
    let high: i64 = high.parse().ok()?;
    if low > high {
        return None;
    }
    Some((low, high))
}

/// Relationship lookups a call decision depends on
pub trait CallPolicy: Send + Sync {
    /// Both users liked each other
    fn are_matched(&self, a: i64, b: i64) -> bool;
    /// Either user blocked the other
    fn is_blocked(&self, a: i64, b: i64) -> bool;
}

/// Reasons a call is refused
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CallPolicyError {
    #[error("You cannot call yourself.")]
    SelfCall,
    #[error("Cannot call this user.")]
    Blocked,
    #[error("You can only call matched users.")]
    NotMatched,
}

/// Check whether `caller` may start a call with `callee`.
///
/// Blocks are checked before matches so a blocked pair is reported as
/// blocked even when the likes are still on record.
pub fn authorize_call(
    policy: &dyn CallPolicy,
    caller: i64,
    callee: i64,
) -> Result<(), CallPolicyError> {
    if caller == callee {
        return Err(CallPolicyError::SelfCall);
    }
    if policy.is_blocked(caller, callee) {
        return Err(CallPolicyError::Blocked);
    }
    if !policy.are_matched(caller, callee) {
        return Err(CallPolicyError::NotMatched);
    }
    Ok(())
}

/// Policy that lets any two distinct users call each other
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl CallPolicy for AllowAll {
    fn are_matched(&self, _a: i64, _b: i64) -> bool {
        true
    }

    fn is_blocked(&self, _a: i64, _b: i64) -> bool {
        false
    }
}

/// On-disk form of a [`MatchGraph`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchGraphFile {
    /// Directed likes: `(liker, liked)`
    #[serde(default)]
    pub likes: Vec<(i64, i64)>,
    /// Directed blocks: `(blocker, blocked)`
    #[serde(default)]
    pub blocks: Vec<(i64, i64)>,
}

/// In-memory like/block graph
#[derive(Debug, Clone, Default)]
pub struct MatchGraph {
    likes: HashSet<(i64, i64)>,
    blocks: HashSet<(i64, i64)>,
}

impl MatchGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn like(&mut self, liker: i64, liked: i64) {
        self.likes.insert((liker, liked));
    }

    pub fn block(&mut self, blocker: i64, blocked: i64) {
        self.blocks.insert((blocker, blocked));
    }

    /// Load from a JSON file shaped like [`MatchGraphFile`]
    pub fn load(path: &Path) -> Result<Self, MatchGraphError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MatchGraphError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, MatchGraphError> {
        let file: MatchGraphFile =
            serde_json::from_str(contents).map_err(|e| MatchGraphError::Parse(e.to_string()))?;
        Ok(Self::from(file))
    }
}

impl From<MatchGraphFile> for MatchGraph {
    fn from(file: MatchGraphFile) -> Self {
        Self {
            likes: file.likes.into_iter().collect(),
            blocks: file.blocks.into_iter().collect(),
        }
    }
}

impl CallPolicy for MatchGraph {
    fn are_matched(&self, a: i64, b: i64) -> bool {
        self.likes.contains(&(a, b)) && self.likes.contains(&(b, a))
    }

    fn is_blocked(&self, a: i64, b: i64) -> bool {
        self.blocks.contains(&(a, b)) || self.blocks.contains(&(b, a))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchGraphError {
    #[error("Failed to read match graph: {0}")]
    Io(String),
    #[error("Failed to parse match graph: {0}")]
    Parse(String),
}
