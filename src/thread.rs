//! The game thread model.
//!
//! A game's entire public record lives in one forum post and its comments.
//! [`GameThread`] is the authoritative map from semantic role (rules,
//! status, round N, ...) to comment identifier for one game. The poller
//! uses it to classify incoming comments; the publisher extends it as
//! rounds and submissions are added. Round and submission sequences are
//! append-only and never reorder.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;
use crate::protocol;

/// A game thread shared between the publisher and the polling loop, so
/// rounds appended after polling starts are still classified correctly.
pub type SharedGameThread = Arc<RwLock<GameThread>>;

/// Semantic role a comment identifier plays inside a game thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The root post itself.
    Post,
    /// The comment holding general game metadata.
    Game,
    /// The rules comment.
    Rules,
    /// The live status comment.
    Status,
    /// A round announcement comment (zero-based round index).
    Round(usize),
    /// An accepted player submission (zero-based submission index).
    Submission(usize),
}

/// The set of forum identifiers that represent one game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameThread {
    pub post_id: String,
    pub game_comment_id: String,
    pub rules_comment_id: String,
    pub status_comment_id: String,
    pub round_comment_ids: Vec<String>,
    pub submission_comment_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl GameThread {
    /// Build a thread from already-known role comments, with empty round
    /// and submission sequences.
    #[must_use]
    pub fn new(
        post_id: &str,
        game_comment_id: &str,
        rules_comment_id: &str,
        status_comment_id: &str,
    ) -> Self {
        Self {
            post_id: post_id.to_string(),
            game_comment_id: game_comment_id.to_string(),
            rules_comment_id: rules_comment_id.to_string(),
            status_comment_id: status_comment_id.to_string(),
            round_comment_ids: Vec::new(),
            submission_comment_ids: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Append a round announcement comment. Duplicate identifiers are a
    /// logged no-op.
    pub fn append_round(&mut self, comment_id: &str) {
        if self.round_comment_ids.iter().any(|id| id == comment_id) {
            warn!(post_id = %self.post_id, comment_id = %comment_id, "Duplicate round comment ignored");
            return;
        }
        self.round_comment_ids.push(comment_id.to_string());
        self.updated_at = Utc::now();
    }

    /// Append an accepted submission comment. Duplicate identifiers are a
    /// logged no-op.
    pub fn append_submission(&mut self, comment_id: &str) {
        if self.submission_comment_ids.iter().any(|id| id == comment_id) {
            warn!(post_id = %self.post_id, comment_id = %comment_id, "Duplicate submission comment ignored");
            return;
        }
        self.submission_comment_ids.push(comment_id.to_string());
        self.updated_at = Utc::now();
    }

    /// Look up which role an identifier plays in this thread, if any.
    #[must_use]
    pub fn role_of(&self, id: &str) -> Option<Role> {
        if id == self.post_id {
            return Some(Role::Post);
        }
        if id == self.game_comment_id {
            return Some(Role::Game);
        }
        if id == self.rules_comment_id {
            return Some(Role::Rules);
        }
        if id == self.status_comment_id {
            return Some(Role::Status);
        }
        if let Some(index) = self.round_comment_ids.iter().position(|r| r == id) {
            return Some(Role::Round(index));
        }
        self.submission_comment_ids
            .iter()
            .position(|s| s == id)
            .map(Role::Submission)
    }

    /// Number of rounds announced so far.
    #[must_use]
    pub fn round_count(&self) -> usize {
        self.round_comment_ids.len()
    }

    /// Wrap the thread for shared use between the publisher and the
    /// polling engine.
    #[must_use]
    pub fn into_shared(self) -> SharedGameThread {
        Arc::new(RwLock::new(self))
    }
}

const GAME_COMMENT_BODY: &str = "\u{1f4f8} **Photo Hunt** \n\n\
    This thread hosts a live photo challenge game. Round announcements, \
    status, and results appear below.";

const RULES_COMMENT_BODY: &str = "\u{1f4cb} **Rules**\n\n\
    1. Each round announces a photo prompt and a time limit.\n\
    2. Reply to the round comment with a link to your photo before time runs out.\n\
    3. One submission per player per round. The round winner earns points.";

/// Create a game's presence under an existing post: the metadata, rules,
/// and status comments, in that order.
///
/// # Errors
///
/// Returns an error if the post identifier is empty or any comment
/// creation fails.
pub async fn create_thread(gateway: &dyn Gateway, post_id: &str) -> Result<GameThread> {
    if post_id.trim().is_empty() {
        anyhow::bail!("Cannot create a game thread with an empty post id");
    }

    let game_comment_id = gateway
        .create_comment(post_id, GAME_COMMENT_BODY)
        .await
        .context("Failed to create game comment")?;
    let rules_comment_id = gateway
        .create_comment(post_id, RULES_COMMENT_BODY)
        .await
        .context("Failed to create rules comment")?;
    let status_comment_id = gateway
        .create_comment(post_id, &protocol::encode_status(0, 0, None))
        .await
        .context("Failed to create status comment")?;

    info!(
        post_id = %post_id,
        game_comment_id = %game_comment_id,
        "Game thread created"
    );

    Ok(GameThread::new(
        post_id,
        &game_comment_id,
        &rules_comment_id,
        &status_comment_id,
    ))
}

/// Rebuild a [`GameThread`] from the live comment record.
///
/// The thread is the game's permanent log, so the role mapping can be
/// recovered from comment order alone: the three oldest top-level comments
/// are metadata, rules, and status (the order [`create_thread`] posts
/// them); later top-level comments carrying a round header are rounds;
/// replies to round comments are submissions.
///
/// # Errors
///
/// Returns an error if the comments cannot be fetched or the post does not
/// hold a seeded game thread.
pub async fn recover_thread(gateway: &dyn Gateway, post_id: &str) -> Result<GameThread> {
    let mut comments = gateway
        .list_comments(post_id, None)
        .await
        .context("Failed to fetch comments for thread recovery")?;
    comments.sort_by_key(|c| c.created_at);

    let top_level: Vec<_> = comments.iter().filter(|c| c.parent_id == post_id).collect();
    let [game, rules, status, ..] = top_level.as_slice() else {
        anyhow::bail!("Post {post_id} does not hold a seeded game thread");
    };

    let mut thread = GameThread::new(post_id, &game.id, &rules.id, &status.id);

    for comment in top_level.iter().skip(3) {
        if protocol::is_round_announcement(&comment.body) {
            thread.append_round(&comment.id);
        }
    }
    // Replies to a round comment are submissions, except for the engine's
    // own announcements (e.g. the winner comment), which decode as updates.
    for comment in &comments {
        if matches!(thread.role_of(&comment.parent_id), Some(Role::Round(_)))
            && protocol::decode(comment, &thread).is_none()
        {
            thread.append_submission(&comment.id);
        }
    }

    if let Some(last) = comments.last() {
        thread.updated_at = last.created_at;
    }

    debug!(
        post_id = %post_id,
        rounds = thread.round_comment_ids.len(),
        submissions = thread.submission_comment_ids.len(),
        "Recovered game thread"
    );

    Ok(thread)
}
