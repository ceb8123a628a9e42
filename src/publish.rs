//! The write path: posting game updates into the thread.
//!
//! Everything published here is later re-read by the poller, so all bodies
//! come from the protocol encoder. Posting is best-effort; the caller owns
//! any retry policy.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::gateway::Gateway;
use crate::protocol::{self, GamePhase, LeaderboardEntry};
use crate::thread::SharedGameThread;

/// Announce a new round at the top of the thread and record its comment in
/// the thread model. Returns the round comment's identifier.
///
/// # Errors
///
/// Returns an error if the comment cannot be created.
pub async fn announce_round(
    gateway: &dyn Gateway,
    thread: &SharedGameThread,
    round: u32,
    prompt: &str,
    duration: Duration,
) -> Result<String> {
    let post_id = thread.read().await.post_id.clone();
    let body = protocol::encode_round_start(round, prompt, duration);
    let comment_id = gateway
        .create_comment(&post_id, &body)
        .await
        .context("Failed to post round announcement")?;
    thread.write().await.append_round(&comment_id);

    info!(post_id = %post_id, round, comment_id = %comment_id, "Round announced");
    Ok(comment_id)
}

/// Announce a round's winner as a reply to the round comment (or at the
/// top of the thread if that round is unknown).
///
/// # Errors
///
/// Returns an error if the comment cannot be created.
pub async fn announce_winner(
    gateway: &dyn Gateway,
    thread: &SharedGameThread,
    round: u32,
    winner: &str,
    points: u32,
) -> Result<String> {
    let (post_id, parent) = {
        let thread = thread.read().await;
        let parent = thread
            .round_comment_ids
            .get(round.saturating_sub(1) as usize)
            .cloned()
            .unwrap_or_else(|| thread.post_id.clone());
        (thread.post_id.clone(), parent)
    };
    let body = protocol::encode_round_end(round, winner, points);
    let comment_id = gateway
        .create_comment(&parent, &body)
        .await
        .context("Failed to post winner announcement")?;

    info!(post_id = %post_id, round, winner = %winner, "Winner announced");
    Ok(comment_id)
}

/// Publish a fresh status snapshot under the status comment.
///
/// # Errors
///
/// Returns an error if the comment cannot be created.
pub async fn post_status(
    gateway: &dyn Gateway,
    thread: &SharedGameThread,
    round: u32,
    submissions: u32,
    time_remaining: Option<Duration>,
) -> Result<String> {
    let status_comment_id = thread.read().await.status_comment_id.clone();
    let body = protocol::encode_status(round, submissions, time_remaining);
    gateway
        .create_comment(&status_comment_id, &body)
        .await
        .context("Failed to post status snapshot")
}

/// Publish a leaderboard snapshot under the status comment.
///
/// # Errors
///
/// Returns an error if the comment cannot be created.
pub async fn post_leaderboard(
    gateway: &dyn Gateway,
    thread: &SharedGameThread,
    entries: &[LeaderboardEntry],
) -> Result<String> {
    let status_comment_id = thread.read().await.status_comment_id.clone();
    let body = protocol::encode_leaderboard(entries);
    gateway
        .create_comment(&status_comment_id, &body)
        .await
        .context("Failed to post leaderboard")
}

/// Announce a game lifecycle transition at the top of the thread.
///
/// # Errors
///
/// Returns an error if the comment cannot be created.
pub async fn announce_lifecycle(
    gateway: &dyn Gateway,
    thread: &SharedGameThread,
    phase: GamePhase,
) -> Result<String> {
    let post_id = thread.read().await.post_id.clone();
    let body = protocol::encode_lifecycle(phase);
    let comment_id = gateway
        .create_comment(&post_id, &body)
        .await
        .context("Failed to post lifecycle announcement")?;

    info!(post_id = %post_id, phase = ?phase, "Lifecycle announced");
    Ok(comment_id)
}

/// Record an accepted player submission in the thread model.
pub async fn record_submission(thread: &SharedGameThread, comment_id: &str) {
    thread.write().await.append_submission(comment_id);
}
