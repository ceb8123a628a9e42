//! Client timer reconciliation.
//!
//! Clients cannot trust their own clocks, so every timer display is
//! anchored to one server-observed reference produced here. The reference
//! is computed on demand from the game thread's comment timestamps and a
//! failed lookup degrades to "assume now" instead of blocking the game.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::gateway::Gateway;
use crate::thread::GameThread;

/// A common time reference for one game, shipped to clients so they can
/// compute remaining round time without trusting their own clocks.
#[derive(Debug, Clone, Serialize)]
pub struct TimerSync {
    /// The engine's clock at the moment of the call. Clients subtract
    /// against this.
    pub server_time: DateTime<Utc>,
    /// Creation time of the game metadata comment.
    pub game_start_time: DateTime<Utc>,
    /// Creation time of the latest round comment. Absent before the first
    /// round starts.
    pub round_start_time: Option<DateTime<Utc>>,
}

/// Compute the timer reference for a game.
///
/// Never fails: if the comment timestamps cannot be fetched, the current
/// time stands in for them, which degrades timer display rather than
/// blocking the game.
pub async fn synchronize_client_timer(gateway: &dyn Gateway, thread: &GameThread) -> TimerSync {
    let server_time = Utc::now();

    let comments = match gateway.list_comments(&thread.post_id, None).await {
        Ok(comments) => comments,
        Err(e) => {
            warn!(post_id = %thread.post_id, "Timer lookup failed, assuming now: {e:#}");
            Vec::new()
        }
    };

    let created_at = |id: &str| {
        comments
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.created_at)
            .unwrap_or(server_time)
    };

    TimerSync {
        server_time,
        game_start_time: created_at(&thread.game_comment_id),
        round_start_time: thread
            .round_comment_ids
            .last()
            .map(|id| created_at(id)),
    }
}
