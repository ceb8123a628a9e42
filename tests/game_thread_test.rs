//! End-to-end tests over an in-memory forum: seeding a game thread,
//! publishing updates, recovering the thread from the comment record, and
//! watching the poller pick published updates back up.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::timeout;

use snaphunt_sync::gateway::{Gateway, RawComment};
use snaphunt_sync::polling::{game_key, PollerSettings, PollingEngine};
use snaphunt_sync::protocol::{GamePhase, GameUpdate, LeaderboardEntry};
use snaphunt_sync::thread::{create_thread, recover_thread};
use snaphunt_sync::{publish, timer};

/// In-memory forum: a single post with an append-only comment store and a
/// deterministic clock that advances one second per comment.
struct InMemoryForum {
    state: Mutex<ForumState>,
}

struct ForumState {
    next_id: u64,
    clock: DateTime<Utc>,
    comments: Vec<RawComment>,
}

impl InMemoryForum {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ForumState {
                next_id: 1,
                clock: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                comments: Vec::new(),
            }),
        })
    }

    fn comment_created_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .unwrap()
            .comments
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.created_at)
    }
}

#[async_trait]
impl Gateway for InMemoryForum {
    async fn create_post(&self, _: &str, _: &str, _: &str) -> Result<String> {
        Ok("p1".to_string())
    }

    async fn create_comment(&self, parent_id: &str, body: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let id = format!("c{}", state.next_id);
        state.next_id += 1;
        state.clock += chrono::Duration::seconds(1);
        let created_at = state.clock;
        state.comments.push(RawComment {
            id: id.clone(),
            author: "snaphunt-bot".to_string(),
            parent_id: parent_id.to_string(),
            body: body.to_string(),
            created_at,
            permalink: format!("/p1/{id}"),
        });
        Ok(id)
    }

    async fn list_comments(
        &self,
        _post_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawComment>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .comments
            .iter()
            .filter(|c| since.is_none_or(|s| c.created_at > s))
            .cloned()
            .collect())
    }
}

#[tokio::test]
async fn test_create_then_recover_reproduces_roles() {
    let forum = InMemoryForum::new();

    let thread = create_thread(forum.as_ref(), "p1").await.unwrap().into_shared();
    publish::announce_round(
        forum.as_ref(),
        &thread,
        1,
        "Find a red car",
        Duration::from_secs(180),
    )
    .await
    .unwrap();
    publish::announce_round(
        forum.as_ref(),
        &thread,
        2,
        "Catch a sunset",
        Duration::from_secs(180),
    )
    .await
    .unwrap();

    // A player submits under round 1, and the round is decided.
    let round1_id = thread.read().await.round_comment_ids[0].clone();
    let submission_id = forum
        .create_comment(&round1_id, "my photo: https://img.example/1.jpg")
        .await
        .unwrap();
    publish::record_submission(&thread, &submission_id).await;
    publish::announce_winner(forum.as_ref(), &thread, 1, "alice", 15)
        .await
        .unwrap();

    let recovered = recover_thread(forum.as_ref(), "p1").await.unwrap();
    let original = thread.read().await;

    assert_eq!(recovered.post_id, original.post_id);
    assert_eq!(recovered.game_comment_id, original.game_comment_id);
    assert_eq!(recovered.rules_comment_id, original.rules_comment_id);
    assert_eq!(recovered.status_comment_id, original.status_comment_id);
    assert_eq!(recovered.round_comment_ids, original.round_comment_ids);
    assert_eq!(
        recovered.submission_comment_ids,
        original.submission_comment_ids
    );
}

#[tokio::test]
async fn test_recover_rejects_unseeded_post() {
    let forum = InMemoryForum::new();
    forum.create_comment("p1", "just a lonely comment").await.unwrap();

    assert!(recover_thread(forum.as_ref(), "p1").await.is_err());
}

#[tokio::test]
async fn test_timer_uses_recorded_creation_times() {
    let forum = InMemoryForum::new();

    let thread = create_thread(forum.as_ref(), "p1").await.unwrap().into_shared();

    let sync = {
        let guard = thread.read().await;
        timer::synchronize_client_timer(forum.as_ref(), &guard).await
    };
    let game_created = forum
        .comment_created_at(&thread.read().await.game_comment_id)
        .unwrap();
    assert_eq!(sync.game_start_time, game_created);
    assert!(sync.round_start_time.is_none(), "No round has started yet");

    publish::announce_round(
        forum.as_ref(),
        &thread,
        1,
        "Find a red car",
        Duration::from_secs(180),
    )
    .await
    .unwrap();

    let sync = {
        let guard = thread.read().await;
        timer::synchronize_client_timer(forum.as_ref(), &guard).await
    };
    let round_created = forum
        .comment_created_at(&thread.read().await.round_comment_ids[0])
        .unwrap();
    assert_eq!(sync.round_start_time, Some(round_created));
}

#[tokio::test]
async fn test_published_updates_come_back_through_polling() {
    let forum = InMemoryForum::new();
    let thread = create_thread(forum.as_ref(), "p1").await.unwrap().into_shared();

    let settings = PollerSettings {
        base_interval: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        max_consecutive_errors: 3,
        channel_capacity: 16,
    };
    let engine = PollingEngine::new(Arc::clone(&forum) as Arc<dyn Gateway>, settings);
    let mut rx = engine.initialize_game_polling(&thread).await.unwrap();

    publish::announce_round(
        forum.as_ref(),
        &thread,
        1,
        "Find a red car",
        Duration::from_secs(180),
    )
    .await
    .unwrap();

    // The seed status comment also decodes; skip until the round arrives.
    let round_started = wait_for_update(&mut rx, |u| {
        matches!(u, GameUpdate::RoundStarted { round: 1, .. })
    })
    .await;
    match round_started {
        GameUpdate::RoundStarted { prompt, duration, .. } => {
            assert_eq!(prompt, "Find a red car");
            assert_eq!(duration, Some(Duration::from_secs(180)));
        }
        other => panic!("Expected RoundStarted, got {other:?}"),
    }

    publish::announce_winner(forum.as_ref(), &thread, 1, "alice", 15)
        .await
        .unwrap();

    let round_ended =
        wait_for_update(&mut rx, |u| matches!(u, GameUpdate::RoundEnded { .. })).await;
    assert_eq!(
        round_ended,
        GameUpdate::RoundEnded {
            round: Some(1),
            winner: "alice".to_string(),
            points: 15,
        }
    );

    let entries = vec![LeaderboardEntry {
        player: "alice".to_string(),
        score: 15,
        wins: 1,
    }];
    publish::post_leaderboard(forum.as_ref(), &thread, &entries)
        .await
        .unwrap();
    let leaderboard =
        wait_for_update(&mut rx, |u| matches!(u, GameUpdate::Leaderboard { .. })).await;
    assert_eq!(leaderboard, GameUpdate::Leaderboard { entries });

    publish::announce_lifecycle(forum.as_ref(), &thread, GamePhase::Ended)
        .await
        .unwrap();
    let ended = wait_for_update(&mut rx, |u| matches!(u, GameUpdate::Lifecycle { .. })).await;
    assert_eq!(
        ended,
        GameUpdate::Lifecycle {
            phase: GamePhase::Ended
        }
    );

    engine.stop_polling(&game_key("p1")).await;
}

async fn wait_for_update<F>(
    rx: &mut tokio::sync::mpsc::Receiver<GameUpdate>,
    predicate: F,
) -> GameUpdate
where
    F: Fn(&GameUpdate) -> bool,
{
    loop {
        let update = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Timed out waiting for update")
            .expect("Channel closed unexpectedly");
        if predicate(&update) {
            return update;
        }
    }
}
