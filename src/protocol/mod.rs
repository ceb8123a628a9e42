//! The comment-text update protocol.
//!
//! Game events travel through the forum as human-readable comments. This
//! module owns both directions: encoding structured events into comment
//! bodies, and decoding comment bodies back into [`GameUpdate`]s. The
//! encoder's output is later re-read by the poller, so the textual markers
//! here are a wire format and must stay stable.
//!
//! Decoding is tolerant. Comments written by humans, or by older encoder
//! versions missing optional fields, must never produce an error: anything
//! unrecognized decodes to `None` and is skipped.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::gateway::RawComment;
use crate::thread::{GameThread, Role};

/// One entry of a leaderboard snapshot, in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player: String,
    pub score: u32,
    pub wins: u32,
}

/// Game lifecycle phases announced in the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Started,
    Paused,
    Resumed,
    Ended,
}

/// A structured game event decoded from a comment.
///
/// Only produced by [`decode`]; game logic consumes these, it never
/// constructs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameUpdate {
    RoundStarted {
        round: u32,
        prompt: String,
        duration: Option<Duration>,
    },
    RoundEnded {
        round: Option<u32>,
        winner: String,
        points: u32,
    },
    Status {
        round: u32,
        submissions: u32,
        time_remaining: Option<Duration>,
    },
    Leaderboard {
        entries: Vec<LeaderboardEntry>,
    },
    Lifecycle {
        phase: GamePhase,
    },
}

static ROUND_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*ROUND\s+(\d+)\*\*(.*)").expect("Invalid regex"));
static TIME_REMAINING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*Time Remaining:\*\*\s*(\d{1,3}):(\d{2})").expect("Invalid regex"));
static WINNER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*\*WINNER:?\*\*:?\s*(?:u/)?(\S+)").expect("Invalid regex")
});
static WINNER_ROUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[Rr]ound\s+(\d+)").expect("Invalid regex"));
static WINNER_POINTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s+points?").expect("Invalid regex"));
static STATUS_ROUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*Round:\*\*\s*(\d+)").expect("Invalid regex"));
static STATUS_SUBMISSIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*Submissions:\*\*\s*(\d+)").expect("Invalid regex"));
static LEADERBOARD_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(\d+)[.)]\s+(?:u/)?(\S+)\s+-\s+(\d+)\s+points?\s+\((\d+)\s+wins?\)")
        .expect("Invalid regex")
});

/// Format a duration as a `MM:SS` clock string.
#[must_use]
pub fn format_clock(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}", total / 60, total % 60)
}

fn parse_clock(minutes: &str, seconds: &str) -> Option<Duration> {
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    Some(Duration::from_secs(minutes * 60 + seconds))
}

/// Encode a round announcement.
#[must_use]
pub fn encode_round_start(round: u32, prompt: &str, duration: Duration) -> String {
    format!(
        "\u{1f3af} **ROUND {round}**\n\n**{prompt}**\n\n**Time Remaining:** {}\n\n\
         Reply to this comment with a link to your photo!",
        format_clock(duration)
    )
}

/// Encode a round-end announcement.
#[must_use]
pub fn encode_round_end(round: u32, winner: &str, points: u32) -> String {
    format!("\u{1f3c6} **WINNER:** u/{winner} takes Round {round} with {points} points!")
}

/// Encode a status snapshot.
#[must_use]
pub fn encode_status(round: u32, submissions: u32, time_remaining: Option<Duration>) -> String {
    let mut body = format!(
        "\u{1f4ca} **Game Status**\n\n**Round:** {round}\n**Submissions:** {submissions}"
    );
    if let Some(remaining) = time_remaining {
        body.push_str(&format!("\n**Time Remaining:** {}", format_clock(remaining)));
    }
    body
}

/// Encode a leaderboard snapshot.
#[must_use]
pub fn encode_leaderboard(entries: &[LeaderboardEntry]) -> String {
    let mut body = String::from("\u{1f3c6} **LEADERBOARD**\n");
    for (rank, entry) in entries.iter().enumerate() {
        let wins_word = if entry.wins == 1 { "win" } else { "wins" };
        body.push_str(&format!(
            "\n{}. u/{} - {} points ({} {wins_word})",
            rank + 1,
            entry.player,
            entry.score,
            entry.wins
        ));
    }
    body
}

/// Encode a game lifecycle announcement.
#[must_use]
pub fn encode_lifecycle(phase: GamePhase) -> String {
    match phase {
        GamePhase::Started => "\u{1f3ae} **GAME STARTED** Round one is on its way.".to_string(),
        GamePhase::Paused => "\u{23f8}\u{fe0f} **GAME PAUSED**".to_string(),
        GamePhase::Resumed => "\u{25b6}\u{fe0f} **GAME RESUMED**".to_string(),
        GamePhase::Ended => "\u{1f3c1} **GAME ENDED** Thanks for playing!".to_string(),
    }
}

/// Whether a comment body carries a round announcement header.
#[must_use]
pub fn is_round_announcement(body: &str) -> bool {
    ROUND_HEADER.is_match(body)
}

/// Decode a comment into a structured game update.
///
/// Classification uses two signals: which role slot of the thread the
/// comment's parent matches, and which textual markers the body carries.
/// Comments with an unknown parent, or with no recognized marker, decode
/// to `None` and are skipped. Decoding is pure: the same comment always
/// yields the same result.
#[must_use]
pub fn decode(comment: &RawComment, thread: &GameThread) -> Option<GameUpdate> {
    let role = thread.role_of(&comment.parent_id)?;
    let body = comment.body.as_str();

    match role {
        // Announcements live at the top of the thread or under the game
        // metadata comment.
        Role::Post | Role::Game => decode_round_start(body)
            .or_else(|| decode_status(body))
            .or_else(|| decode_leaderboard(body))
            .or_else(|| decode_round_end(body))
            .or_else(|| decode_lifecycle(body)),
        // The status slot holds refreshed snapshots and leaderboards.
        Role::Status => decode_status(body).or_else(|| decode_leaderboard(body)),
        // Replies to a round comment are either the winner announcement or
        // player submissions; submissions are not updates.
        Role::Round(_) => decode_round_end(body),
        Role::Rules | Role::Submission(_) => None,
    }
}

fn decode_round_start(body: &str) -> Option<GameUpdate> {
    let captures = ROUND_HEADER.captures(body)?;
    let round: u32 = captures.get(1)?.as_str().parse().ok()?;

    let prompt = prompt_after_header(body, captures.get(2)?.as_str())?;
    let duration = TIME_REMAINING
        .captures(body)
        .and_then(|c| parse_clock(c.get(1)?.as_str(), c.get(2)?.as_str()));

    Some(GameUpdate::RoundStarted {
        round,
        prompt,
        duration,
    })
}

/// Pull the prompt out of a round announcement. The prompt either trails
/// the header on the same line or sits on the first non-empty line after
/// it, usually bolded.
fn prompt_after_header(body: &str, rest_of_line: &str) -> Option<String> {
    let inline = clean_prompt(rest_of_line);
    if !inline.is_empty() {
        return Some(inline);
    }

    let header_end = body.find("**ROUND")?;
    body[header_end..]
        .lines()
        .skip(1)
        .map(clean_prompt)
        .find(|line| !line.is_empty())
}

fn clean_prompt(raw: &str) -> String {
    let mut text = raw;
    // Drop any labeled field sharing the line with the prompt.
    if let Some(cut) = text.find("**Time Remaining:") {
        text = &text[..cut];
    }
    let text = text.trim().trim_matches('*').trim();
    let text = text
        .strip_suffix("...")
        .or_else(|| text.strip_suffix('\u{2026}'))
        .unwrap_or(text);
    // Labeled lines are fields, not prompts.
    if text.starts_with("Time Remaining:") || text.starts_with("Reply to this comment") {
        return String::new();
    }
    text.trim().to_string()
}

fn decode_round_end(body: &str) -> Option<GameUpdate> {
    let captures = WINNER_LINE.captures(body)?;
    let winner = captures
        .get(1)?
        .as_str()
        .trim_end_matches(|c: char| !c.is_alphanumeric())
        .to_string();
    if winner.is_empty() {
        return None;
    }

    let round = WINNER_ROUND
        .captures(body)
        .and_then(|c| c.get(1)?.as_str().parse().ok());
    let points = WINNER_POINTS
        .captures(body)
        .and_then(|c| c.get(1)?.as_str().parse().ok())
        .unwrap_or(0);

    Some(GameUpdate::RoundEnded {
        round,
        winner,
        points,
    })
}

fn decode_status(body: &str) -> Option<GameUpdate> {
    if !body.contains("Game Status") {
        return None;
    }

    let round = STATUS_ROUND
        .captures(body)
        .and_then(|c| c.get(1)?.as_str().parse().ok())
        .unwrap_or(0);
    let submissions = STATUS_SUBMISSIONS
        .captures(body)
        .and_then(|c| c.get(1)?.as_str().parse().ok())
        .unwrap_or(0);
    let time_remaining = TIME_REMAINING
        .captures(body)
        .and_then(|c| parse_clock(c.get(1)?.as_str(), c.get(2)?.as_str()));

    Some(GameUpdate::Status {
        round,
        submissions,
        time_remaining,
    })
}

fn decode_leaderboard(body: &str) -> Option<GameUpdate> {
    if !body.contains("LEADERBOARD") {
        return None;
    }

    let entries: Vec<LeaderboardEntry> = LEADERBOARD_ENTRY
        .captures_iter(body)
        .filter_map(|c| {
            Some(LeaderboardEntry {
                player: c.get(2)?.as_str().to_string(),
                score: c.get(3)?.as_str().parse().ok()?,
                wins: c.get(4)?.as_str().parse().ok()?,
            })
        })
        .collect();

    Some(GameUpdate::Leaderboard { entries })
}

fn decode_lifecycle(body: &str) -> Option<GameUpdate> {
    let phase = if body.contains("GAME STARTED") {
        GamePhase::Started
    } else if body.contains("GAME PAUSED") {
        GamePhase::Paused
    } else if body.contains("GAME RESUMED") {
        GamePhase::Resumed
    } else if body.contains("GAME ENDED") {
        GamePhase::Ended
    } else {
        return None;
    };

    Some(GameUpdate::Lifecycle { phase })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn test_thread() -> GameThread {
        let mut thread = GameThread::new("p1", "c_game", "c_rules", "c_status");
        thread.append_round("c_round1");
        thread
    }

    fn comment(parent_id: &str, body: &str) -> RawComment {
        RawComment {
            id: "c_test".to_string(),
            author: "snaphunt-bot".to_string(),
            parent_id: parent_id.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            permalink: "/p1/c_test".to_string(),
        }
    }

    #[test]
    fn test_round_start_round_trip() {
        let thread = test_thread();
        let body = encode_round_start(7, "Find a red car", Duration::from_secs(180));
        let update = decode(&comment("p1", &body), &thread).expect("Should decode");

        assert_eq!(
            update,
            GameUpdate::RoundStarted {
                round: 7,
                prompt: "Find a red car".to_string(),
                duration: Some(Duration::from_secs(180)),
            }
        );
    }

    #[test]
    fn test_round_start_inline_prompt() {
        // The announcement format older game versions posted: everything on
        // one line.
        let thread = test_thread();
        let body = "\u{1f3af} **ROUND 1** Find a red car ... **Time Remaining:** 03:00";
        let update = decode(&comment("p1", body), &thread).expect("Should decode");

        match update {
            GameUpdate::RoundStarted {
                round,
                prompt,
                duration,
            } => {
                assert_eq!(round, 1);
                assert_eq!(prompt, "Find a red car");
                assert_eq!(duration, Some(Duration::from_secs(180)));
            }
            other => panic!("Expected RoundStarted, got {other:?}"),
        }
    }

    #[test]
    fn test_round_start_without_time_remaining() {
        let thread = test_thread();
        let body = "**ROUND 2**\n\n**Photograph your breakfast**";
        let update = decode(&comment("p1", body), &thread).expect("Should decode");

        assert_eq!(
            update,
            GameUpdate::RoundStarted {
                round: 2,
                prompt: "Photograph your breakfast".to_string(),
                duration: None,
            }
        );
    }

    #[test]
    fn test_round_end_round_trip() {
        let thread = test_thread();
        let body = encode_round_end(3, "alice", 15);
        let update = decode(&comment("c_round1", &body), &thread).expect("Should decode");

        assert_eq!(
            update,
            GameUpdate::RoundEnded {
                round: Some(3),
                winner: "alice".to_string(),
                points: 15,
            }
        );
    }

    #[test]
    fn test_status_round_trip() {
        let thread = test_thread();
        let body = encode_status(2, 5, Some(Duration::from_secs(90)));
        let update = decode(&comment("c_status", &body), &thread).expect("Should decode");

        assert_eq!(
            update,
            GameUpdate::Status {
                round: 2,
                submissions: 5,
                time_remaining: Some(Duration::from_secs(90)),
            }
        );
    }

    #[test]
    fn test_status_missing_time_remaining() {
        let thread = test_thread();
        let body = "\u{1f4ca} **Game Status**\n\n**Round:** 4\n**Submissions:** 12";
        let update = decode(&comment("c_status", body), &thread).expect("Should decode");

        assert_eq!(
            update,
            GameUpdate::Status {
                round: 4,
                submissions: 12,
                time_remaining: None,
            }
        );
    }

    #[test]
    fn test_leaderboard_round_trip() {
        let thread = test_thread();
        let entries = vec![
            LeaderboardEntry {
                player: "alice".to_string(),
                score: 15,
                wins: 2,
            },
            LeaderboardEntry {
                player: "bob".to_string(),
                score: 10,
                wins: 1,
            },
        ];
        let body = encode_leaderboard(&entries);
        let update = decode(&comment("p1", &body), &thread).expect("Should decode");

        assert_eq!(update, GameUpdate::Leaderboard { entries });
    }

    #[test]
    fn test_lifecycle_markers() {
        let thread = test_thread();
        for phase in [
            GamePhase::Started,
            GamePhase::Paused,
            GamePhase::Resumed,
            GamePhase::Ended,
        ] {
            let body = encode_lifecycle(phase);
            let update = decode(&comment("p1", &body), &thread).expect("Should decode");
            assert_eq!(update, GameUpdate::Lifecycle { phase });
        }
    }

    #[test]
    fn test_unrelated_reply_decodes_to_none() {
        let thread = test_thread();
        assert_eq!(decode(&comment("p1", "nice game everyone!"), &thread), None);
        // Submissions under a round comment are not updates either.
        assert_eq!(
            decode(&comment("c_round1", "here is my photo: https://img.example/1.jpg"), &thread),
            None
        );
    }

    #[test]
    fn test_unknown_parent_decodes_to_none() {
        let thread = test_thread();
        let body = encode_round_start(1, "Find a red car", Duration::from_secs(60));
        assert_eq!(decode(&comment("c_elsewhere", &body), &thread), None);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let thread = test_thread();
        let c = comment("p1", "\u{1f3af} **ROUND 9** Catch a sunset");
        assert_eq!(decode(&c, &thread), decode(&c, &thread));
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(Duration::from_secs(0)), "00:00");
        assert_eq!(format_clock(Duration::from_secs(90)), "01:30");
        assert_eq!(format_clock(Duration::from_secs(600)), "10:00");
    }
}
