//! End-to-end CLI tests against a temporary database in discard mode.

use std::path::Path;
use std::process::{Command, Output};

use chrono::{Duration, SecondsFormat, Utc};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;

fn crosspost(db: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_crosspost"))
        .args(args)
        .env("CROSSPOST_DATABASE", db)
        .env("CROSSPOST_DISCARD_MODE", "1")
        .env("RUST_LOG", "off")
        .env("NO_COLOR", "1")
        .env_remove("BLUESKY_IDENTIFIER")
        .env_remove("BLUESKY_APP_PASSWORD")
        .env_remove("MASTODON_API_URL")
        .env_remove("MASTODON_ACCESS_TOKEN")
        .output()
        .expect("failed to run crosspost")
}

fn json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

fn minutes_ago(minutes: i64) -> String {
    (Utc::now() - Duration::minutes(minutes)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[test]
fn test_schedule_tick_and_history() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crosspost.db");

    let at = minutes_ago(1);
    let item = json(&crosspost(
        &db,
        &["schedule", "hello world", "--platforms", "bluesky,mastodon", "--at", &at],
    ));
    let id = item["id"].as_i64().unwrap().to_string();
    assert_eq!(item["status"], "scheduled");

    let tick = json(&crosspost(&db, &["tick"]));
    assert_eq!(tick["posts"]["succeeded"], 1);
    assert_eq!(tick["posts"]["failed"], 0);

    let history = json(&crosspost(&db, &["history", &id]));
    let statuses: Vec<_> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["skipped", "skipped"]);

    let again = json(&crosspost(&db, &["tick"]));
    assert_eq!(again["posts"]["total"], 0);
}

#[test]
fn test_missed_post_is_parked_then_discarded() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crosspost.db");

    let at = minutes_ago(120);
    let item = json(&crosspost(
        &db,
        &["schedule", "stale", "--platforms", "mastodon", "--at", &at],
    ));
    let id = item["id"].as_i64().unwrap().to_string();

    let tick = json(&crosspost(&db, &["tick", "--reconcile"]));
    assert_eq!(tick["parked"], serde_json::json!([item["id"]]));
    assert_eq!(tick["posts"]["total"], 0);

    let pending = json(&crosspost(&db, &["pending"]));
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["pending_reason"], "missed_while_offline");

    let discarded = json(&crosspost(&db, &["discard-pending", &id]));
    assert_eq!(discarded["status"], "skipped");
    assert_eq!(discarded["pending_reason"], "discarded_by_user");

    let pending = json(&crosspost(&db, &["pending"]));
    assert!(pending.as_array().unwrap().is_empty());
}

#[test]
fn test_thread_publishes_immediately() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crosspost.db");

    let created = json(&crosspost(
        &db,
        &[
            "schedule-thread",
            "first",
            "second",
            "--platforms",
            "bluesky",
            "--at",
            "2099-01-01T00:00:00Z",
        ],
    ));
    let id = created["thread"]["id"].as_i64().unwrap().to_string();
    assert_eq!(created["segments"].as_array().unwrap().len(), 2);

    let thread = json(&crosspost(&db, &["publish-thread-now", &id]));
    assert_eq!(thread["status"], "published");
}

#[test]
fn test_media_is_attached_to_posts_and_segments() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crosspost.db");

    let item = json(&crosspost(
        &db,
        &[
            "schedule",
            "album",
            "--platforms",
            "bluesky",
            "--at",
            "2099-01-01T00:00:00Z",
            "--media",
            "/srv/media/one.png=first photo",
            "--media",
            "/srv/media/two.jpg",
        ],
    ));
    let media = item["media"].as_array().unwrap();
    assert_eq!(media.len(), 2);
    assert_eq!(media[0]["mime"], "image/png");
    assert_eq!(media[0]["alt_text"], "first photo");
    assert_eq!(media[1]["mime"], "image/jpeg");

    let created = json(&crosspost(
        &db,
        &[
            "schedule-thread",
            "first",
            "second",
            "--platforms",
            "mastodon",
            "--at",
            "2099-01-01T00:00:00Z",
            "--media",
            "2:/srv/media/chart.png=chart",
        ],
    ));
    let segments = created["segments"].as_array().unwrap();
    assert!(segments[0]["media"].as_array().unwrap().is_empty());
    assert_eq!(segments[1]["media"][0]["alt_text"], "chart");

    let out_of_range = crosspost(
        &db,
        &[
            "schedule-thread",
            "only",
            "--platforms",
            "mastodon",
            "--at",
            "2099-01-01T00:00:00Z",
            "--media",
            "3:/srv/media/chart.png",
        ],
    );
    assert!(!out_of_range.status.success());
}

#[test]
fn test_invalid_items_are_rejected() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crosspost.db");

    let missing_time = crosspost(&db, &["schedule", "no time", "--platforms", "bluesky"]);
    assert!(!missing_time.status.success());
    assert!(String::from_utf8_lossy(&missing_time.stderr).contains("scheduled_at is required"));

    let long = "x".repeat(301);
    let too_long = crosspost(
        &db,
        &["schedule", &long, "--platforms", "bluesky", "--at", "2099-01-01T00:00:00Z"],
    );
    assert!(!too_long.status.success());
    let stderr = String::from_utf8_lossy(&too_long.stderr);
    assert!(stderr.contains("300") && stderr.contains("301"));

    let unknown = crosspost(&db, &["publish-now", "999"]);
    assert!(!unknown.status.success());
    assert!(String::from_utf8_lossy(&unknown.stderr).contains("item not found: 999"));
}
