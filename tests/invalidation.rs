// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Invalidation integration test
//! Evict and merge-update by glob pattern across many scan rounds, and the write-side
//! entry point that picks the patterns per entity

use std::time::Duration;

use cache_aside::errors::StoreError;
use cache_aside::testing::util::doc;
use cache_aside::testing::util::new_cache;
use cache_aside::testing::util::user_page;
use cache_aside::CacheConfig;
use cache_aside::Entity;
use cache_aside::WriteEffect;
use cache_aside::WriteReport;
use futures::TryStreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use serde_json::Value;

const TTL: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_remove_by_pattern() -> anyhow::Result<()> {
    // 1. Keys of user 42, user 420 and an unrelated group
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    let records = cache.records();
    records.set("user-42-details", &json!({"id": "42"}), TTL).await?;
    records.set("user-42-settings", &json!({}), TTL).await?;
    records.set("user-420-details", &json!({"id": "420"}), TTL).await?;
    records.set("group-42-details", &json!({"id": "42"}), TTL).await?;

    // 2. Only the keys of user 42 are removed
    let removed = cache.invalidation().remove_by_pattern("user-42-*").await?;
    assert_eq!(removed, 2);
    assert_eq!(mem.keys().await, vec![
        "group-42-details".to_string(),
        "user-420-details".to_string(),
    ]);

    // 3. Nothing left to match
    assert_eq!(cache.invalidation().remove_by_pattern("user-42-*").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_remove_spans_scan_rounds() -> anyhow::Result<()> {
    let (cache, mem) = new_cache(CacheConfig::default().with_scan_batch_size(7)).await;
    let records = cache.records();
    for i in 0..50 {
        records.set(&format!("post-{}-details", i), &json!({"id": i}), TTL).await?;
    }
    records.set("tier-1-details", &json!({"id": "1"}), TTL).await?;

    let rounds: Vec<Vec<String>> = cache.invalidation().scan("post-*").try_collect().await?;
    assert!(rounds.len() > 1);
    assert_eq!(rounds.iter().map(|r| r.len()).sum::<usize>(), 50);

    mem.reset_stats().await;
    let removed = cache.invalidation().remove_by_pattern("post-*").await?;
    assert_eq!(removed, 50);
    assert!(mem.stats().await.scan > 1);
    assert_eq!(mem.keys().await, vec!["tier-1-details".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_update_by_pattern_merges() -> anyhow::Result<()> {
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    cache.records().set("user-7-details", &json!({"a": 1, "b": 2}), TTL).await?;

    let report = cache
        .invalidation()
        .update_by_pattern("user-7-*", &doc(json!({"b": 3})), TTL)
        .await?;
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 0);

    let got: Option<Value> = cache.records().get("user-7-details").await?;
    assert_eq!(got, Some(json!({"a": 1, "b": 3})));
    assert!(mem.raw("user-7-details").await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_update_skips_non_objects() -> anyhow::Result<()> {
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    mem.insert_raw("user-7-details", r#"{"a":1}"#, TTL).await;
    mem.insert_raw("user-7-tags", r#"["x","y"]"#, TTL).await;
    mem.insert_raw("user-7-raw", "garbage", TTL).await;

    let report = cache
        .invalidation()
        .update_by_pattern("user-7-*", &doc(json!({"a": 2})), TTL)
        .await?;

    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(mem.raw("user-7-tags").await.as_deref(), Some(r#"["x","y"]"#));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_update_skips_vanished_keys() -> anyhow::Result<()> {
    // 1. One key expires after it is scanned; simulated by expiring it before the merge
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    mem.insert_raw("content-1-details", r#"{"n":1}"#, Duration::from_secs(1)).await;
    mem.insert_raw("content-1-extra", r#"{"n":1}"#, TTL).await;

    tokio::time::advance(Duration::from_secs(2)).await;

    // 2. The expired key is not matched; the live one is merged with a refreshed TTL
    let report = cache
        .invalidation()
        .update_by_pattern("content-1-*", &doc(json!({"n": 2})), Duration::from_secs(100))
        .await?;
    assert_eq!(report.updated, 1);

    tokio::time::advance(Duration::from_secs(90)).await;
    assert_eq!(mem.raw("content-1-extra").await.as_deref(), Some(r#"{"n":2}"#));
    Ok(())
}

#[tokio::test]
async fn test_scan_failure_aborts() -> anyhow::Result<()> {
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    mem.set_down(true).await;

    assert!(cache.invalidation().remove_by_pattern("*").await.is_err());
    assert!(cache
        .invalidation()
        .update_by_pattern("*", &doc(json!({})), TTL)
        .await
        .is_err());
    Ok(())
}

#[tokio::test]
async fn test_after_write_created_drops_listings() -> anyhow::Result<()> {
    // 1. A cached listing and a cached record of users
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    cache
        .collections()
        .read(Entity::User, "all", TTL, || async { Ok::<_, StoreError>(user_page(2)) })
        .await?;

    // 2. A new user: the listing goes, the detail keys stay
    let report = cache.after_write(Entity::User, "u3", WriteEffect::Created).await?;
    assert_eq!(report.removed, 1);
    assert_eq!(mem.keys().await, vec![
        "user-u1-details".to_string(),
        "user-u2-details".to_string(),
    ]);
    Ok(())
}

#[tokio::test]
async fn test_after_write_patch_reaches_relations() -> anyhow::Result<()> {
    // 1. A user's detail key and a membership record that embeds the user
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    let records = cache.records();
    records.set("user-u1-details", &json!({"id": "u1", "name": "ann"}), TTL).await?;
    records
        .set("user-group-u1-g1", &json!({"group": "g1", "name": "ann"}), TTL)
        .await?;
    records.set("user-u2-details", &json!({"id": "u2", "name": "bob"}), TTL).await?;

    // 2. Renaming u1 patches both, leaves u2 alone
    let report = cache
        .after_write(Entity::User, "u1", WriteEffect::Patched(doc(json!({"name": "anna"}))))
        .await?;
    assert_eq!(report.updated, 2);

    let rel: Option<Value> = records.get("user-group-u1-g1").await?;
    assert_eq!(rel, Some(json!({"group": "g1", "name": "anna"})));
    assert_eq!(
        mem.raw("user-u2-details").await.as_deref(),
        Some(r#"{"id":"u2","name":"bob"}"#)
    );
    Ok(())
}

#[tokio::test]
async fn test_after_write_patch_evicts_relations_owned_by_the_other_side() -> anyhow::Result<()> {
    // 1. A group's detail key and a membership record holding the user's fields
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    let records = cache.records();
    records
        .set("group-g1-details", &json!({"id": "g1", "name": "Admins"}), TTL)
        .await?;
    records
        .set("user-group-u1-g1", &json!({"group": "g1", "name": "ann"}), TTL)
        .await?;

    // 2. Renaming the group patches its own key and drops the membership record
    let report = cache
        .after_write(Entity::Group, "g1", WriteEffect::Patched(doc(json!({"name": "Design"}))))
        .await?;
    assert_eq!(report, WriteReport {
        removed: 1,
        updated: 1,
        skipped: 0,
    });

    // 3. The user's name was never overwritten with the group's
    let group: Option<Value> = records.get("group-g1-details").await?;
    assert_eq!(group, Some(json!({"id": "g1", "name": "Design"})));
    assert_eq!(mem.raw("user-group-u1-g1").await, None);
    Ok(())
}

#[tokio::test]
async fn test_after_write_delete_drops_everything_dependent() -> anyhow::Result<()> {
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    let records = cache.records();
    records.set("group-g1-details", &json!({"id": "g1"}), TTL).await?;
    records.set("user-group-u1-g1", &json!({}), TTL).await?;
    records.set("user-group-u1-g2", &json!({}), TTL).await?;
    records.set("groups-all", &json!({"ids": ["g1"]}), TTL).await?;

    let report = cache.after_write(Entity::Group, "g1", WriteEffect::Deleted).await?;

    assert_eq!(report, WriteReport {
        removed: 3,
        updated: 0,
        skipped: 0,
    });
    assert_eq!(mem.keys().await, vec!["user-group-u1-g2".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_after_bulk_write() -> anyhow::Result<()> {
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    let records = cache.records();
    records.set("quiz-1-details", &json!({}), TTL).await?;
    records.set("quizzes-all", &json!({}), TTL).await?;
    records.set("course-1-details", &json!({}), TTL).await?;

    let report = cache.after_bulk_write(Entity::Quiz).await?;
    assert_eq!(report.removed, 2);
    assert_eq!(mem.keys().await, vec!["course-1-details".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_after_bulk_write_reaches_relations_on_the_right() -> anyhow::Result<()> {
    // 1. Group keys, a membership that embeds a group, and an unrelated course enrollment
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    let records = cache.records();
    records.set("group-g1-details", &json!({"id": "g1"}), TTL).await?;
    records.set("groups-all", &json!({"ids": ["g1"]}), TTL).await?;
    records.set("user-group-u1-g1", &json!({"name": "ann"}), TTL).await?;
    records.set("user-course-u1-c1", &json!({"name": "ann"}), TTL).await?;

    // 2. A bulk write of groups drops all of them but the enrollment
    let report = cache.after_bulk_write(Entity::Group).await?;
    assert_eq!(report.removed, 3);
    assert_eq!(mem.keys().await, vec!["user-course-u1-c1".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_after_write_degrades() -> anyhow::Result<()> {
    // 1. Degrading cache: the write goes through, nothing is reported done
    let (cache, mem) = new_cache(CacheConfig::default()).await;
    mem.set_down(true).await;
    let report = cache.after_write(Entity::Forum, "f1", WriteEffect::Deleted).await?;
    assert_eq!(report, WriteReport::default());

    // 2. Strict cache: the failure is returned
    let (cache, mem) = new_cache(CacheConfig::default().with_degrade_on_error(false)).await;
    mem.set_down(true).await;
    let res = cache.after_write(Entity::Forum, "f1", WriteEffect::Deleted).await;
    assert!(res.is_err());
    Ok(())
}
