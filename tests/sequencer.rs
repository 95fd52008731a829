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

//! Sequencer integration test
//! Insert, move, soft-delete and restore keep the active siblings numbered 1..N, and a
//! failed transaction leaves the ordering as it was

use cache_aside::errors::SequenceError;
use cache_aside::errors::StoreError;
use cache_aside::testing::types::TestConfig;
use cache_aside::testing::util::check_order;
use cache_aside::testing::util::doc;
use cache_aside::testing::util::new_sequencer;
use cache_aside::OrderedScope;
use cache_aside::Sequencer;
use pretty_assertions::assert_eq;
use serde_json::json;
use serde_json::Value;

const COURSE: &str = "c1";

async fn seed(seq: &Sequencer<TestConfig>, parent: &str, ids: &[&str]) -> anyhow::Result<()> {
    for id in ids {
        seq.insert_at_end(parent, doc(json!({"id": id, "title": format!("item {}", id)})))
            .await?;
    }
    Ok(())
}

async fn assert_order(seq: &Sequencer<TestConfig>, parent: &str, expected: &[&str]) {
    match check_order(seq, parent, expected).await {
        Ok(Ok(())) => {}
        Ok(Err(msg)) => panic!("ordering check failed: {msg}"),
        Err(e) => panic!("store failed during ordering check: {e}"),
    }
}

#[tokio::test]
async fn test_insert_at_end() -> anyhow::Result<()> {
    let (seq, _store) = new_sequencer(OrderedScope::COURSE_CONTENTS);

    let a = seq.insert_at_end(COURSE, doc(json!({"id": "a"}))).await?;
    let b = seq.insert_at_end(COURSE, doc(json!({"id": "b"}))).await?;
    assert_eq!(a.index, Some(1));
    assert_eq!(b.index, Some(2));
    assert_eq!(b.parent_id, COURSE);
    assert_eq!(b.document["courseId"], json!(COURSE));

    // Another parent starts from 1
    let x = seq.insert_at_end("c2", doc(json!({"id": "x"}))).await?;
    assert_eq!(x.index, Some(1));

    assert_order(&seq, COURSE, &["a", "b"]).await;
    Ok(())
}

#[tokio::test]
async fn test_insert_many_at_end() -> anyhow::Result<()> {
    let (seq, _store) = new_sequencer(OrderedScope::QUIZ_OPTIONS);
    seed(&seq, "q1", &["a"]).await?;

    let items = seq
        .insert_many_at_end("q1", vec![doc(json!({"id": "b"})), doc(json!({"id": "c"}))])
        .await?;
    let indices: Vec<Option<u32>> = items.iter().map(|i| i.index).collect();
    assert_eq!(indices, vec![Some(2), Some(3)]);

    assert!(seq.insert_many_at_end("q1", vec![]).await?.is_empty());
    assert_order(&seq, "q1", &["a", "b", "c"]).await;
    Ok(())
}

#[tokio::test]
async fn test_move_backward() -> anyhow::Result<()> {
    // 1. Items at [1,2,3]
    let (seq, _store) = new_sequencer(OrderedScope::COURSE_CONTENTS);
    seed(&seq, COURSE, &["a", "b", "c"]).await?;

    // 2. Move the item at 3 to 1
    let moved = seq.move_to("c", 1).await?;
    assert_eq!(moved.index, Some(1));

    // 3. Former 1 is now 2, former 2 is now 3
    assert_order(&seq, COURSE, &["c", "a", "b"]).await;
    Ok(())
}

#[tokio::test]
async fn test_move_forward_and_in_place() -> anyhow::Result<()> {
    let (seq, store) = new_sequencer(OrderedScope::COURSE_CONTENTS);
    seed(&seq, COURSE, &["a", "b", "c", "d"]).await?;

    seq.move_to("a", 3).await?;
    assert_order(&seq, COURSE, &["b", "c", "a", "d"]).await;

    let committed = store.state.lock().await.committed;
    let same = seq.move_to("a", 3).await?;
    assert_eq!(same.index, Some(3));
    assert_eq!(store.state.lock().await.committed, committed, "no-op commits nothing");
    Ok(())
}

#[tokio::test]
async fn test_move_out_of_range() -> anyhow::Result<()> {
    let (seq, store) = new_sequencer(OrderedScope::COURSE_CONTENTS);
    seed(&seq, COURSE, &["a", "b", "c"]).await?;
    let before = store.snapshot("course_contents").await;

    for bad in [0, 4, 1000] {
        let err = seq.move_to("b", bad).await.unwrap_err();
        assert!(err.is_bad_request(), "index {}: {}", bad, err);
        assert_eq!(err.to_string(), format!("Index must be between 1 and 3, got {}", bad));
    }

    assert_eq!(store.snapshot("course_contents").await, before);
    Ok(())
}

#[tokio::test]
async fn test_move_unknown_or_deleted_is_not_found() -> anyhow::Result<()> {
    let (seq, _store) = new_sequencer(OrderedScope::COURSE_CONTENTS);
    seed(&seq, COURSE, &["a", "b"]).await?;

    assert!(seq.move_to("nope", 1).await.unwrap_err().is_not_found());

    seq.soft_delete("a").await?;
    assert!(seq.move_to("a", 1).await.unwrap_err().is_not_found());
    Ok(())
}

#[tokio::test]
async fn test_delete_compacts_and_restore_appends() -> anyhow::Result<()> {
    // 1. Delete the middle of [1,2,3]
    let (seq, _store) = new_sequencer(OrderedScope::QUIZZES);
    seed(&seq, "content-1", &["a", "b", "c"]).await?;

    let deleted = seq.soft_delete("b").await?;
    assert!(deleted.is_deleted);
    assert_eq!(deleted.index, None);
    assert_eq!(deleted.document["index"], Value::Null);
    assert_order(&seq, "content-1", &["a", "c"]).await;

    // 2. Deleting again changes nothing
    let again = seq.soft_delete("b").await?;
    assert_eq!(again, deleted);

    // 3. Restore appends at the end, not at the former position
    let restored = seq.restore("b").await?;
    assert!(!restored.is_deleted);
    assert_eq!(restored.index, Some(3));
    assert_order(&seq, "content-1", &["a", "c", "b"]).await;

    // 4. Restoring an active item changes nothing
    assert_eq!(seq.restore("b").await?.index, Some(3));
    Ok(())
}

#[tokio::test]
async fn test_toggle_delete() -> anyhow::Result<()> {
    let (seq, _store) = new_sequencer(OrderedScope::QUIZZES);
    seed(&seq, "content-1", &["a", "b"]).await?;

    assert!(seq.toggle_delete("a").await?.is_deleted);
    assert_order(&seq, "content-1", &["b"]).await;

    assert_eq!(seq.toggle_delete("a").await?.index, Some(2));
    assert_order(&seq, "content-1", &["b", "a"]).await;
    Ok(())
}

#[tokio::test]
async fn test_failed_transaction_changes_nothing() -> anyhow::Result<()> {
    // 1. A dense ordering
    let (seq, store) = new_sequencer(OrderedScope::COURSE_CONTENTS);
    seed(&seq, COURSE, &["a", "b", "c"]).await?;
    let before = store.snapshot("course_contents").await;

    // 2. Every mutation fails at the transaction layer
    store.fail_next_transactions(1).await;
    assert!(seq.move_to("c", 1).await.is_err());
    store.fail_next_transactions(1).await;
    assert!(seq.soft_delete("a").await.is_err());
    store.fail_next_transactions(1).await;
    assert!(seq.insert_at_end(COURSE, doc(json!({"id": "d"}))).await.is_err());

    // 3. State is unchanged, and the same call succeeds when retried
    assert_eq!(store.snapshot("course_contents").await, before);
    seq.move_to("c", 1).await?;
    assert_order(&seq, COURSE, &["c", "a", "b"]).await;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_insert_is_rejected() -> anyhow::Result<()> {
    // 1. a and b under c1
    let (seq, store) = new_sequencer(OrderedScope::COURSE_CONTENTS);
    seed(&seq, COURSE, &["a", "b"]).await?;
    let before = store.snapshot("course_contents").await;

    // 2. Re-inserting a under c1, or b under c2, fails on the existing id
    let err = seq.insert_at_end(COURSE, doc(json!({"id": "a"}))).await.unwrap_err();
    assert_eq!(
        err,
        SequenceError::Store(StoreError::duplicate("course_contents", "a"))
    );
    let err = seq.insert_at_end("c2", doc(json!({"id": "b"}))).await.unwrap_err();
    assert_eq!(
        err,
        SequenceError::Store(StoreError::duplicate("course_contents", "b"))
    );

    // 3. Neither write landed: both scopes stay dense
    assert_eq!(store.snapshot("course_contents").await, before);
    assert_order(&seq, COURSE, &["a", "b"]).await;
    assert_eq!(seq.verify_dense("c2").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_parents_are_independent() -> anyhow::Result<()> {
    let (seq, _store) = new_sequencer(OrderedScope::COURSE_CONTENTS);
    seed(&seq, "c1", &["a1", "b1", "c1x"]).await?;
    seed(&seq, "c2", &["a2", "b2"]).await?;

    seq.soft_delete("a1").await?;
    seq.move_to("b2", 1).await?;

    assert_order(&seq, "c1", &["b1", "c1x"]).await;
    assert_order(&seq, "c2", &["b2", "a2"]).await;
    assert_eq!(seq.verify_dense("c3").await?, 0);
    Ok(())
}
