//! End-to-end engine flows over the in-memory store.
//!
//! Each test wires a full [`Engine`](autoengage::Engine) with scripted
//! collaborators and drives it through the public entry points: realtime
//! triggers, one-shot polls and inline dispatch. Wall-clock time is used for
//! discovery; dispatch is driven with explicit future instants so staggered
//! comments come due deterministically.

mod common;

use autoengage::collaborators::SinkResult;
use autoengage::discovery::{LinkTrigger, TriggerOutcome};
use autoengage::dispatch::ProcessOutcome;
use autoengage::models::{
    AccountKey, AccountState, ActionStatus, ActionType, DiscoverySource, Platform,
};
use autoengage::Store;
use chrono::{Duration, Utc};
use uuid::Uuid;

const GOOD_COMMENT: &str = "Congrats on shipping this, how long did the rollout take?";

fn trigger(url: &str) -> LinkTrigger {
    LinkTrigger {
        url: url.to_string(),
        source_label: Some("slack".into()),
        ..Default::default()
    }
}

// == Discovery =================================================================

#[tokio::test]
async fn trigger_wins_and_poll_never_double_posts() {
    let h = common::memory_engine(&[GOOD_COMMENT]);
    let page = common::linkedin_page(Uuid::new_v4(), "acme");
    h.store.insert_page(page.clone());
    common::add_subscriber(&h.store, &page).await;
    common::add_subscriber(&h.store, &page).await;

    let outcome = h
        .engine
        .trigger(&trigger(
            "https://www.linkedin.com/posts/acme_launch-1?utm_source=share&rcm=abc",
        ))
        .await
        .unwrap();
    match outcome {
        TriggerOutcome::Matched {
            tracked_page_id,
            actions_created,
            ..
        } => {
            assert_eq!(tracked_page_id, page.id);
            assert_eq!(actions_created, 4);
        }
        other => panic!("expected matched, got {:?}", other),
    }

    h.source.set(vec![common::linkedin_post("acme", "launch-1")]);
    let polled = h.engine.poll_once().await.unwrap();
    let status = polled[0].1.clone().expect("page was polled");
    assert_eq!(status.posts_found, 1);
    assert_eq!(status.new_posts, 0);

    let posts = h.store.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].discovered_via, DiscoverySource::Trigger);
    assert_eq!(h.store.actions().len(), 4);
}

#[tokio::test]
async fn repeated_trigger_is_duplicate() {
    let h = common::memory_engine(&[GOOD_COMMENT]);
    let page = common::linkedin_page(Uuid::new_v4(), "acme");
    h.store.insert_page(page.clone());
    common::add_subscriber(&h.store, &page).await;

    let url = "https://www.linkedin.com/posts/acme_launch-2";
    assert_eq!(h.engine.trigger(&trigger(url)).await.unwrap().as_str(), "matched");
    assert_eq!(
        h.engine.trigger(&trigger(url)).await.unwrap().as_str(),
        "duplicate"
    );
    assert_eq!(h.store.actions().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_trigger_and_poll_record_one_post() {
    let h = common::memory_engine(&[GOOD_COMMENT]);
    let page = common::linkedin_page(Uuid::new_v4(), "acme");
    h.store.insert_page(page.clone());
    common::add_subscriber(&h.store, &page).await;
    common::add_subscriber(&h.store, &page).await;

    for i in 0..25 {
        let slug = format!("race-{}", i);
        h.source.set(vec![common::linkedin_post("acme", &slug)]);
        let url = format!("https://www.linkedin.com/posts/acme_{}?utm_source=share", slug);

        let engine = h.engine.clone();
        let triggered = tokio::spawn(async move { engine.trigger(&trigger(&url)).await });
        let engine = h.engine.clone();
        let polled = tokio::spawn(async move { engine.poll_once().await });
        let (triggered, polled) = tokio::join!(triggered, polled);
        let outcome = triggered.unwrap().unwrap();
        let polled = polled.unwrap().unwrap();
        let poll_new = polled[0].1.as_ref().expect("page was polled").new_posts;

        // Exactly one path wins the insert; the loser sees a duplicate.
        assert!(
            matches!(outcome.as_str(), "matched" | "duplicate"),
            "unexpected {:?}",
            outcome
        );
        assert_eq!(
            (outcome.as_str() == "matched") as i32 + poll_new,
            1,
            "round {}",
            i
        );
    }

    let posts = h.store.posts();
    assert_eq!(posts.len(), 25);
    let mut keys: Vec<_> = posts.iter().map(|p| p.external_post_id.clone()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 25);

    // One like and one comment per subscriber per post, never more.
    let actions = h.store.actions();
    assert_eq!(actions.len(), 25 * 4);
    for post in &posts {
        let mut per_post: Vec<_> = actions
            .iter()
            .filter(|a| a.post_id == post.id)
            .map(|a| (a.user_id, a.action_type))
            .collect();
        assert_eq!(per_post.len(), 4);
        per_post.sort();
        per_post.dedup();
        assert_eq!(per_post.len(), 4);
    }
}

#[tokio::test]
async fn inactive_page_is_not_polled_or_matched() {
    let h = common::memory_engine(&[GOOD_COMMENT]);
    let page = common::linkedin_page(Uuid::new_v4(), "acme");
    h.store.insert_page(page.clone());
    common::add_subscriber(&h.store, &page).await;
    h.store.set_page_active(page.id, false);

    h.source.set(vec![common::linkedin_post("acme", "launch-3")]);
    assert!(h.engine.poll_once().await.unwrap().is_empty());

    let outcome = h
        .engine
        .trigger(&trigger("https://www.linkedin.com/posts/acme_launch-3"))
        .await
        .unwrap();
    assert_eq!(outcome.as_str(), "unmatched");
    assert!(h.store.actions().is_empty());
}

// == Scheduling ================================================================

#[tokio::test]
async fn comments_are_staggered_across_subscribers() {
    let h = common::memory_engine(&[GOOD_COMMENT]);
    let page = common::linkedin_page(Uuid::new_v4(), "acme");
    h.store.insert_page(page.clone());
    for _ in 0..4 {
        common::add_subscriber(&h.store, &page).await;
    }

    h.engine
        .trigger(&trigger("https://www.linkedin.com/posts/acme_launch-4"))
        .await
        .unwrap();
    let post = h.store.posts().remove(0);

    let mut comments: Vec<_> = h
        .store
        .actions()
        .into_iter()
        .filter(|a| a.action_type == ActionType::Comment)
        .map(|a| a.scheduled_at)
        .collect();
    comments.sort();
    assert_eq!(comments.len(), 4);
    assert!(comments[0] > post.first_seen_at);
    for pair in comments.windows(2) {
        let gap = (pair[1] - pair[0]).num_seconds();
        assert!((120..=1200).contains(&gap), "gap {} outside stagger window", gap);
    }

    // Likes are immediate.
    for like in h
        .store
        .actions()
        .into_iter()
        .filter(|a| a.action_type == ActionType::Like)
    {
        assert!(like.scheduled_at <= Utc::now());
    }
}

// == Dispatch ==================================================================

#[tokio::test]
async fn like_then_comment_complete_with_audit_trail() {
    let h = common::memory_engine(&[GOOD_COMMENT]);
    let page = common::linkedin_page(Uuid::new_v4(), "acme");
    h.store.insert_page(page.clone());
    let user = common::add_subscriber(&h.store, &page).await;

    h.engine
        .trigger(&trigger("https://www.linkedin.com/posts/acme_launch-5"))
        .await
        .unwrap();

    let outcomes = h
        .engine
        .dispatcher
        .dispatch_due_inline(Utc::now())
        .await
        .unwrap();
    assert_eq!(outcomes, vec![ProcessOutcome::Completed]);

    let later = Utc::now() + Duration::minutes(25);
    let outcomes = h.engine.dispatcher.dispatch_due_inline(later).await.unwrap();
    assert_eq!(outcomes, vec![ProcessOutcome::Completed]);

    let comment = h
        .store
        .actions()
        .into_iter()
        .find(|a| a.action_type == ActionType::Comment)
        .unwrap();
    assert_eq!(comment.status, ActionStatus::Completed);
    assert_eq!(comment.comment_text.as_deref(), Some(GOOD_COMMENT));
    assert_eq!(comment.attempts, 1);

    let requests = h.sink.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].action_type, ActionType::Like);
    assert_eq!(requests[0].comment_text, None);
    assert_eq!(requests[1].comment_text.as_deref(), Some(GOOD_COMMENT));
    assert!(requests.iter().all(|r| r.user_id == user));

    let actions: Vec<String> = h
        .store
        .audit_entries()
        .into_iter()
        .map(|e| e.action)
        .collect();
    for expected in ["post_fanout", "like_completed", "comment_completed"] {
        assert!(actions.iter().any(|a| a == expected), "missing {}", expected);
    }

    let pacing = h
        .store
        .load_pacing(AccountKey {
            user_id: user,
            platform: Platform::Linkedin,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pacing.daily_like_count, 1);
    assert_eq!(pacing.daily_comment_count, 1);
}

#[tokio::test]
async fn non_compliant_drafts_fail_the_comment() {
    let h = common::memory_engine(&["Great post!", "So true."]);
    let page = common::linkedin_page(Uuid::new_v4(), "acme");
    h.store.insert_page(page.clone());
    let user = common::add_subscriber(&h.store, &page).await;
    h.store.set_subscription_flags(page.id, user, false, true);

    h.engine
        .trigger(&trigger("https://www.linkedin.com/posts/acme_launch-6"))
        .await
        .unwrap();
    let later = Utc::now() + Duration::minutes(25);
    let outcomes = h.engine.dispatcher.dispatch_due_inline(later).await.unwrap();
    assert!(matches!(outcomes[0], ProcessOutcome::Failed { .. }));

    let comment = h.store.actions().remove(0);
    assert_eq!(comment.status, ActionStatus::Failed);
    assert_eq!(
        comment.error_message.as_deref(),
        Some("content_policy_violation")
    );
    assert!(h.sink.requests().is_empty());
}

#[tokio::test]
async fn disabled_subscription_cancels_pending_actions() {
    let h = common::memory_engine(&[GOOD_COMMENT]);
    let page = common::linkedin_page(Uuid::new_v4(), "acme");
    h.store.insert_page(page.clone());
    let user = common::add_subscriber(&h.store, &page).await;

    h.engine
        .trigger(&trigger("https://www.linkedin.com/posts/acme_launch-7"))
        .await
        .unwrap();
    h.store.set_subscription_flags(page.id, user, false, true);

    let outcomes = h
        .engine
        .dispatcher
        .dispatch_due_inline(Utc::now())
        .await
        .unwrap();
    assert_eq!(outcomes, vec![ProcessOutcome::Cancelled]);

    let like = h
        .store
        .actions()
        .into_iter()
        .find(|a| a.action_type == ActionType::Like)
        .unwrap();
    assert_eq!(like.status, ActionStatus::Failed);
    assert_eq!(like.error_message.as_deref(), Some("cancelled"));
    assert!(h
        .store
        .audit_entries()
        .iter()
        .any(|e| e.action == "like_cancelled"));
    assert!(h.sink.requests().is_empty());
}

#[tokio::test]
async fn expired_session_blocks_account_until_reauthorized() {
    let h = common::memory_engine(&[GOOD_COMMENT]);
    let page = common::linkedin_page(Uuid::new_v4(), "acme");
    h.store.insert_page(page.clone());
    let user = common::add_subscriber(&h.store, &page).await;
    h.store.set_subscription_flags(page.id, user, true, false);
    let key = AccountKey {
        user_id: user,
        platform: Platform::Linkedin,
    };

    h.engine
        .trigger(&trigger("https://www.linkedin.com/posts/acme_launch-8"))
        .await
        .unwrap();

    h.sink
        .respond_with(SinkResult::failed(Some("auth_expired"), "session expired"));
    let t0 = Utc::now();
    let outcomes = h.engine.dispatcher.dispatch_due_inline(t0).await.unwrap();
    assert_eq!(outcomes, vec![ProcessOutcome::Blocked]);
    h.store.set_session(user, Platform::Linkedin, false);

    let like = h.store.actions().remove(0);
    assert_eq!(like.status, ActionStatus::Pending);
    assert_eq!(like.attempts, 0);
    assert!(like.scheduled_at > t0 + Duration::minutes(14));
    let pacing = h.store.load_pacing(key).await.unwrap().unwrap();
    assert_eq!(pacing.state, AccountState::Blocked);
    assert!(h
        .store
        .audit_entries()
        .iter()
        .any(|e| e.action == "account_blocked"));

    // Still signed out at the recheck: deferred again, sink untouched.
    let t1 = t0 + Duration::minutes(16);
    let outcomes = h.engine.dispatcher.dispatch_due_inline(t1).await.unwrap();
    assert!(matches!(outcomes[0], ProcessOutcome::Deferred { .. }));
    assert_eq!(h.sink.requests().len(), 1);

    // Session renewed: the account resumes and the like goes out.
    h.store.set_session(user, Platform::Linkedin, true);
    h.sink.respond_with(SinkResult::completed());
    let t2 = t1 + Duration::minutes(16);
    let outcomes = h.engine.dispatcher.dispatch_due_inline(t2).await.unwrap();
    assert_eq!(outcomes, vec![ProcessOutcome::Completed]);
    let pacing = h.store.load_pacing(key).await.unwrap().unwrap();
    assert_eq!(pacing.state, AccountState::Active);
}

#[tokio::test]
async fn maintenance_tick_runs_on_idle_engine() {
    let h = common::memory_engine(&[GOOD_COMMENT]);
    h.engine.maintenance_tick(Utc::now()).await.unwrap();
    assert!(h.engine.metrics.encode().contains("autoengage_"));
}
