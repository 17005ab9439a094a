mod common;

use std::sync::Arc;

use relevia_backend_rust::adaptive::engine::AnswerSubmission;
use relevia_backend_rust::adaptive::types::{
    EngagementAction, ExpansionClaim, InterestRecord, Interaction, MasteryLevel, MasteryRecord,
    NewTopic, PreferenceType, UnlockEvent, UnlockTrigger,
};
use relevia_backend_rust::adaptive::AdaptiveEngine;
use relevia_backend_rust::db::{SqliteStore, Store, StoreError};
use tempfile::TempDir;

async fn open_store(dir: &TempDir) -> SqliteStore {
    let url = format!("sqlite:{}", dir.path().join("relevia.db").display());
    SqliteStore::connect(&url).await.expect("open sqlite store")
}

#[tokio::test]
async fn test_topics_unique_per_parent_ignoring_case() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let (root, created) = store
        .create_topic(NewTopic::root("Artificial Intelligence", "root"))
        .await
        .unwrap();
    assert!(created);
    let (again, created) = store
        .create_topic(NewTopic::root("artificial intelligence", "dup"))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.id, root.id);

    let child = NewTopic {
        name: "Robotics".into(),
        description: String::new(),
        parent_id: Some(root.id),
        difficulty_min: 2,
        difficulty_max: 6,
    };
    let (robotics, created) = store.create_topic(child).await.unwrap();
    assert!(created);
    assert_eq!(robotics.parent_id, Some(root.id));

    // same name under a different parent is fine
    let (other_root, _) = store.create_topic(NewTopic::root("Biology", "")).await.unwrap();
    let (_, created) = store
        .create_topic(NewTopic {
            name: "Robotics".into(),
            description: String::new(),
            parent_id: Some(other_root.id),
            difficulty_min: 1,
            difficulty_max: 3,
        })
        .await
        .unwrap();
    assert!(created);

    assert_eq!(store.roots().await.unwrap().len(), 2);
    assert_eq!(store.children(root.id).await.unwrap().len(), 1);
    assert_eq!(store.all_topics().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_schema_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let root_id = {
        let store = open_store(&dir).await;
        let (root, _) = store.create_topic(NewTopic::root("Chemistry", "")).await.unwrap();
        store.pool().close().await;
        root.id
    };

    let store = open_store(&dir).await;
    let topic = store.get_topic(root_id).await.unwrap().unwrap();
    assert_eq!(topic.name, "Chemistry");
}

#[tokio::test]
async fn test_mastery_progress_and_claims() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let (root, _) = store.create_topic(NewTopic::root("Physics", "")).await.unwrap();

    assert!(store.get_mastery("u1", root.id).await.unwrap().is_none());
    let created = store.get_or_create_mastery("u1", root.id).await.unwrap();
    assert_eq!(created.current_level, MasteryLevel::Novice);

    let mut record = MasteryRecord::new("u1", root.id);
    record.current_level = MasteryLevel::Competent;
    record.levels.novice.questions_seen = 9;
    record.levels.novice.questions_correct = 8;
    record.levels.competent.questions_seen = 1;
    record.levels.competent.questions_correct = 1;
    record.questions_answered = 9;
    record.correct_answers = 8;
    store.update_mastery_progress(&record).await.unwrap();

    let stored = store.get_mastery("u1", root.id).await.unwrap().unwrap();
    assert_eq!(stored.current_level, MasteryLevel::Competent);
    assert_eq!(stored.levels, record.levels);
    assert_eq!(stored.questions_answered, 9);

    assert!(store.claim_expansion("u1", root.id, ExpansionClaim::First).await.unwrap());
    assert!(!store.claim_expansion("u1", root.id, ExpansionClaim::First).await.unwrap());

    let progressive = ExpansionClaim::Progressive {
        level: MasteryLevel::Competent,
        previous: None,
    };
    assert!(store.claim_expansion("u1", root.id, progressive).await.unwrap());
    assert!(!store.claim_expansion("u1", root.id, progressive).await.unwrap());
    store.release_expansion("u1", root.id, progressive).await.unwrap();
    let stored = store.get_mastery("u1", root.id).await.unwrap().unwrap();
    assert_eq!(stored.last_expanded_level, None);
    assert!(stored.proficiency_threshold_met);

    // progress writes never touch the claim columns
    store.update_mastery_progress(&record).await.unwrap();
    let stored = store.get_mastery("u1", root.id).await.unwrap().unwrap();
    assert!(stored.proficiency_threshold_met);
}

#[tokio::test]
async fn test_unknown_stored_levels() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let (root, _) = store.create_topic(NewTopic::root("Geology", "")).await.unwrap();
    store.get_or_create_mastery("u1", root.id).await.unwrap();

    // an unknown current level resolves to novice
    sqlx::query("UPDATE mastery SET current_level = 'grandmaster' WHERE user_id = ?")
        .bind("u1")
        .execute(store.pool())
        .await
        .unwrap();
    let record = store.get_mastery("u1", root.id).await.unwrap().unwrap();
    assert_eq!(record.current_level, MasteryLevel::Novice);

    // an unknown expansion level fails the read instead of reopening expansion
    sqlx::query("UPDATE mastery SET last_expanded_level = 'grandmaster' WHERE user_id = ?")
        .bind("u1")
        .execute(store.pool())
        .await
        .unwrap();
    let err = store.get_mastery("u1", root.id).await.unwrap_err();
    assert!(matches!(err, StoreError::UnknownMasteryLevel(_)));
}

#[tokio::test]
async fn test_unlocks_are_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let (root, _) = store.create_topic(NewTopic::root("Music", "")).await.unwrap();

    let event = UnlockEvent::new("u1", None, root.id, UnlockTrigger::Root);
    assert!(store.unlock_topic(&event).await.unwrap());
    assert!(!store.unlock_topic(&event).await.unwrap());

    let unlocked = store.unlocked_topics("u1").await.unwrap();
    assert_eq!(unlocked.len(), 1);
    let events = store.unlock_events("u1").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].trigger, UnlockTrigger::Root);

    let record = store.get_mastery("u1", root.id).await.unwrap().unwrap();
    assert!(record.is_unlocked);
    assert!(record.unlocked_at.is_some());
    assert!(store.unlocked_topics("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_interests_questions_and_interactions() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let (root, _) = store.create_topic(NewTopic::root("History", "")).await.unwrap();

    let mut interest = InterestRecord::new("u1", root.id, 0.6);
    interest.preference_type = PreferenceType::Explicit;
    interest.interaction_count = 3;
    store.save_interest(&interest).await.unwrap();
    let loaded = store.get_interest("u1", root.id).await.unwrap().unwrap();
    assert_eq!(loaded.preference_type, PreferenceType::Explicit);
    assert_eq!(loaded.interaction_count, 3);

    assert_eq!(store.scale_interests(None, 0.5).await.unwrap(), 1);
    let loaded = store.get_interest("u1", root.id).await.unwrap().unwrap();
    assert!((loaded.interest_score - 0.3).abs() < 1e-9);
    assert_eq!(store.scale_interests(Some("nobody"), 0.5).await.unwrap(), 0);

    let q1 = store.insert_question(root.id, &common::draft(3), true).await.unwrap();
    let q2 = store.insert_question(root.id, &common::draft(5), false).await.unwrap();
    let fetched = store.get_question(q1.id).await.unwrap().unwrap();
    assert_eq!(fetched.options, q1.options);
    assert!(fetched.generated);

    store.mark_served("u1", q1.id).await.unwrap();
    store.mark_served("u1", q1.id).await.unwrap();
    let unused = store.unused_questions("u1", root.id).await.unwrap();
    assert_eq!(unused.len(), 1);
    assert_eq!(unused[0].id, q2.id);

    for (i, action) in [EngagementAction::Answer, EngagementAction::Skip].into_iter().enumerate() {
        store
            .record_interaction(&Interaction {
                user_id: "u1".into(),
                topic_id: root.id,
                question_id: (action == EngagementAction::Answer).then_some(q1.id),
                action,
                is_correct: (action == EngagementAction::Answer).then_some(true),
                time_spent: 10.0 + i as f64,
                difficulty: Some(3),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
    }
    let recent = store.recent_interactions("u1", 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].action, EngagementAction::Skip);
    assert_eq!(store.last_answered_topic("u1").await.unwrap(), Some(root.id));
    assert_eq!(store.last_answered_topic("u2").await.unwrap(), None);
}

#[tokio::test]
async fn test_engine_runs_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn Store> = Arc::new(open_store(&dir).await);
    let generator = Arc::new(common::ScriptedGenerator::with_batches(&[common::AI_CHILDREN]));
    let engine = AdaptiveEngine::new(store.clone(), generator, common::inline_config());

    let root = engine
        .bootstrap_root(NewTopic::root(common::ROOT_NAME, ""))
        .await
        .unwrap();
    engine.start_session("u1").await.unwrap();

    for _ in 0..5 {
        let selection = engine.next_question("u1", None).await.unwrap().unwrap();
        engine
            .submit_answer(AnswerSubmission {
                user_id: "u1".into(),
                session_id: None,
                question_id: selection.question.id,
                answer: common::CORRECT.into(),
                time_spent: 12.0,
            })
            .await
            .unwrap();
    }

    assert_eq!(store.children(root.id).await.unwrap().len(), 3);
    assert_eq!(store.unlocked_topics("u1").await.unwrap().len(), 4);
    let status = engine.mastery_status("u1", root.id).await.unwrap();
    assert_eq!(status.questions_answered, 5);
}
