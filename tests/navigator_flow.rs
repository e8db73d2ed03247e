//! End-to-end learner flows through the course navigator
//!
//! These tests run real navigators against the SQLite completion store and
//! a sled draft cache in temporary directories.

use async_trait::async_trait;
use lamad_progress::{
    Collaborators, CompletionRecord, CompletionStore, ContentUnitKey, Course,
    CourseNavigator, DraftCache, EventBus, IdentityResolver, LearnerId, Notice, PageState,
    ProgressError, ProgressEvent, QuizState, RemoteStore, SledStorage, SqliteCompletionStore,
    StaticAuthProvider, StoreScope,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const COURSE: &str = r#"
id = "ethics"
title = "AI Ethics"

[[units]]
key = "ethics:week1:privacy"
title = "Privacy"
sections = [
  { id = "what", label = "What is privacy", order = 0 },
  { id = "why", label = "Why it matters", order = 1 },
]

[[units]]
key = "ethics:week1:quiz"
title = "Week 1 quiz"
gate = { type = "min_score", threshold = 4, total_questions = 5 }

[units.quiz]
questions = [
  { id = "q1", correct_index = 0 },
  { id = "q2", correct_index = 1 },
  { id = "q3", correct_index = 2 },
  { id = "q4", correct_index = 0 },
  { id = "q5", correct_index = 1 },
]

[[units]]
key = "ethics:week2:bias"
title = "Bias"
"#;

const CORRECT: [(&str, usize); 5] = [("q1", 0), ("q2", 1), ("q3", 2), ("q4", 0), ("q5", 1)];

fn key(s: &str) -> ContentUnitKey {
    ContentUnitKey::new(s).unwrap()
}

struct Harness {
    _temp: TempDir,
    course: Course,
    remote: Arc<SqliteCompletionStore>,
    drafts: Arc<DraftCache>,
    events: Arc<EventBus>,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(
            SqliteCompletionStore::open(&temp.path().join("completions.db"), StoreScope::default())
                .unwrap(),
        );
        let drafts = Arc::new(DraftCache::new(Box::new(
            SledStorage::open(temp.path().join("drafts.sled")).unwrap(),
        )));
        Self {
            _temp: temp,
            course: Course::from_toml(COURSE).unwrap(),
            remote,
            drafts,
            events: Arc::new(EventBus::new()),
        }
    }

    fn services(&self, auth: StaticAuthProvider) -> Collaborators {
        Collaborators {
            resolver: Arc::new(IdentityResolver::new(Arc::new(auth), Duration::from_secs(2))),
            store: Arc::new(CompletionStore::new(self.remote.clone(), Duration::from_secs(2))),
            drafts: self.drafts.clone(),
            events: self.events.clone(),
        }
    }

    fn open(&self, unit: &str, auth: StaticAuthProvider) -> CourseNavigator {
        CourseNavigator::for_course(&self.course, &key(unit), self.services(auth), 0.70).unwrap()
    }
}

#[tokio::test]
async fn test_ungated_unit_completion_round_trip() {
    let h = Harness::new();
    let nav = h.open("ethics:week1:privacy", StaticAuthProvider::signed_in("u1"));

    assert_eq!(nav.load().await, PageState::Ready { completed: false });

    let record = nav.mark_complete().await.unwrap();
    assert!(record.completed);
    assert_eq!(nav.page_state(), PageState::Ready { completed: true });

    let stored = h
        .remote
        .select_one(&LearnerId::new("u1"), &key("ethics:week1:privacy"))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.completed);

    // A fresh visit sees the completion
    let again = h.open("ethics:week1:privacy", StaticAuthProvider::signed_in("u1"));
    assert_eq!(again.load().await, PageState::Ready { completed: true });
}

#[tokio::test]
async fn test_quiz_gate_scenario() {
    let h = Harness::new();
    let nav = h.open("ethics:week1:quiz", StaticAuthProvider::signed_in("u1"));
    nav.load().await;

    // Three correct, two wrong
    for (q, opt) in CORRECT.iter().take(3) {
        nav.select_answer(q, *opt);
    }
    nav.select_answer("q4", 2);
    nav.select_answer("q5", 2);
    assert_eq!(nav.submit_quiz(), QuizState::Submitted { passed: false, score: 3 });

    let err = nav.mark_complete().await.unwrap_err();
    assert!(matches!(err, ProgressError::GateBlocked(_)));
    assert_eq!(
        nav.notice(),
        Some(Notice::Blocked("submit and pass the quiz first".into()))
    );
    assert!(h
        .remote
        .select_one(&LearnerId::new("u1"), &key("ethics:week1:quiz"))
        .await
        .unwrap()
        .is_none());

    // Correct one answer and resubmit: exactly at the threshold
    nav.select_answer("q4", 0);
    assert_eq!(nav.submit_quiz(), QuizState::Submitted { passed: true, score: 4 });

    nav.mark_complete().await.unwrap();
    assert!(nav.page_state().is_completed());
    assert_eq!(nav.advance().unwrap(), Some(key("ethics:week2:bias")));
}

#[tokio::test]
async fn test_gated_advance_requires_completion() {
    let h = Harness::new();
    let nav = h.open("ethics:week1:quiz", StaticAuthProvider::signed_in("u1"));
    nav.load().await;

    // Passing the quiz alone does not advance; completion does
    for (q, opt) in CORRECT {
        nav.select_answer(q, opt);
    }
    nav.submit_quiz();
    assert!(matches!(nav.advance(), Err(ProgressError::GateBlocked(_))));

    nav.mark_complete().await.unwrap();
    assert!(nav.advance().is_ok());
}

#[tokio::test]
async fn test_anonymous_learner_never_writes() {
    let h = Harness::new();
    let nav = h.open("ethics:week1:privacy", StaticAuthProvider::anonymous());

    assert_eq!(nav.load().await, PageState::Ready { completed: false });
    assert_eq!(nav.notice(), Some(Notice::SignInToSaveProgress));

    for _ in 0..3 {
        assert!(matches!(
            nav.mark_complete().await,
            Err(ProgressError::Unauthenticated)
        ));
    }
    assert_eq!(h.remote.count().unwrap(), 0);

    // Ungated content stays navigable
    assert_eq!(nav.advance().unwrap(), Some(key("ethics:week1:quiz")));
}

#[tokio::test]
async fn test_completion_survives_later_visits_and_quiz_state() {
    let h = Harness::new();
    let first = h.open("ethics:week1:quiz", StaticAuthProvider::signed_in("u1"));
    first.load().await;
    for (q, opt) in CORRECT {
        first.select_answer(q, opt);
    }
    first.submit_quiz();
    first.mark_complete().await.unwrap();
    drop(first);

    // Reload: quiz attempt is gone but completion is durable, so the gated
    // unit can still be advanced past
    let second = h.open("ethics:week1:quiz", StaticAuthProvider::signed_in("u1"));
    assert_eq!(second.load().await, PageState::Ready { completed: true });
    assert_eq!(second.quiz_state(), QuizState::NotAttempted);
    assert_eq!(second.advance().unwrap(), Some(key("ethics:week2:bias")));
}

#[tokio::test]
async fn test_concurrent_completions_converge() {
    let h = Harness::new();
    let a = Arc::new(h.open("ethics:week1:privacy", StaticAuthProvider::signed_in("u1")));
    let b = Arc::new(h.open("ethics:week1:privacy", StaticAuthProvider::signed_in("u1")));
    a.load().await;
    b.load().await;

    let (ra, rb) = tokio::join!(a.mark_complete(), b.mark_complete());
    assert!(ra.unwrap().completed && rb.unwrap().completed);
    assert_eq!(h.remote.count().unwrap(), 1);
}

#[tokio::test]
async fn test_drafts_restore_on_next_visit() {
    let h = Harness::new();
    {
        let nav = h.open("ethics:week1:privacy", StaticAuthProvider::anonymous());
        nav.save_draft("redaction-demo", "Call me at [PHONE]").unwrap();
    }

    let nav = h.open("ethics:week1:privacy", StaticAuthProvider::signed_in("u1"));
    assert_eq!(
        nav.restore_draft("redaction-demo").unwrap().as_deref(),
        Some("Call me at [PHONE]")
    );
    assert_eq!(nav.restore_draft("other-field").unwrap(), None);
    // Drafts never reach the completion table
    assert_eq!(h.remote.count().unwrap(), 0);
}

#[tokio::test]
async fn test_events_published() {
    let h = Harness::new();
    let mut rx = h.events.subscribe();
    let nav = h.open("ethics:week1:privacy", StaticAuthProvider::signed_in("u1"));
    nav.load().await;
    nav.mark_complete().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&ProgressEvent::PageReady {
        unit_key: "ethics:week1:privacy".into(),
        completed: false,
    }));
    assert!(seen.contains(&ProgressEvent::CompletionRecorded {
        learner_id: "u1".into(),
        unit_key: "ethics:week1:privacy".into(),
    }));
}

/// Store that fails until told otherwise
struct FlakyStore {
    inner: MemoryBacked,
    down: AtomicBool,
    writes: AtomicUsize,
}

type MemoryBacked = lamad_progress::MemoryCompletionStore;

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn select_one(
        &self,
        learner_id: &LearnerId,
        unit_key: &ContentUnitKey,
    ) -> Result<Option<CompletionRecord>, ProgressError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ProgressError::RemoteUnavailable("503".into()));
        }
        self.inner.select_one(learner_id, unit_key).await
    }

    async fn upsert(&self, record: &CompletionRecord) -> Result<CompletionRecord, ProgressError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(ProgressError::RemoteUnavailable("503".into()));
        }
        self.inner.upsert(record).await
    }

    async fn select_many(
        &self,
        learner_id: &LearnerId,
        unit_keys: &[ContentUnitKey],
    ) -> Result<Vec<CompletionRecord>, ProgressError> {
        self.inner.select_many(learner_id, unit_keys).await
    }
}

#[tokio::test]
async fn test_failed_write_reverts_and_is_not_retried() {
    let course = Course::from_toml(COURSE).unwrap();
    let flaky = Arc::new(FlakyStore {
        inner: MemoryBacked::new(),
        down: AtomicBool::new(true),
        writes: AtomicUsize::new(0),
    });
    let services = Collaborators {
        resolver: Arc::new(IdentityResolver::new(
            Arc::new(StaticAuthProvider::signed_in("u1")),
            Duration::from_secs(1),
        )),
        store: Arc::new(CompletionStore::new(flaky.clone(), Duration::from_secs(1))),
        drafts: Arc::new(DraftCache::in_memory()),
        events: Arc::new(EventBus::new()),
    };
    let nav = CourseNavigator::for_course(&course, &key("ethics:week1:privacy"), services, 0.7).unwrap();

    // Read failure still renders the page
    assert_eq!(nav.load().await, PageState::Ready { completed: false });
    assert_eq!(nav.take_notice(), Some(Notice::ProgressUnavailable));

    let err = nav.mark_complete().await.unwrap_err();
    assert!(matches!(err, ProgressError::RemoteUnavailable(_)));
    assert_eq!(nav.page_state(), PageState::Ready { completed: false });
    assert_eq!(nav.notice().unwrap().message(), "couldn't save, try again");
    assert_eq!(flaky.writes.load(Ordering::SeqCst), 1);

    // The learner retries once the service is back
    flaky.down.store(false, Ordering::SeqCst);
    nav.mark_complete().await.unwrap();
    assert!(nav.page_state().is_completed());
    assert_eq!(nav.notice(), None);
    assert_eq!(flaky.writes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_course_progress_summary() {
    let h = Harness::new();
    let store = CompletionStore::new(h.remote.clone(), Duration::from_secs(1));
    let learner = lamad_progress::LearnerIdentity::identified("u1");
    store.write(&learner, &key("ethics:week1:privacy")).await.unwrap();

    let records = store
        .read_many(&LearnerId::new("u1"), &h.course.unit_keys())
        .await
        .unwrap();
    let progress = h.course.progress(&records);
    assert_eq!(progress.completed_units, 1);
    assert_eq!(progress.total_units, 3);
    assert_eq!(progress.next_incomplete, Some(key("ethics:week1:quiz")));
}
