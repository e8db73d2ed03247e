//! Course navigator: the page-level progress state machine
//!
//! One navigator per mounted content unit. It composes identity resolution,
//! the completion store, gate evaluation, the draft cache and the scrollspy
//! into the experience a lesson page needs:
//!
//! ```text
//! Loading ──load──► Ready{completed: false} ──mark_complete──► Ready{completed: true}
//!
//! quiz (gated units only):  NotAttempted ──submit──► Submitted{passed}
//! ```
//!
//! `mark_complete` needs an identified learner and an open gate. A failed
//! write leaves the page exactly as it was and surfaces a notice; nothing is
//! committed optimistically. After a successful write the navigator trusts
//! its own value rather than reading the store back.
//!
//! Unmounting flips a liveness flag: results of calls still in flight are
//! returned to their caller but no longer touch page state.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};

use crate::completion::{CompletionRecord, CompletionStore};
use crate::course::{ContentUnit, ContentUnitKey, Course, TocSection};
use crate::drafts::DraftCache;
use crate::error::{ProgressError, SAVE_FAILED_MESSAGE, SIGN_IN_MESSAGE};
use crate::events::{EventBus, ProgressEvent};
use crate::gating::{can_complete, GateDecision, QUIZ_GATE_REASON};
use crate::identity::{IdentityResolver, LearnerIdentity};
use crate::quiz::{QuizAttempt, QuizState};
use crate::visibility::{SectionObserver, VisibilityTracker};

/// Message shown when completion state could not be loaded
pub const LOAD_FAILED_MESSAGE: &str = "couldn't load your progress";

/// Page lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PageState {
    Loading,
    Ready { completed: bool },
}

impl PageState {
    pub fn is_completed(&self) -> bool {
        matches!(self, PageState::Ready { completed: true })
    }
}

/// Non-blocking message for the learner (toast/alert)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SignInToSaveProgress,
    Blocked(String),
    SaveFailed,
    ProgressUnavailable,
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Notice::SignInToSaveProgress => SIGN_IN_MESSAGE,
            Notice::Blocked(reason) => reason,
            Notice::SaveFailed => SAVE_FAILED_MESSAGE,
            Notice::ProgressUnavailable => LOAD_FAILED_MESSAGE,
        }
    }
}

impl From<&ProgressError> for Notice {
    fn from(err: &ProgressError) -> Self {
        match err {
            ProgressError::Unauthenticated => Notice::SignInToSaveProgress,
            ProgressError::GateBlocked(reason) => Notice::Blocked(reason.clone()),
            _ => Notice::SaveFailed,
        }
    }
}

/// Shared services a navigator is built from
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<IdentityResolver>,
    pub store: Arc<CompletionStore>,
    pub drafts: Arc<DraftCache>,
    pub events: Arc<EventBus>,
}

struct PageSlot {
    page: PageState,
    attempt: QuizAttempt,
    notice: Option<Notice>,
}

/// Page-level orchestration for one content unit
pub struct CourseNavigator {
    unit: ContentUnit,
    next: Option<ContentUnitKey>,
    services: Collaborators,
    slot: Mutex<PageSlot>,
    alive: AtomicBool,
    tracker: VisibilityTracker,
}

impl CourseNavigator {
    /// Mount a navigator for `unit`. `next` is where `advance` routes.
    pub fn new(
        unit: ContentUnit,
        next: Option<ContentUnitKey>,
        services: Collaborators,
        focus_band_bottom_margin: f64,
    ) -> Self {
        let tracker = VisibilityTracker::mount(unit.sections.clone(), focus_band_bottom_margin);
        debug!(unit_key = %unit.key, gated = unit.gate.is_gated(), "Navigator mounted");

        Self {
            unit,
            next,
            services,
            slot: Mutex::new(PageSlot {
                page: PageState::Loading,
                attempt: QuizAttempt::new(),
                notice: None,
            }),
            alive: AtomicBool::new(true),
            tracker,
        }
    }

    /// Mount a navigator for a catalog unit, routing forward by the catalog
    pub fn for_course(
        course: &Course,
        key: &ContentUnitKey,
        services: Collaborators,
        focus_band_bottom_margin: f64,
    ) -> Result<Self, ProgressError> {
        let unit = course
            .unit(key)
            .cloned()
            .ok_or_else(|| ProgressError::NotFound(format!("Unknown content unit: {}", key)))?;
        let next = course.next_unit(key).map(|u| u.key.clone());
        Ok(Self::new(unit, next, services, focus_band_bottom_margin))
    }

    fn lock(&self) -> MutexGuard<'_, PageSlot> {
        // Slot mutations are single assignments, so a poisoned slot is still whole
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn key_string(&self) -> String {
        self.unit.key.to_string()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Resolve the learner and fetch completion state.
    ///
    /// Never fails: an auth failure degrades to anonymous and a store failure
    /// to "not completed", each with a notice, so the lesson stays readable.
    pub async fn load(&self) -> PageState {
        let resolution = self.services.resolver.resolve().await.clone();
        if !self.is_alive() {
            trace!(unit_key = %self.unit.key, "Unmounted during identity resolution");
            return self.page_state();
        }

        let mut notice = resolution.prompt_sign_in.then_some(Notice::SignInToSaveProgress);

        let completed = match resolution.identity {
            LearnerIdentity::Identified(ref learner_id) => {
                match self.services.store.read(learner_id, &self.unit.key).await {
                    Ok(record) => record.map(|r| r.completed).unwrap_or(false),
                    Err(e) => {
                        warn!(unit_key = %self.unit.key, error = %e, "Showing page without completion state");
                        notice = Some(Notice::ProgressUnavailable);
                        false
                    }
                }
            }
            LearnerIdentity::Anonymous => false,
        };

        if !self.is_alive() {
            trace!(unit_key = %self.unit.key, "Unmounted during completion read");
            return self.page_state();
        }

        let page = {
            let mut slot = self.lock();
            // A completion recorded while the read was in flight wins
            let completed = completed || slot.page.is_completed();
            slot.page = PageState::Ready { completed };
            if notice.is_some() {
                slot.notice = notice;
            }
            slot.page
        };

        self.services.events.emit(ProgressEvent::PageReady {
            unit_key: self.key_string(),
            completed: page.is_completed(),
        });
        page
    }

    /// Stop tracking: dispose the scrollspy and ignore late results
    pub fn unmount(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.tracker.dispose();
            debug!(unit_key = %self.unit.key, "Navigator unmounted");
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.is_alive()
    }

    // =========================================================================
    // Read state
    // =========================================================================

    pub fn unit(&self) -> &ContentUnit {
        &self.unit
    }

    pub fn next_unit_key(&self) -> Option<&ContentUnitKey> {
        self.next.as_ref()
    }

    pub fn identity(&self) -> LearnerIdentity {
        self.services.resolver.current()
    }

    pub fn page_state(&self) -> PageState {
        self.lock().page
    }

    pub fn notice(&self) -> Option<Notice> {
        self.lock().notice.clone()
    }

    /// Take the pending notice, clearing it
    pub fn take_notice(&self) -> Option<Notice> {
        self.lock().notice.take()
    }

    pub fn attempt(&self) -> QuizAttempt {
        self.lock().attempt.clone()
    }

    /// Current gate decision, recomputed from in-memory quiz state
    pub fn gate(&self) -> GateDecision {
        let slot = self.lock();
        can_complete(&self.unit.gate, self.unit.quiz.as_ref(), &slot.attempt)
    }

    pub fn quiz_state(&self) -> QuizState {
        let slot = self.lock();
        self.quiz_state_of(&slot.attempt)
    }

    fn quiz_state_of(&self, attempt: &QuizAttempt) -> QuizState {
        if !attempt.submitted {
            return QuizState::NotAttempted;
        }
        let score = self
            .unit
            .quiz
            .as_ref()
            .map(|q| attempt.score(q))
            .unwrap_or(0);
        let passed = can_complete(&self.unit.gate, self.unit.quiz.as_ref(), attempt).is_allowed();
        QuizState::Submitted { passed, score }
    }

    // =========================================================================
    // Quiz
    // =========================================================================

    pub fn select_answer(&self, question_id: &str, option_index: usize) {
        self.lock().attempt.select(question_id, option_index);
    }

    /// Submit the current answers; the result is scored from this snapshot
    pub fn submit_quiz(&self) -> QuizState {
        let state = {
            let mut slot = self.lock();
            slot.attempt.submit();
            self.quiz_state_of(&slot.attempt)
        };

        if let QuizState::Submitted { passed, score } = state {
            debug!(unit_key = %self.unit.key, score, passed, "Quiz submitted");
            self.services.events.emit(ProgressEvent::QuizSubmitted {
                unit_key: self.key_string(),
                score,
                passed,
            });
        }
        state
    }

    pub fn reset_quiz(&self) {
        self.lock().attempt.reset();
    }

    // =========================================================================
    // Completion and navigation
    // =========================================================================

    fn refuse(&self, err: ProgressError) -> ProgressError {
        debug!(unit_key = %self.unit.key, reason = %err, "Completion refused");
        self.lock().notice = Some(Notice::from(&err));
        self.services.events.emit(ProgressEvent::CompletionRefused {
            unit_key: self.key_string(),
            reason: err.user_message(),
        });
        err
    }

    /// Record completion of this unit.
    ///
    /// Refused with `Unauthenticated` for anonymous (or still resolving)
    /// sessions and with `GateBlocked` while the gate is closed; in both
    /// cases the page state is unchanged and a notice is set. An unmounted
    /// navigator returns `Unmounted` without contacting the store.
    pub async fn mark_complete(&self) -> Result<CompletionRecord, ProgressError> {
        if !self.is_alive() {
            debug!(unit_key = %self.unit.key, "Ignoring mark complete after unmount");
            return Err(ProgressError::Unmounted);
        }
        let identity = self.identity();
        if !identity.is_identified() {
            return Err(self.refuse(ProgressError::Unauthenticated));
        }
        if let GateDecision::Blocked(reason) = self.gate() {
            return Err(self.refuse(ProgressError::GateBlocked(reason)));
        }

        let result = self.services.store.write(&identity, &self.unit.key).await;

        if !self.is_alive() {
            trace!(unit_key = %self.unit.key, "Unmounted during completion write");
            return result;
        }

        match result {
            Ok(record) => {
                {
                    let mut slot = self.lock();
                    slot.page = PageState::Ready { completed: true };
                    slot.notice = None;
                }
                self.services.events.emit(ProgressEvent::CompletionRecorded {
                    learner_id: record.learner_id.to_string(),
                    unit_key: self.key_string(),
                });
                Ok(record)
            }
            Err(e) => {
                error!(unit_key = %self.unit.key, error = %e, "Completion write failed");
                self.lock().notice = Some(Notice::from(&e));
                self.services.events.emit(ProgressEvent::CompletionFailed {
                    unit_key: self.key_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Route to the next unit. Ungated units always advance; gated units
    /// advance only once completed. `Ok(None)` at the end of the course.
    pub fn advance(&self) -> Result<Option<ContentUnitKey>, ProgressError> {
        if self.unit.gate.is_gated() && !self.page_state().is_completed() {
            let err = ProgressError::GateBlocked(QUIZ_GATE_REASON.to_string());
            debug!(unit_key = %self.unit.key, "Advance refused");
            self.lock().notice = Some(Notice::from(&err));
            return Err(err);
        }

        self.services.events.emit(ProgressEvent::Advanced {
            from: self.key_string(),
            to: self.next.as_ref().map(|k| k.to_string()),
        });
        Ok(self.next.clone())
    }

    // =========================================================================
    // Drafts and sections
    // =========================================================================

    /// Autosave a practice field on this page
    pub fn save_draft(&self, field_id: &str, value: &str) -> Result<(), ProgressError> {
        self.services.drafts.save(&self.unit.key, field_id, value)?;
        self.services.events.emit(ProgressEvent::DraftSaved {
            unit_key: self.key_string(),
            field_id: field_id.to_string(),
        });
        Ok(())
    }

    pub fn restore_draft(&self, field_id: &str) -> Result<Option<String>, ProgressError> {
        self.services.drafts.restore(&self.unit.key, field_id)
    }

    pub fn sections(&self) -> &[TocSection] {
        self.tracker.sections()
    }

    pub fn visibility(&self) -> &VisibilityTracker {
        &self.tracker
    }

    pub fn section_observer(&self) -> SectionObserver {
        self.tracker.observer()
    }

    pub fn active_section_id(&self) -> Option<String> {
        self.tracker.active_section_id()
    }
}

impl Drop for CourseNavigator {
    fn drop(&mut self) {
        self.unmount();
    }
}
