//! Lamad Progress - learner progress and gating for lesson pages
//!
//! Tracks which lessons a learner has completed, gates completion and
//! forward navigation behind quizzes, keeps the table of contents in step
//! with scrolling, and autosaves practice input on the device.
//!
//! ## Architecture
//!
//! ```text
//! IdentityResolver ──► CompletionStore.read ──► CourseNavigator ──► UI
//!                                                  │  ▲
//!            gating::can_complete ◄── quiz ────────┘  │
//!            CompletionStore.write ◄── mark_complete ─┘
//!            VisibilityTracker (scrollspy), DraftCache (autosave)
//! ```
//!
//! The auth provider and the durable completion table are collaborators
//! behind traits ([`identity::AuthProvider`], [`completion::RemoteStore`]);
//! SQLite, in-memory and hosted-HTTP implementations are provided.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/lamad-progress/
//! ├── completions.db     # Local completion table (when no remote_url)
//! ├── drafts.sled/       # Device-local practice drafts
//! └── config.toml        # Configuration
//! ```

pub mod completion;
pub mod config;
pub mod course;
pub mod db;
pub mod drafts;
pub mod error;
pub mod events;
pub mod gating;
pub mod identity;
pub mod navigator;
pub mod quiz;
pub mod remote;
pub mod visibility;

// Re-exports
pub use completion::{CompletionRecord, CompletionStore, MemoryCompletionStore, RemoteStore};
pub use config::Config;
pub use course::{ContentUnit, ContentUnitKey, Course, CourseProgress, TocSection};
pub use db::{SqliteCompletionStore, StoreScope};
pub use drafts::{DraftCache, LocalStorage, MemoryStorage, SledStorage};
pub use error::ProgressError;
pub use events::{EventBus, ProgressEvent};
pub use gating::{can_complete, GateDecision, GateRule};
pub use identity::{AuthProvider, IdentityResolver, LearnerId, LearnerIdentity, StaticAuthProvider};
pub use navigator::{Collaborators, CourseNavigator, Notice, PageState};
pub use quiz::{Quiz, QuizAttempt, QuizQuestion, QuizState};
pub use remote::{HttpAuthProvider, HttpCompletionStore, RemoteConfig};
pub use visibility::{FocusBand, IntersectionEntry, SectionObserver, SectionRect, VisibilityTracker};
