//! Section visibility tracker (scrollspy)
//!
//! Maps intersection observations onto the single table-of-contents entry
//! considered "in view". The viewport is shrunk from the bottom by a margin
//! (70% of its height by default) to form the focus band; a section becomes
//! active as soon as any part of it enters the band.
//!
//! The tracker is an owned resource: mount it with the page's sections,
//! feed it observation batches, and drop (or [`VisibilityTracker::dispose`])
//! it on unmount. Observers cloned out of it go quiet after disposal, so a
//! late callback cannot update an unmounted page.
//!
//! ```text
//!  viewport top ──┬─────────────┐
//!                 │ focus band  │  height * (1 - margin)
//!                 ├─────────────┤
//!                 │   ignored   │  height * margin
//!  viewport end ──┴─────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::course::TocSection;

/// Default fraction of the viewport cut from the bottom of the focus band
pub const DEFAULT_BOTTOM_MARGIN: f64 = 0.70;

/// Section bounds relative to the viewport top, in pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRect {
    pub id: String,
    pub top: f64,
    pub bottom: f64,
}

/// Vertical band of the viewport that counts as "in view"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusBand {
    pub top: f64,
    pub bottom: f64,
}

impl FocusBand {
    pub fn from_viewport(viewport_height: f64, bottom_margin: f64) -> Self {
        let margin = bottom_margin.clamp(0.0, 1.0);
        Self {
            top: 0.0,
            bottom: viewport_height.max(0.0) * (1.0 - margin),
        }
    }

    /// Any overlap counts
    pub fn intersects(&self, rect: &SectionRect) -> bool {
        rect.top < self.bottom && rect.bottom > self.top
    }
}

/// One entry of an observation batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntersectionEntry {
    pub section_id: String,
    pub is_intersecting: bool,
}

impl IntersectionEntry {
    pub fn new(section_id: impl Into<String>, is_intersecting: bool) -> Self {
        Self {
            section_id: section_id.into(),
            is_intersecting,
        }
    }
}

struct TrackerInner {
    /// Sorted by document order
    sections: Vec<TocSection>,
    bottom_margin: f64,
    active_tx: watch::Sender<Option<String>>,
    alive: AtomicBool,
    disposed: Notify,
}

impl TrackerInner {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn order_of(&self, id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.id == id)
    }

    fn observe(&self, batch: &[IntersectionEntry]) -> Option<String> {
        if !self.is_alive() {
            trace!("Ignoring observation after dispose");
            return None;
        }

        // First intersecting section in document order wins
        let winner = batch
            .iter()
            .filter(|e| e.is_intersecting)
            .filter_map(|e| self.order_of(&e.section_id))
            .min()
            .map(|idx| self.sections[idx].id.clone())?;

        let changed = self.active_tx.send_if_modified(|active| {
            if active.as_deref() == Some(winner.as_str()) {
                false
            } else {
                *active = Some(winner.clone());
                true
            }
        });
        if changed {
            debug!(section_id = %winner, "Active section changed");
        }
        Some(winner)
    }

    fn entries_for_layout(&self, viewport_height: f64, rects: &[SectionRect]) -> Vec<IntersectionEntry> {
        let band = FocusBand::from_viewport(viewport_height, self.bottom_margin);
        rects
            .iter()
            .map(|r| IntersectionEntry::new(r.id.clone(), band.intersects(r)))
            .collect()
    }

    fn dispose(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.disposed.notify_waiters();
            debug!("Visibility tracker disposed");
        }
    }
}

/// Cloneable handle for delivering observations from callbacks
#[derive(Clone)]
pub struct SectionObserver {
    inner: Arc<TrackerInner>,
}

impl SectionObserver {
    /// Apply a batch; returns the winning section, or `None` when nothing in
    /// the batch intersects or the tracker was disposed
    pub fn observe(&self, batch: &[IntersectionEntry]) -> Option<String> {
        self.inner.observe(batch)
    }

    pub fn observe_layout(&self, viewport_height: f64, rects: &[SectionRect]) -> Option<String> {
        let entries = self.inner.entries_for_layout(viewport_height, rects);
        self.inner.observe(&entries)
    }

    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }
}

/// Scrollspy state owned by one mounted page
pub struct VisibilityTracker {
    inner: Arc<TrackerInner>,
}

impl VisibilityTracker {
    /// Start tracking `sections` with the given bottom margin
    pub fn mount(mut sections: Vec<TocSection>, bottom_margin: f64) -> Self {
        sections.sort_by_key(|s| s.order);
        let (active_tx, _) = watch::channel(None);

        debug!(sections = sections.len(), bottom_margin, "Visibility tracker mounted");
        Self {
            inner: Arc::new(TrackerInner {
                sections,
                bottom_margin,
                active_tx,
                alive: AtomicBool::new(true),
                disposed: Notify::new(),
            }),
        }
    }

    pub fn with_default_margin(sections: Vec<TocSection>) -> Self {
        Self::mount(sections, DEFAULT_BOTTOM_MARGIN)
    }

    pub fn sections(&self) -> &[TocSection] {
        &self.inner.sections
    }

    pub fn active_section_id(&self) -> Option<String> {
        self.inner.active_tx.borrow().clone()
    }

    /// Receive every change of the active section
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.inner.active_tx.subscribe()
    }

    pub fn observer(&self) -> SectionObserver {
        SectionObserver {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn observe(&self, batch: &[IntersectionEntry]) -> Option<String> {
        self.inner.observe(batch)
    }

    pub fn observe_layout(&self, viewport_height: f64, rects: &[SectionRect]) -> Option<String> {
        self.observer().observe_layout(viewport_height, rects)
    }

    /// Consume observation batches from a channel until the tracker is
    /// disposed or the sender goes away
    pub fn attach(&self, mut batches: mpsc::Receiver<Vec<IntersectionEntry>>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                // Register for the dispose signal before checking liveness
                let disposed = inner.disposed.notified();
                if !inner.is_alive() {
                    break;
                }
                tokio::select! {
                    _ = disposed => break,
                    batch = batches.recv() => match batch {
                        Some(batch) => {
                            inner.observe(&batch);
                        }
                        None => break,
                    },
                }
            }
            trace!("Observation feed stopped");
        })
    }

    /// Stop observing; later observations are ignored
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }
}

impl Drop for VisibilityTracker {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}
