//! Rendering backend glue: paints poll results onto a scrollable surface.
//!
//! `SurfaceSink` turns each applied batch into patches with `render_dirty` and paints them
//! inside the surface's `ScrollKeeper`, so a reader pinned to the bottom stays there and a
//! reader scrolled up keeps their place.

use chrono::Utc;

use crate::poller::PollSink;
use crate::prefs::{ExpansionPrefs, PreferenceStore};
use crate::render::{render_dirty, Patch};
use crate::scroll::{ScrollKeeper, ScrollOptions, ScrollRegion};
use crate::session::{Applied, Dirty, SessionView};

/// A scrollable element that accepts rendered patches.
pub trait PatchTarget: ScrollRegion {
    fn apply_patch(&mut self, patch: &Patch);
}

/// Paint `patches` onto `target`. A layout patch counts as an append for follow mode.
pub fn paint<T: PatchTarget + ?Sized>(target: &mut T, keeper: &ScrollKeeper, patches: &[Patch]) {
    if patches.is_empty() {
        return;
    }
    let appended = patches
        .iter()
        .any(|patch| matches!(patch, Patch::Layout { .. }));
    keeper.mutate(target, appended, |target| {
        for patch in patches {
            target.apply_patch(patch);
        }
    });
}

pub struct SurfaceSink<T, S> {
    target: T,
    prefs: ExpansionPrefs<S>,
    keeper: ScrollKeeper,
}

impl<T: PatchTarget, S: PreferenceStore> SurfaceSink<T, S> {
    pub fn new(target: T, prefs: ExpansionPrefs<S>, scroll: ScrollOptions) -> Self {
        Self {
            target,
            prefs,
            keeper: ScrollKeeper::new(scroll),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn prefs_mut(&mut self) -> &mut ExpansionPrefs<S> {
        &mut self.prefs
    }

    pub fn keeper(&self) -> &ScrollKeeper {
        &self.keeper
    }

    /// Scroll the surface as the user did, then re-evaluate follow mode.
    pub fn user_scrolled_to(&mut self, top: f64) {
        self.target.set_scroll_top(top);
        self.keeper.user_scrolled(&self.target);
    }
}

impl<T, S> PollSink for SurfaceSink<T, S>
where
    T: PatchTarget + Send,
    S: PreferenceStore + Send,
{
    fn on_applied(&mut self, view: &SessionView, _applied: &[Applied], dirty: &Dirty) {
        let patches = render_dirty(view, dirty, &self.prefs, Utc::now());
        tracing::trace!(patches = patches.len(), layout = dirty.layout, "Painting patches");
        paint(&mut self.target, &self.keeper, &patches);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use shared_types::{LogEntry, LogType};

    use super::*;
    use crate::prefs::MemoryStore;
    use crate::session::ReconcileOptions;

    const CLIENT_HEIGHT: f64 = 100.0;

    /// Surface one pixel tall per rendered byte.
    #[derive(Default)]
    struct Transcript {
        layout: String,
        nodes: HashMap<String, String>,
        top: f64,
    }

    impl ScrollRegion for Transcript {
        fn scroll_top(&self) -> f64 {
            self.top
        }

        fn scroll_height(&self) -> f64 {
            (self.layout.len() + self.nodes.values().map(String::len).sum::<usize>()) as f64
        }

        fn client_height(&self) -> f64 {
            CLIENT_HEIGHT
        }

        fn set_scroll_top(&mut self, top: f64) {
            let max = (self.scroll_height() - CLIENT_HEIGHT).max(0.0);
            self.top = top.clamp(0.0, max);
        }
    }

    impl PatchTarget for Transcript {
        fn apply_patch(&mut self, patch: &Patch) {
            match patch {
                Patch::Layout { html } => {
                    self.layout = html.clone();
                    self.nodes.clear();
                }
                Patch::Replace { dom_id, html } => {
                    self.nodes.insert(dom_id.clone(), html.clone());
                }
            }
        }
    }

    fn sink() -> SurfaceSink<Transcript, MemoryStore> {
        SurfaceSink::new(
            Transcript::default(),
            ExpansionPrefs::new(MemoryStore::default()),
            ScrollOptions::default(),
        )
    }

    fn push(view: &mut SessionView, sink: &mut SurfaceSink<Transcript, MemoryStore>, entry: LogEntry) {
        let applied = view.apply(&entry);
        let dirty = view.take_dirty();
        sink.on_applied(view, &[applied], &dirty);
    }

    fn message(id: &str, kind: LogType, content: &str) -> LogEntry {
        let mut entry = LogEntry::new(id, kind);
        entry.content = content.to_string();
        entry
    }

    #[test]
    fn pinned_surface_stays_at_bottom_across_batches() {
        let mut view = SessionView::new(Some("ctx".into()), ReconcileOptions::default());
        let mut sink = sink();

        push(&mut view, &mut sink, message("u1", LogType::User, "What's the weather?"));
        push(&mut view, &mut sink, message("a1", LogType::Agent, "Looking it up"));
        push(&mut view, &mut sink, message("r1", LogType::Response, "Sunny, 24 degrees."));

        let surface = sink.target();
        assert!(surface.scroll_height() > CLIENT_HEIGHT);
        assert!(surface.is_at_bottom(0.0));
    }

    #[test]
    fn scrolled_up_surface_keeps_its_offset() {
        let mut view = SessionView::new(Some("ctx".into()), ReconcileOptions::default());
        let mut sink = sink();
        push(&mut view, &mut sink, message("u1", LogType::User, "What's the weather?"));
        push(&mut view, &mut sink, message("r1", LogType::Response, "Sunny, 24 degrees."));

        sink.user_scrolled_to(0.0);
        assert!(!sink.keeper().autoscroll().is_active());
        let before = sink.target().scroll_height();

        push(&mut view, &mut sink, message("u2", LogType::User, "And tomorrow?"));
        assert!(sink.target().scroll_height() > before);
        assert_eq!(sink.target().scroll_top(), 0.0);
    }

    #[test]
    fn in_place_updates_do_not_force_follow() {
        let mut view = SessionView::new(Some("ctx".into()), ReconcileOptions::default());
        let mut sink = sink();
        push(&mut view, &mut sink, message("u1", LogType::User, "Summarize the report"));
        let mut agent = message("a1", LogType::Agent, "Reading");
        push(&mut view, &mut sink, agent.clone());

        // 40px above the bottom: outside the pin tolerance, inside the follow tolerance.
        let top = sink.target().scroll_height() - CLIENT_HEIGHT - 40.0;
        sink.user_scrolled_to(top);
        assert!(sink.keeper().autoscroll().is_active());

        agent.content = "Reading the second chapter of the report".into();
        push(&mut view, &mut sink, agent);
        assert_eq!(sink.target().scroll_top(), top);
    }
}
