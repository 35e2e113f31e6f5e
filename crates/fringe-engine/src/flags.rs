// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Control Flags
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Operator switches shared between the track loop, the acquisition
//! backend and any monitoring thread.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Which product a monitoring display follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotFocus {
    Combined,
    Raw,
    Niobate,
}

impl PlotFocus {
    fn to_u8(self) -> u8 {
        match self {
            PlotFocus::Combined => 0,
            PlotFocus::Raw => 1,
            PlotFocus::Niobate => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => PlotFocus::Raw,
            2 => PlotFocus::Niobate,
            _ => PlotFocus::Combined,
        }
    }
}

/// Lock-free flag set, meant to live behind an `Arc`.
#[derive(Debug)]
pub struct ControlFlags {
    tracking: AtomicBool,
    scope: AtomicBool,
    quit: AtomicBool,
    save_background: AtomicBool,
    subtract_background: AtomicBool,
    plot_focus: AtomicU8,
}

impl ControlFlags {
    pub fn new(tracking: bool, scope: bool) -> Self {
        ControlFlags {
            tracking: AtomicBool::new(tracking),
            scope: AtomicBool::new(scope),
            quit: AtomicBool::new(false),
            save_background: AtomicBool::new(false),
            subtract_background: AtomicBool::new(false),
            plot_focus: AtomicU8::new(PlotFocus::Combined.to_u8()),
        }
    }

    pub fn tracking(&self) -> bool {
        self.tracking.load(Ordering::Acquire)
    }

    pub fn set_tracking(&self, on: bool) {
        self.tracking.store(on, Ordering::Release);
    }

    pub fn scope(&self) -> bool {
        self.scope.load(Ordering::Acquire)
    }

    pub fn set_scope(&self, on: bool) {
        self.scope.store(on, Ordering::Release);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    pub fn clear_quit(&self) {
        self.quit.store(false, Ordering::Release);
    }

    pub fn save_background(&self) -> bool {
        self.save_background.load(Ordering::Acquire)
    }

    /// Capture the next prepared scan as background.
    pub fn request_save_background(&self) {
        self.save_background.store(true, Ordering::Release);
    }

    pub fn clear_save_background(&self) {
        self.save_background.store(false, Ordering::Release);
    }

    pub fn subtract_background(&self) -> bool {
        self.subtract_background.load(Ordering::Acquire)
    }

    pub fn set_subtract_background(&self, on: bool) {
        self.subtract_background.store(on, Ordering::Release);
    }

    pub fn plot_focus(&self) -> PlotFocus {
        PlotFocus::from_u8(self.plot_focus.load(Ordering::Acquire))
    }

    pub fn set_plot_focus(&self, focus: PlotFocus) {
        self.plot_focus.store(focus.to_u8(), Ordering::Release);
    }

    /// The track loop keeps running while either consumer wants data.
    pub fn keep_running(&self) -> bool {
        !self.quit_requested() && (self.tracking() || self.scope())
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new(false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_keep_running() {
        let flags = ControlFlags::new(true, false);
        assert!(flags.keep_running());
        flags.set_tracking(false);
        assert!(!flags.keep_running());
        flags.set_scope(true);
        assert!(flags.keep_running());
        flags.request_quit();
        assert!(!flags.keep_running());
    }

    #[test]
    fn test_plot_focus_roundtrip() {
        let flags = ControlFlags::default();
        assert_eq!(flags.plot_focus(), PlotFocus::Combined);
        flags.set_plot_focus(PlotFocus::Niobate);
        assert_eq!(flags.plot_focus(), PlotFocus::Niobate);
    }

    #[test]
    fn test_shared_across_threads() {
        let flags = Arc::new(ControlFlags::default());
        let remote = Arc::clone(&flags);
        thread::spawn(move || remote.request_save_background())
            .join()
            .unwrap();
        assert!(flags.save_background());
    }
}
