use std::sync::atomic::{AtomicBool, Ordering};

/// Availability flag for the synthesis engine.
///
/// Set down once a request has exhausted its retries, and cleared by the
/// background probe once `/speakers` answers again. While down, synthesis
/// calls fail fast with [`crate::VoiceError::EngineUnavailable`].
#[derive(Debug, Default)]
pub struct EngineHealth {
    down: AtomicBool,
}

impl EngineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        !self.down.load(Ordering::Acquire)
    }

    /// Marks the engine down. Returns `true` if it was previously available.
    pub fn mark_down(&self) -> bool {
        !self.down.swap(true, Ordering::AcqRel)
    }

    /// Marks the engine available. Returns `true` if it was previously down.
    pub fn mark_up(&self) -> bool {
        self.down.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_report_edges_only() {
        let h = EngineHealth::new();
        assert!(h.is_available());
        assert!(h.mark_down());
        assert!(!h.mark_down());
        assert!(!h.is_available());
        assert!(h.mark_up());
        assert!(!h.mark_up());
        assert!(h.is_available());
    }
}
