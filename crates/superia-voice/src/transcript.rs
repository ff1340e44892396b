//! Interim/final transcript assembly.
//!
//! Two buffers: `pending` holds finalized text only and is what gets dispatched;
//! `display` is pending text plus the latest interim fragment. Interim text never reaches `pending`.

#[derive(Debug, Default, Clone)]
pub struct TranscriptAssembler {
    pending: String,
    display: String,
}

fn join(base: &str, fragment: &str) -> String {
    format!("{} {}", base, fragment).trim().to_string()
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show an interim fragment. Returns the new display text, or `None` for an empty fragment.
    pub fn interim(&mut self, fragment: &str) -> Option<&str> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return None;
        }
        self.display = join(&self.pending, fragment);
        Some(&self.display)
    }

    /// Append a final fragment. Returns the full pending text to dispatch, or `None` for an empty fragment.
    pub fn finalize(&mut self, fragment: &str) -> Option<String> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return None;
        }
        self.pending = join(&self.pending, fragment);
        self.display = self.pending.clone();
        Some(self.pending.clone())
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.display.clear();
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}
