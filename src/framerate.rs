//! Frame-rate presets: each pairs a capture interval with the smoothing
//! cascade tuned for it.

use crate::error::{PipelineError, Result};
use crate::filter::SmoothingSettings;

/// Index of the preset selected at startup.
pub const DEFAULT_FRAMERATE_INDEX: usize = 1;

/// Capture intervals of the built-in presets, slowest first.
const BUILTIN_INTERVALS_MS: [u64; 8] = [1000, 667, 500, 333, 250, 125, 80, 50];

#[derive(Debug, Clone, PartialEq)]
pub struct FramerateSetting {
    pub smoothing: SmoothingSettings,
    pub frame_delay_ms: u64,
}

impl FramerateSetting {
    pub fn new(smoothing: SmoothingSettings, frame_delay_ms: u64) -> Self {
        Self {
            smoothing,
            frame_delay_ms,
        }
    }

    /// Frames per second for this interval
    pub fn framerate(&self) -> f32 {
        if self.frame_delay_ms == 0 {
            return f32::INFINITY;
        }
        1000.0 / self.frame_delay_ms as f32
    }
}

fn builtin_smoothing() -> SmoothingSettings {
    SmoothingSettings::new(vec![
        [0.03168934, 0.06337869, 0.03168934, 1.0, -0.41421356, 0.0],
        [1.0, 1.0, 0.0, 1.0, -1.0448155, 0.47759225],
    ])
}

/// Ordered presets, slowest (index 0) to fastest, with a cursor
#[derive(Debug, Clone)]
pub struct FramerateCatalog {
    settings: Vec<FramerateSetting>,
    current: usize,
}

impl FramerateCatalog {
    pub fn new() -> Self {
        let settings = BUILTIN_INTERVALS_MS
            .iter()
            .map(|&ms| FramerateSetting::new(builtin_smoothing(), ms))
            .collect();
        Self {
            settings,
            current: DEFAULT_FRAMERATE_INDEX,
        }
    }

    /// Custom catalog. Presets must be ordered slowest to fastest.
    pub fn with_settings(settings: Vec<FramerateSetting>, default_index: usize) -> Result<Self> {
        if settings.is_empty() {
            return Err(PipelineError::Config(
                "framerate catalog needs at least one preset".to_string(),
            ));
        }
        if default_index >= settings.len() {
            return Err(PipelineError::invalid("framerate_index", default_index));
        }
        Ok(Self {
            settings,
            current: default_index,
        })
    }

    pub fn current(&self) -> &FramerateSetting {
        &self.settings[self.current]
    }

    pub fn index(&self) -> usize {
        self.current
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    pub fn framerate(&self) -> f32 {
        self.current().framerate()
    }

    /// Move the cursor to `index`. Out-of-range indices are rejected.
    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.settings.len() {
            return Err(PipelineError::invalid("framerate_index", index));
        }
        self.current = index;
        Ok(())
    }

    /// Returns `false` when already at the fastest preset.
    pub fn step_faster(&mut self) -> bool {
        if self.current + 1 < self.settings.len() {
            self.current += 1;
            true
        } else {
            false
        }
    }

    /// Returns `false` when already at the slowest preset.
    pub fn step_slower(&mut self) -> bool {
        if self.current > 0 {
            self.current -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for FramerateCatalog {
    fn default() -> Self {
        Self::new()
    }
}
