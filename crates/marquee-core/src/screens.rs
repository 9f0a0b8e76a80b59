use serde::{Deserialize, Serialize};

/// Geometry of one physical screen in physical pixels. `left`/`top` are
/// relative to the shared virtual-desktop origin and may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenDescriptor {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub left: i32,
    #[serde(default)]
    pub top: i32,
}

impl ScreenDescriptor {
    pub fn full_screen(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            left: 0,
            top: 0,
        }
    }
}

/// Ordered set of attached screens, in detection order. Regenerated
/// wholesale on every detection, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenTopology(pub Vec<ScreenDescriptor>);

impl ScreenTopology {
    pub fn screen_count(&self) -> usize {
        self.0.len()
    }

    pub fn screens(&self) -> &[ScreenDescriptor] {
        &self.0
    }

    /// Descriptor for the secondary screen, if one is attached.
    pub fn second(&self) -> Option<&ScreenDescriptor> {
        self.0.get(1)
    }
}
