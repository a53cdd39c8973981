use serde::{Deserialize, Serialize};

/// Heights within this distance of the desk count as "already there"
const TOLERANCE_CM: u32 = 1;

/// A named desk height
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Preset {
    /// Optional label, "Preset #n" is shown when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Target height in cm
    pub height: u32,
}

impl Preset {
    /// Create a preset
    #[must_use]
    pub fn new(name: Option<&str>, height: u32) -> Self {
        Self {
            name: name.map(str::to_owned),
            height,
        }
    }
}

/// Presets of one desk, in user order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetList {
    presets: Vec<Preset>,
}

impl PresetList {
    /// Wrap presets in user order
    #[must_use]
    pub const fn new(presets: Vec<Preset>) -> Self {
        Self { presets }
    }

    /// Number of presets
    #[must_use]
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    /// True when the desk has no presets
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Preset at a user-order index
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Preset> {
        self.presets.get(index)
    }

    /// Iterate in user order
    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }

    /// Name to show for the preset at `index`
    #[must_use]
    pub fn display_name(&self, index: usize) -> String {
        match self.presets.get(index) {
            Some(Preset {
                name: Some(name), ..
            }) if !name.trim().is_empty() => name.clone(),
            Some(_) => format!("Preset #{}", index + 1),
            None => "Preset".to_owned(),
        }
    }

    /// User-order indices sorted by ascending height (stable)
    #[must_use]
    pub fn height_ordered(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.presets.len()).collect();
        order.sort_by_key(|&index| self.presets[index].height);
        order
    }

    /// Next preset above the desk
    ///
    /// While a move to `target` is in flight, steps past it instead of
    /// looking at the (stale) current height.
    #[must_use]
    pub fn next_up(&self, current_height: Option<u32>, target: Option<usize>) -> Option<usize> {
        let order = self.height_ordered();
        self.next_in(&order, current_height, target, |preset, current| {
            preset > current
        })
    }

    /// Next preset below the desk, mirror of [`PresetList::next_up`]
    #[must_use]
    pub fn next_down(&self, current_height: Option<u32>, target: Option<usize>) -> Option<usize> {
        let mut order = self.height_ordered();
        order.reverse();
        self.next_in(&order, current_height, target, |preset, current| {
            preset < current
        })
    }

    fn next_in(
        &self,
        order: &[usize],
        current_height: Option<u32>,
        target: Option<usize>,
        beyond: impl Fn(u32, u32) -> bool,
    ) -> Option<usize> {
        if let Some(position) = target.and_then(|t| order.iter().position(|&i| i == t)) {
            if let Some(&next) = order.get(position + 1) {
                return Some(next);
            }
        }

        let current = current_height?;
        order.iter().copied().find(|&index| {
            let height = self.presets[index].height;
            beyond(height, current) && height.abs_diff(current) > TOLERANCE_CM
        })
    }
}

impl From<Vec<Preset>> for PresetList {
    fn from(presets: Vec<Preset>) -> Self {
        Self::new(presets)
    }
}
