use crate::detector::Observation;
use crate::pattern::PatternSpec;

/// Ordered accepted observation sets for one or two cameras.
///
/// In paired (stereo) mode the left and right sequences grow and shrink
/// together, so `left.len() == right.len()` holds at every point outside a
/// single append call. The estimator relies on identical indexing across
/// both sequences; keeping the pairing by construction avoids re-checking it
/// at every call site.
#[derive(Debug, Default)]
pub struct CalibrationBuffer {
    paired: bool,
    left: Vec<Observation>,
    right: Vec<Observation>,
}

impl CalibrationBuffer {
    pub fn new(paired: bool) -> Self {
        Self {
            paired,
            ..Default::default()
        }
    }

    /// All-or-nothing append: every observation the active mode requires must
    /// be present and complete, otherwise nothing is stored. Returns whether
    /// the set was accepted.
    pub fn append(
        &mut self,
        spec: &PatternSpec,
        left: Option<&Observation>,
        right: Option<&Observation>,
    ) -> bool {
        let Some(left) = left.filter(|o| o.is_valid(spec)) else {
            return false;
        };
        if self.paired {
            let Some(right) = right.filter(|o| o.is_valid(spec)) else {
                return false;
            };
            self.left.push(left.clone());
            self.right.push(right.clone());
        } else {
            self.left.push(left.clone());
        }
        true
    }

    /// Removes the most recently accepted set; no-op when empty.
    pub fn pop_last(&mut self) {
        self.left.pop();
        if self.paired {
            self.right.pop();
        }
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    /// Number of accepted observation sets.
    pub fn size(&self) -> usize {
        self.left.len()
    }

    pub fn is_paired(&self) -> bool {
        self.paired
    }

    pub fn left_sets(&self) -> &[Observation] {
        &self.left
    }

    pub fn right_sets(&self) -> &[Observation] {
        &self.right
    }
}
