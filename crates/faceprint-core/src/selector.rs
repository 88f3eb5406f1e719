//! Dominant-face selection among one model's detections in one image.

use crate::types::FaceCandidate;

/// Outcome of picking the dominant face in an image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection<'a> {
    /// The model reported no faces.
    NoFace,
    /// The best candidate is smaller than the minimum face area.
    TooSmall { area: f32 },
    Selected(&'a FaceCandidate),
}

impl<'a> Selection<'a> {
    pub fn selected(self) -> Option<&'a FaceCandidate> {
        match self {
            Selection::Selected(c) => Some(c),
            _ => None,
        }
    }
}

/// Picks the candidate maximizing `confidence × area`.
#[derive(Debug, Clone)]
pub struct FaceCandidateSelector {
    min_face_area: f32,
}

impl FaceCandidateSelector {
    /// Faces smaller than `min_face_size²` square pixels are rejected.
    pub fn new(min_face_size: u32) -> Self {
        let side = min_face_size as f32;
        Self {
            min_face_area: side * side,
        }
    }

    pub fn min_face_area(&self) -> f32 {
        self.min_face_area
    }

    /// Best candidate, or `None` when there is none or it is too small.
    pub fn select_best<'a>(&self, candidates: &'a [FaceCandidate]) -> Option<&'a FaceCandidate> {
        self.pick(candidates).selected()
    }

    /// Like [`select_best`](Self::select_best), but says why nothing was selected.
    ///
    /// Exact ties keep the earliest candidate; NaN scores never win.
    pub fn pick<'a>(&self, candidates: &'a [FaceCandidate]) -> Selection<'a> {
        let mut best: Option<&FaceCandidate> = None;
        let mut best_score = f32::NEG_INFINITY;

        for candidate in candidates {
            let score = candidate.selection_score();
            if best.is_none() || score > best_score {
                best = Some(candidate);
                best_score = if score.is_nan() { f32::NEG_INFINITY } else { score };
            }
        }

        match best {
            None => Selection::NoFace,
            Some(c) if c.area < self.min_face_area => Selection::TooSmall { area: c.area },
            Some(c) => Selection::Selected(c),
        }
    }
}
