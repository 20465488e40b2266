//! Best-result selection across scored jobs.

use crate::domain::optimization::value_objects::OptimisationDirection;

/// Anything that can take part in best-result selection.
pub trait Scored {
    /// Returns true if the item finished successfully.
    fn is_completed(&self) -> bool;

    /// Optimisation score, if one was extracted.
    fn score(&self) -> Option<f64>;
}

/// Pick the best completed, scored item.
///
/// Candidates are stable-sorted by score so ties keep their input order.
pub fn select_best<T: Scored>(items: &[T], direction: OptimisationDirection) -> Option<&T> {
    let mut candidates: Vec<(f64, &T)> = items
        .iter()
        .filter(|item| item.is_completed())
        .filter_map(|item| item.score().map(|score| (score, item)))
        .collect();

    candidates.sort_by(|(a, _), (b, _)| direction.rank(*a, *b));
    candidates.first().map(|(_, item)| *item)
}
