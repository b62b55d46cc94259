//! Reduce a sequence of scored trials to a single number.

use serde::{Deserialize, Serialize};

/// One evaluated trial. Only `average_return` is scored; other fields are kept
/// in the raw document for signing but ignored here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub average_return: f64,
}

/// Mean `average_return` over all trials, `0.0` for no trials.
#[must_use]
pub fn average_return(trials: &[Trial]) -> f64 {
    if trials.is_empty() {
        return 0.0;
    }
    let total: f64 = trials.iter().map(|t| t.average_return).sum();
    #[allow(clippy::cast_precision_loss)]
    let count = trials.len() as f64;
    total / count
}
