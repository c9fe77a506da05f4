use crate::core::difference::{DatePair, DiffEncoding};

/// Receives progress events from the difference engine.
///
/// All methods default to no-ops so observers only implement what they need.
pub trait DiffObserver {
    /// Outputs already exist and the run was skipped
    fn skipped(&self, _reason: &str) {}

    /// A pair is about to be differenced
    fn pair_started(&self, _pair: &DatePair) {}

    /// A pair wrote `filled` cells; `remaining` of `total` cells are still empty
    fn pair_finished(&self, _pair: &DatePair, _filled: usize, _remaining: usize, _total: usize) {}

    /// The output encoding was decided; `range` is the scaled (centimeter)
    /// min/max of the filled cells, if any
    fn encoding_chosen(&self, _encoding: DiffEncoding, _range: Option<(f64, f64)>) {}
}

/// Forwards engine events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl DiffObserver for LogObserver {
    fn skipped(&self, reason: &str) {
        log::warn!("{}", reason);
    }

    fn pair_started(&self, pair: &DatePair) {
        log::info!(
            "Getting DEM difference using the one on {} and {}, total day diff: {}",
            pair.newer.format("%Y-%m-%d"),
            pair.older.format("%Y-%m-%d"),
            pair.day_gap
        );
    }

    fn pair_finished(&self, _pair: &DatePair, filled: usize, remaining: usize, total: usize) {
        let percent = if total == 0 {
            0.0
        } else {
            100.0 * remaining as f64 / total as f64
        };
        log::info!(
            " filled {} pixels, remain {:.4} percent pixels need to be filled",
            filled,
            percent
        );
    }

    fn encoding_chosen(&self, encoding: DiffEncoding, range: Option<(f64, f64)>) {
        match range {
            Some((min, max)) => log::info!(
                "DEM difference range {:.0} to {:.0} cm, saving as {:?}",
                min,
                max,
                encoding
            ),
            None => log::warn!("DEM difference has no valid pixels, saving as {:?}", encoding),
        }
    }
}
