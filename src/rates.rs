/// Occupied over open, 0 when nothing is open.
///
/// Trust rows and regional/system rows both call this, with regional inputs
/// being summed counts, so the two definitions cannot drift apart.
pub fn occupancy_rate(occupied: f64, open: f64) -> f64 {
    if open > 0.0 {
        occupied / open
    } else {
        0.0
    }
}

/// Ratio of two optionally reported counts; null when either is missing.
pub fn reported_rate(occupied: Option<f64>, open: Option<f64>) -> Option<f64> {
    Some(occupancy_rate(occupied?, open?))
}
