//! Small helpers shared by the runner and the CLI

use std::time::Duration;

/// Render a duration the way the run summary shows it
pub fn human_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{:.3}s", secs)
    } else {
        let minutes = (secs / 60.0).floor();
        format!("{}m {:.3}s", minutes as u64, secs - minutes * 60.0)
    }
}
