//! Startup sweep for builds interrupted by a restart.

use tracing::{info, warn};

use crate::prelude::*;
use crate::store::BuildStore;

/// How many interrupted executions were marked failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub builds: usize,
    pub installers: usize,
}

/// Marks every `running` build and installer build as failed.
///
/// Nothing can still be running when the daemon starts, so whatever the
/// store says is running was interrupted. Queued executions are left alone.
pub fn recover(store: &dyn BuildStore) -> Result<RecoveryReport> {
    let report = RecoveryReport {
        builds: store.fail_running_builds()?,
        installers: store.fail_running_installers()?,
    };

    if report.builds > 0 {
        warn!("Marked {} interrupted builds as failed", report.builds);
    }
    if report.installers > 0 {
        warn!(
            "Marked {} interrupted installer builds as failed",
            report.installers
        );
    }
    if report == RecoveryReport::default() {
        info!("No interrupted builds found");
    }
    Ok(report)
}
