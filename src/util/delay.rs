use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Sleep for at least `duration` and return the time that actually elapsed.
///
/// Errors instead of panicking when no runtime or timer driver is
/// available.
pub async fn delay(duration: Duration) -> Result<Duration> {
    let runtime = Handle::try_current().map_err(|e| Error::Timer(e.to_string()))?;

    // The timer is set up inside its own task so a missing time driver surfaces
    // as a join error rather than a panic here.
    runtime
        .spawn(async move {
            let started = Instant::now();
            tokio::time::sleep(duration).await;
            started.elapsed()
        })
        .await
        .map_err(|e| Error::Timer(e.to_string()))
}
