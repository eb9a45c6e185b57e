// Wall-clock synchronisation
// Event timestamps are Unix epoch seconds, which the device only knows once
// SNTP has completed a sync. The service handle must stay alive for the
// clock to keep being disciplined.

use anyhow::Context;
use embassy_time::{Duration, Instant, Timer};
use esp_idf_svc::sntp::{EspSntp, SyncStatus};
use log::{info, warn};

const SYNC_POLL_MS: u64 = 200;

/// Start SNTP and wait up to `timeout` for the first sync.
///
/// An unsynchronised clock is not fatal; events are stamped with whatever
/// the system clock reads until the sync lands.
pub async fn start_sntp(timeout: Duration) -> anyhow::Result<EspSntp<'static>> {
    let sntp = EspSntp::new_default().context("Failed to start SNTP")?;
    info!("🕒 SNTP started, waiting for first sync");

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if sntp.get_sync_status() == SyncStatus::Completed {
            info!("✅ Wall clock synchronised");
            return Ok(sntp);
        }
        Timer::after(Duration::from_millis(SYNC_POLL_MS)).await;
    }

    warn!(
        "⚠️ No SNTP sync within {}s, event timestamps may be wrong until it completes",
        timeout.as_secs()
    );
    Ok(sntp)
}
