//! Controlling the entire operation: the process-wide event log and the
//! per-zone control channel.

use tracing::{info, warn};

use authority_zonestore::Serial;

use crate::zone::ZoneName;

/// An event raised by the Zone Lifecycle Controller or Request Gateway for
/// process-wide bookkeeping (logging, and eventually the §4.5 NOTIFY
/// fan-out and metrics); consumed by [`run`].
#[derive(Clone, Debug)]
pub enum Update {
    /// A DDNS UPDATE, AXFR-in, or IXFR-in published a new snapshot.
    ZoneUpdated { zone: ZoneName, serial: Serial },
    /// The EXPIRE timer fired; the zone is answerable only with SERVFAIL.
    ZoneExpired { zone: ZoneName },
    /// A SOA probe found the master ahead of the local snapshot.
    TransferNeeded { zone: ZoneName, ixfr: bool },
}

/// A control-plane command aimed at one zone's driving task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplicationCommand {
    /// Re-read this zone's entry from the process config.
    Reload,
    /// Discard the zone and stop its driving task.
    Shutdown,
}

/// Drain `updates` until the sender side is dropped, logging each one.
/// This is the process's central event sink (§5's "Ordering guarantees"
/// make a per-zone total order meaningful to log in arrival order).
pub async fn run(mut updates: tokio::sync::mpsc::UnboundedReceiver<Update>) {
    while let Some(update) = updates.recv().await {
        match update {
            Update::ZoneUpdated { zone, serial } => {
                info!(%zone, %serial, "zone updated");
            }
            Update::ZoneExpired { zone } => {
                warn!(%zone, "zone expired");
            }
            Update::TransferNeeded { zone, ixfr } => {
                info!(%zone, ixfr, "transfer needed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn run_drains_updates_until_the_sender_is_dropped() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let zone = ZoneName::from_str("example.com.").unwrap();

        tx.send(Update::ZoneUpdated { zone: zone.clone(), serial: Serial::new(1) }).unwrap();
        tx.send(Update::ZoneExpired { zone: zone.clone() }).unwrap();
        tx.send(Update::TransferNeeded { zone, ixfr: true }).unwrap();
        drop(tx);

        // `run` returning at all demonstrates it drained every update and
        // stopped once the channel closed, rather than hanging.
        run(rx).await;
    }
}
