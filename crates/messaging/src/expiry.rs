//! Background expiry of soft holds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::{CommandContext, ExpireReservations, InventoryService};
use event_store::EventStore;
use tokio::sync::watch;

use crate::bus::MessagePublisher;
use crate::error::Result;
use crate::messages::{Envelope, OutboundMessage};

/// Periodically expires overdue reservations on every inventory stream and
/// publishes a `ReservationExpired` for each.
///
/// Only streams whose earliest expiry is due are written to. Without a
/// reservation TTL no hold carries an expiry and a sweep does nothing.
pub struct ExpirySweeper<S, P>
where
    S: EventStore,
    P: MessagePublisher,
{
    inventory: Arc<InventoryService<S>>,
    publisher: P,
}

impl<S, P> ExpirySweeper<S, P>
where
    S: EventStore,
    P: MessagePublisher,
{
    pub fn new(inventory: Arc<InventoryService<S>>, publisher: P) -> Self {
        Self {
            inventory,
            publisher,
        }
    }

    /// Expires everything due at `now`. Returns the number of expired
    /// reservations. A stream that fails is logged and left for the next
    /// sweep.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;

        for id in self.inventory.inventory_ids().await? {
            let Some(inventory) = self.inventory.get_inventory_by_id(id).await? else {
                continue;
            };
            let (Some(location), Some(next_expiry)) =
                (inventory.location(), inventory.next_expiry())
            else {
                continue;
            };
            if next_expiry > now {
                continue;
            }

            let cmd = ExpireReservations::new(location.clone(), now);
            let result = match self
                .inventory
                .expire_reservations(cmd, &CommandContext::new())
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(%location, error = %e, "expiry failed");
                    continue;
                }
            };

            for message in result
                .events
                .iter()
                .filter_map(OutboundMessage::from_inventory_event)
            {
                self.publisher.publish(Envelope::new(message)).await?;
                expired += 1;
            }
        }

        Ok(expired)
    }

    /// Sweeps every `interval` until `shutdown` flips to true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(?interval, "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(0) => {}
                        Ok(expired) => tracing::info!(expired, "reservations expired"),
                        Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("expiry sweeper stopped");
    }
}
