//! Runner: the loop that drives both jobs until shutdown.

use chrono::Utc;
use herald_core::{store::ScheduleStore, transport::MessageTransport};
use tokio::{
  sync::watch,
  time::{self, Instant, MissedTickBehavior},
};

use crate::{Dispatcher, Reconciler, ScheduleConfig};

pub struct Runner<S, T> {
  reconciler: Reconciler<S>,
  dispatcher: Dispatcher<S, T>,
  schedule:   ScheduleConfig,
}

impl<S: ScheduleStore, T: MessageTransport> Runner<S, T> {
  pub fn new(
    reconciler: Reconciler<S>,
    dispatcher: Dispatcher<S, T>,
    schedule: ScheduleConfig,
  ) -> Self {
    Self { reconciler, dispatcher, schedule }
  }

  /// Run until `cancel` flips to `true` (or its sender is dropped).
  ///
  /// Reconcile runs first, then on the business or off-hours cadence, and
  /// wins over dispatch when both are ready. Dispatch runs on a fixed
  /// interval. A pass in flight finishes before the loop checks for shutdown
  /// again.
  pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
    tracing::info!(
      dispatch_interval_secs = self.schedule.dispatch_interval_secs,
      business_interval_secs = self.schedule.business_interval_secs,
      off_hours_interval_secs = self.schedule.off_hours_interval_secs,
      "runner started"
    );

    let mut dispatch_tick = time::interval(self.schedule.dispatch_interval());
    dispatch_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next_reconcile = Instant::now();

    loop {
      tokio::select! {
        biased;

        changed = cancel.changed() => {
          if changed.is_err() || *cancel.borrow() {
            tracing::info!("runner received shutdown signal");
            break;
          }
        }
        _ = time::sleep_until(next_reconcile) => {
          self.reconciler.reconcile(Utc::now()).await;
          let wait = self.schedule.reconcile_interval(Utc::now());
          next_reconcile = Instant::now() + wait;
          tracing::debug!(wait_secs = wait.as_secs(), "next reconcile scheduled");
        }
        _ = dispatch_tick.tick() => {
          self.dispatcher.dispatch_due(Utc::now()).await;
        }
      }
    }

    tracing::info!("runner stopped");
  }
}
