//! Background loop that reminds owners of invitations that expired unused.

use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::services::notifier::{InvitationNotifier, ReminderContext};
use crate::services::store::InvitationStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub candidates: usize,
    pub notified: usize,
    pub failed: usize,
}

pub struct ExpirySweeper {
    store: Arc<dyn InvitationStore>,
    notifier: Arc<dyn InvitationNotifier>,
    interval: Duration,
    resend_grace: chrono::Duration,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn InvitationStore>,
        notifier: Arc<dyn InvitationNotifier>,
        interval: Duration,
        resend_grace: chrono::Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            interval,
            resend_grace,
        }
    }

    /// One pass. A failed store query aborts the pass; a failed notification
    /// only skips that invitation, which stays eligible for the next pass.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, anyhow::Error> {
        let cutoff = now
            .checked_sub_signed(self.resend_grace)
            .ok_or_else(|| anyhow::anyhow!("Reminder cutoff out of range"))?;
        let candidates = self.store.find_reminder_candidates(cutoff).await?;

        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };

        for candidate in candidates {
            let context = ReminderContext {
                invitation_id: candidate.id,
                expired_at: candidate.expires_at,
            };

            if let Err(e) = self.notifier.notify(&candidate.email, &context).await {
                warn!(
                    invitation_id = candidate.id,
                    error = %e,
                    "Failed to send invitation reminder"
                );
                counter!("invitation_reminders_total", "outcome" => "failed").increment(1);
                report.failed += 1;
                continue;
            }

            counter!("invitation_reminders_total", "outcome" => "sent").increment(1);
            report.notified += 1;

            // Sent but not recorded means a duplicate reminder next pass.
            if let Err(e) = self.store.mark_reminder_sent(candidate.id, now).await {
                warn!(
                    invitation_id = candidate.id,
                    error = %e,
                    "Failed to record reminder"
                );
            }
        }

        Ok(report)
    }

    /// Sweep immediately, then once per interval until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");

        loop {
            match self.sweep_once(Utc::now()).await {
                Ok(report) if report.candidates > 0 => info!(
                    candidates = report.candidates,
                    notified = report.notified,
                    failed = report.failed,
                    "Expiry sweep completed"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Expiry sweep failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Expiry sweeper stopped");
    }
}
