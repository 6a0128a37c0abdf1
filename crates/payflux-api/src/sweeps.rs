//! Background sweep wiring
//!
//! Registers the billing and webhook sweeps against the cooperative runner:
//! hourly due billing, daily 09:00 dunning retries, daily 06:00 lifecycle,
//! five-minute outbound delivery, daily 02:00 retention cleanup, and the
//! half-hourly pending-transaction reconciliation backfill.

use std::time::Duration;
use tokio::task::JoinHandle;

use payflux_core::jobs::{SweepRunner, SweepTask};
use payflux_core::Result;

use crate::state::AppState;

pub fn spawn_sweeps(state: &AppState) -> Result<JoinHandle<()>> {
    let mut runner = SweepRunner::new(Duration::from_secs(15));

    let scheduler = state.scheduler.clone();
    runner.register(SweepTask::new(
        "billing-due",
        "0 0 * * * *",
        Duration::from_secs(600),
        move || {
            let scheduler = scheduler.clone();
            async move { scheduler.process_due_billing().await.map(|_| ()) }
        },
    )?);

    let scheduler = state.scheduler.clone();
    runner.register(SweepTask::new(
        "billing-retry",
        "0 0 9 * * *",
        Duration::from_secs(600),
        move || {
            let scheduler = scheduler.clone();
            async move { scheduler.retry_failed_payments().await.map(|_| ()) }
        },
    )?);

    let scheduler = state.scheduler.clone();
    runner.register(SweepTask::new(
        "billing-lifecycle",
        "0 0 6 * * *",
        Duration::from_secs(600),
        move || {
            let scheduler = scheduler.clone();
            async move { scheduler.run_lifecycle().await.map(|_| ()) }
        },
    )?);

    let scheduler = state.scheduler.clone();
    runner.register(SweepTask::new(
        "transaction-reconcile",
        "0 30 * * * *",
        Duration::from_secs(300),
        move || {
            let scheduler = scheduler.clone();
            async move { scheduler.reconcile_pending().await.map(|_| ()) }
        },
    )?);

    let outbound = state.outbound.clone();
    runner.register(SweepTask::new(
        "webhook-delivery",
        "0 */5 * * * *",
        Duration::from_secs(290),
        move || {
            let outbound = outbound.clone();
            async move { outbound.deliver_due().await.map(|_| ()) }
        },
    )?);

    let outbound = state.outbound.clone();
    runner.register(SweepTask::new(
        "webhook-cleanup",
        "0 0 2 * * *",
        Duration::from_secs(300),
        move || {
            let outbound = outbound.clone();
            async move { outbound.cleanup().await.map(|_| ()) }
        },
    )?);

    Ok(runner.spawn())
}
