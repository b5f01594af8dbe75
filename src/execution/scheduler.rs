use crate::error::EngineError;
use crate::execution::entry::{EntryController, EntryOutcome};
use crate::execution::exit::{ExitController, ExitOutcome};
use crate::execution::pacing::Backoff;
use crate::execution::session::{EngineContext, Session};
use crate::models::{Position, PositionStatus, Side};
use std::sync::Arc;

/// How a full trading cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Closed,
    Canceled,
    Expired,
}

impl From<ExitOutcome> for CycleOutcome {
    fn from(outcome: ExitOutcome) -> Self {
        match outcome {
            ExitOutcome::Closed => CycleOutcome::Closed,
            ExitOutcome::Expired => CycleOutcome::Expired,
        }
    }
}

/// Outer loop sequencing entry, exit and the next entry
pub struct CycleScheduler {
    ctx: Arc<EngineContext>,
    entry: EntryController,
    exit: ExitController,
    backoff: Backoff,
}

impl CycleScheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            entry: EntryController::new(ctx.clone()),
            exit: ExitController::new(ctx.clone()),
            backoff: Backoff::from_config(&ctx.config),
            ctx,
        }
    }

    /// One cycle: resume an open position if one exists, otherwise open a new one
    pub async fn run_cycle(&self, session: &mut Session) -> Result<CycleOutcome, EngineError> {
        let config = &self.ctx.config;
        self.ctx.log_balances("cycle start").await;

        match self
            .ctx
            .store
            .find_open(&config.trading_pair, config.trade_type)
            .await?
        {
            Some(position) => self.resume(session, position).await,
            None => {
                let entry = self.entry.run(session).await?;
                self.after_entry(session, entry).await
            }
        }
    }

    async fn after_entry(
        &self,
        session: &mut Session,
        entry: EntryOutcome,
    ) -> Result<CycleOutcome, EngineError> {
        match entry {
            EntryOutcome::Filled => Ok(self.exit.run(session).await?.into()),
            EntryOutcome::Canceled => Ok(CycleOutcome::Canceled),
            EntryOutcome::Expired => Ok(CycleOutcome::Expired),
        }
    }

    async fn resume(
        &self,
        session: &mut Session,
        position: Position,
    ) -> Result<CycleOutcome, EngineError> {
        tracing::info!(
            "♻️ Resuming position {} ({} {})",
            position.transaction_id,
            position.side,
            position.status
        );
        let status = position.status;
        let side = position.side;
        session.position = Some(position);

        match (status, side) {
            (PositionStatus::New | PositionStatus::PartiallyFilled, Side::Buy) => {
                let entry = self.entry.track_fill(session).await?;
                self.after_entry(session, entry).await
            }
            (PositionStatus::New | PositionStatus::PartiallyFilled, Side::Sell) => {
                match self.exit.recover_sell(session).await? {
                    Some(outcome) => Ok(outcome.into()),
                    None => Ok(self.exit.run(session).await?.into()),
                }
            }
            _ => Ok(self.exit.run(session).await?.into()),
        }
    }

    /// Run cycles until once-mode completes one, or forever
    ///
    /// Cycle failures are logged and followed by a backoff wait; outside
    /// forever mode the failure then ends the run.
    pub async fn run(&mut self) -> Result<(), EngineError> {
        let run_forever = self.ctx.config.run_forever;
        tracing::info!(
            "🚀 Trading {} on {} ({})",
            self.ctx.config.trading_pair,
            self.ctx.exchange.name(),
            if run_forever { "forever" } else { "once" }
        );

        loop {
            let mut session = Session::new();
            match self.run_cycle(&mut session).await {
                Ok(outcome) => {
                    tracing::info!("🔁 Cycle finished: {:?}", outcome);
                    self.backoff.reset();
                    if !run_forever {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Cycle failed for {} (position {:?}): {}",
                        self.ctx.config.trading_pair,
                        session.position.as_ref().map(|p| p.transaction_id),
                        e
                    );
                    self.backoff.wait().await;
                    if !run_forever {
                        return Err(e);
                    }
                }
            }
        }
    }
}
