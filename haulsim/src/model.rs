//! nexosim host for one engine run. The quarry model ticks the engine once per simulated
//! second by rescheduling itself, and hands the finished output back through a query.

use std::time::Duration;

use nexosim::model::{Context, Model};
use nexosim::simulation::{Mailbox, SimInit};
use tai_time::MonotonicTime;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::writer::SimOutput;

pub struct QuarryModel {
    engine: Option<Engine>,
    error: Option<EngineError>,
    ticks: u64,
}

impl QuarryModel {
    pub fn new(engine: Engine) -> Self {
        QuarryModel { engine: Some(engine), error: None, ticks: 0 }
    }

    pub fn start(&mut self, _: (), cx: &mut Context<Self>) {
        self.tick((), cx);
    }

    pub fn tick(&mut self, _: (), cx: &mut Context<Self>) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if self.error.is_some() || engine.is_done() {
            return;
        }
        if let Err(e) = engine.step() {
            log::error!("engine stopped at {} s: {}", engine.now(), e);
            self.error = Some(e);
            return;
        }
        self.ticks += 1;
        if !engine.is_done() {
            if let Err(e) = cx.schedule_event(Duration::from_secs(1), Self::tick, ()) {
                self.error = Some(EngineError::Host(e.to_string()));
            }
        }
    }

    /// Closes the run. Fails with the first engine error if the run stopped early.
    pub async fn finish(&mut self, _: ()) -> Result<SimOutput, EngineError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let engine = self.engine.take().ok_or_else(|| EngineError::Host("run already finished".into()))?;
        if !engine.is_done() {
            return Err(EngineError::Host(format!("run stopped at {} of {} s", engine.now(), engine.duration())));
        }
        log::debug!("quarry model finished after {} ticks", self.ticks);
        Ok(engine.finish())
    }
}

impl Model for QuarryModel {}

/// Runs `engine` to its horizon inside a nexosim simulation.
pub fn run_hosted(engine: Engine) -> Result<SimOutput, EngineError> {
    let host = |e: nexosim::simulation::ExecutionError| EngineError::Host(e.to_string());
    let duration = engine.duration();
    let model = QuarryModel::new(engine);
    let mbox: Mailbox<QuarryModel> = Mailbox::new();
    let addr = mbox.address();

    let t0 = MonotonicTime::EPOCH;
    let mut simu = SimInit::new()
        .add_model(model, mbox, "Quarry")
        .init(t0)
        .map_err(|e| EngineError::Host(e.to_string()))?
        .0;
    if duration > 0 {
        simu.process_event(QuarryModel::start, (), &addr).map_err(host)?;
        simu.step_until(t0 + Duration::from_secs(duration)).map_err(host)?;
    }
    simu.process_query(QuarryModel::finish, (), &addr).map_err(host)?
}
