//! Booted engine on top of the simulated falcon

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use pmu_hal::Falcon;
use pmu_rpc::{Callback, EngineConfig, PmuEngine, Reply};
use pmu_sim::{InitLayout, RecordingScheduler, SimClock, SimFalcon};

pub struct Harness {
    pub sim: Arc<SimFalcon>,
    pub clock: Arc<SimClock>,
    pub scheduler: Arc<RecordingScheduler>,
    pub engine: PmuEngine,
}

impl Harness {
    /// Engine enabled, firmware not booted
    pub fn powered(config: EngineConfig) -> Self {
        let sim = Arc::new(SimFalcon::new());
        let clock = Arc::new(SimClock::new());
        let scheduler = Arc::new(RecordingScheduler::new());
        let falcon = Falcon::new(sim.clone(), clock.clone());
        let engine = PmuEngine::new(falcon, scheduler.clone(), config);
        engine.init().unwrap();

        Self {
            sim,
            clock,
            scheduler,
            engine,
        }
    }

    /// Engine past the init handshake
    pub fn booted() -> Self {
        Self::booted_with(EngineConfig::default())
    }

    pub fn booted_with(config: EngineConfig) -> Self {
        let h = Self::powered(config);
        h.sim.boot(&InitLayout::default());
        h.interrupt_and_drain();
        assert!(h.engine.is_ready());
        h
    }

    /// Deliver the pending interrupt and run the worker it scheduled
    pub fn interrupt_and_drain(&self) {
        self.engine.on_interrupt();
        assert_eq!(self.scheduler.take(), 1, "message interrupt did not schedule the worker");
        self.engine.drain().unwrap();
    }
}

/// Callback that records every reply it receives
pub fn recorder() -> (Arc<Mutex<Vec<Reply>>>, Callback) {
    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = replies.clone();
    let callback: Callback = Box::new(move |reply| sink.lock().unwrap().push(reply));
    (replies, callback)
}
