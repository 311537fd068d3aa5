//! Deterministic stand-ins for time and the data-ready event.
//!
//! These let worker and connection tests drive idle timeouts and signals step
//! by step instead of sleeping.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::connection::{Clock, DataReadyEvent, WaitResult};
use crate::simulation::{MemoryBuilder, SimulatedProducer};
use crate::{DataVariableHeader, Result, TelemetryError, VariableType};

/// Clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Clock frozen at the current instant.
    pub fn new() -> Self {
        Self { now: Arc::new(Mutex::new(Instant::now())) }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// One scripted outcome of [`ScriptedEvent::wait`].
pub enum ScriptedStep {
    Signal,
    Timeout,
    /// Moves the clock forward, then times out.
    Advance(ManualClock, Duration),
    /// Runs the closure, then times out.
    Run(Box<dyn FnOnce() + Send>),
    Fail,
}

/// Data-ready event that replays a fixed script and then always times out.
pub struct ScriptedEvent {
    steps: VecDeque<ScriptedStep>,
}

impl ScriptedEvent {
    /// Event that plays `steps` in order.
    pub fn new(steps: impl IntoIterator<Item = ScriptedStep>) -> Self {
        Self { steps: steps.into_iter().collect() }
    }

    /// Steps not yet played.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl DataReadyEvent for ScriptedEvent {
    fn wait(&mut self, _timeout: Duration) -> Result<WaitResult> {
        match self.steps.pop_front() {
            Some(ScriptedStep::Signal) => Ok(WaitResult::Signaled),
            Some(ScriptedStep::Advance(clock, by)) => {
                clock.advance(by);
                Ok(WaitResult::Timeout)
            }
            Some(ScriptedStep::Run(action)) => {
                action();
                Ok(WaitResult::Timeout)
            }
            Some(ScriptedStep::Fail) => Err(TelemetryError::connection_failed("scripted failure")),
            Some(ScriptedStep::Timeout) | None => Ok(WaitResult::Timeout),
        }
    }
}

/// A variable header for tests.
pub fn variable(
    name: &str,
    variable_type: VariableType,
    offset: i32,
    count: i32,
) -> DataVariableHeader {
    DataVariableHeader {
        type_tag: variable_type.tag(),
        offset,
        count,
        count_as_time: false,
        name: name.to_string(),
        description: format!("{} for tests", name),
        unit: String::new(),
    }
}

/// A running producer with a small, realistic variable table.
pub fn running_producer(buffer_len: usize) -> Result<Arc<SimulatedProducer>> {
    let builder = MemoryBuilder::new()
        .with_buffer_len(buffer_len)
        .with_variable(variable("SessionTick", VariableType::Int32, 0, 1))
        .with_variable(variable("Speed", VariableType::Float32, 4, 1));
    let producer = SimulatedProducer::new(&builder)?;
    producer.start()?;
    Ok(producer)
}
