use std::cell::RefCell;
use std::rc::Rc;

use crate::input::layout::{BlockId, SwitchPosition, Aspect, GateState, Fault};
use crate::railway::driver::{TrainId, TrainLogger};
use crate::railway::registry::InfLogger;

#[derive(Debug, Clone, PartialEq)]
pub enum InfrastructureLogEvent {
    Cycle(u64),
    Occupied(BlockId, bool),
    Closed(BlockId, bool),
    Fault(BlockId, Fault),
    Position(BlockId, SwitchPosition),
    Aspect(BlockId, Aspect),
    Gate(BlockId, GateState),
    Rejected(BlockId, String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrainLogEvent {
    Placed(BlockId),
    Enter(BlockId),
    Renewal(f64),
    Exhausted(usize),
    Departed(BlockId), // next block is outside the partition
    Deactivated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Inf(InfrastructureLogEvent),
    Train(TrainId, TrainLogEvent),
}

#[derive(Debug, Default)]
pub struct History {
    pub events: Vec<LogEvent>,
}

/// Collects registry and train events into one shared history.
#[derive(Clone, Default)]
pub struct Recorder {
    history: Rc<RefCell<History>>,
}

impl Recorder {
    pub fn new() -> Recorder { Default::default() }

    pub fn inf_logger(&self) -> InfLogger {
        let h = self.history.clone();
        Box::new(move |e| h.borrow_mut().events.push(LogEvent::Inf(e)))
    }

    pub fn train_logger(&self) -> TrainLogger {
        let h = self.history.clone();
        Box::new(move |t, e| h.borrow_mut().events.push(LogEvent::Train(t, e)))
    }

    pub fn take(&self) -> History {
        self.history.replace(History::default())
    }
}

/// Print one train block visit per line on the following format:
/// `train cycle block`.
pub fn visits(h: &History) -> Result<String, failure::Error> {
    use std::fmt::Write;
    let mut s = String::new();
    let mut cycle = 0;
    for ev in &h.events {
        match *ev {
            LogEvent::Inf(InfrastructureLogEvent::Cycle(n)) => cycle = n,
            LogEvent::Train(train, TrainLogEvent::Placed(b))
                | LogEvent::Train(train, TrainLogEvent::Enter(b)) => {
                writeln!(s, "{} {} {}", train, cycle, b)?;
            }
            _ => {}
        }
    }
    Ok(s)
}
