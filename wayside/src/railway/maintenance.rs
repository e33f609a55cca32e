//! Operator requests, queued for the control cycle.

use serde::{Serialize, Deserialize};

use std::sync::mpsc::{channel, Receiver, Sender};

use crate::input::layout::{BlockId, SwitchPosition, Aspect, GateState};
use crate::plc::Program;
use super::registry::{ProposedChange, Setting};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Normal,
    Maintenance,
}

#[derive(Debug)]
pub enum Request {
    Enter,
    Exit,
    Propose(ProposedChange),
    Upload(Program),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Accepted,
    Rejected(String),
}

impl Reply {
    pub fn is_accepted(&self) -> bool { *self == Reply::Accepted }
}

#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub reply: Sender<Reply>,
}

impl Envelope {
    /// The operator may have stopped listening; that is not an error.
    pub fn answer(&self, reply: Reply) {
        let _ = self.reply.send(reply);
    }
}

/// Sending side of the maintenance queue. Cheap to clone and `Send`, so
/// an operator console can run on its own thread.
#[derive(Clone)]
pub struct MaintenanceHandle {
    tx: Sender<Envelope>,
}

impl MaintenanceHandle {
    fn send(&self, request: Request) -> Receiver<Reply> {
        let (reply, rx) = channel();
        let envelope = Envelope { request, reply };
        if let Err(e) = self.tx.send(envelope) {
            e.0.answer(Reply::Rejected("controller stopped".to_string()));
        }
        rx
    }

    pub fn enter(&self) -> Receiver<Reply> { self.send(Request::Enter) }
    pub fn exit(&self) -> Receiver<Reply> { self.send(Request::Exit) }

    pub fn propose_switch(&self, block: BlockId, pos: SwitchPosition) -> Receiver<Reply> {
        self.send(Request::Propose(ProposedChange::new(block, Setting::Switch(pos))))
    }

    pub fn propose_light(&self, block: BlockId, aspect: Aspect) -> Receiver<Reply> {
        self.send(Request::Propose(ProposedChange::new(block, Setting::Light(aspect))))
    }

    pub fn propose_gate(&self, block: BlockId, state: GateState) -> Receiver<Reply> {
        self.send(Request::Propose(ProposedChange::new(block, Setting::Gate(state))))
    }

    pub fn upload_program(&self, program: Program) -> Receiver<Reply> {
        self.send(Request::Upload(program))
    }
}

pub fn queue() -> (MaintenanceHandle, Receiver<Envelope>) {
    let (tx, rx) = channel();
    (MaintenanceHandle { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_order() {
        let (handle, rx) = queue();
        let r1 = handle.enter();
        let r2 = handle.propose_gate(4, GateState::Open);
        let requests: Vec<Envelope> = rx.try_iter().collect();
        assert_eq!(requests.len(), 2);
        match requests[1].request {
            Request::Propose(c) => assert_eq!(c, ProposedChange::new(4, Setting::Gate(GateState::Open))),
            ref x => panic!("unexpected request {:?}", x),
        }
        requests[0].answer(Reply::Accepted);
        requests[1].answer(Reply::Rejected("no".to_string()));
        assert!(r1.recv().unwrap().is_accepted());
        assert_eq!(r2.recv().unwrap(), Reply::Rejected("no".to_string()));
    }

    #[test]
    fn test_stopped_controller() {
        let (handle, rx) = queue();
        drop(rx);
        assert_eq!(handle.exit().recv().unwrap(), Reply::Rejected("controller stopped".to_string()));
    }
}
