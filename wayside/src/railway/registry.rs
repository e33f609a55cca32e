use serde::{Serialize, Deserialize};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::Partition;
use crate::error::EngineError;
use crate::input::layout::*;
use crate::output::history::InfrastructureLogEvent;
use crate::surface::ExternalInputs;

pub type InfLogger = Box<dyn Fn(InfrastructureLogEvent)>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Attribute {
    Occupancy,
    Switch,
    Light,
    Gate,
}

/// New value for one block attribute.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Setting {
    Occupied(bool),
    Switch(SwitchPosition),
    Light(Aspect),
    Gate(GateState),
}

impl Setting {
    pub fn attribute(&self) -> Attribute {
        match *self {
            Setting::Occupied(_) => Attribute::Occupancy,
            Setting::Switch(_) => Attribute::Switch,
            Setting::Light(_) => Attribute::Light,
            Setting::Gate(_) => Attribute::Gate,
        }
    }
}

/// A change waiting for the vital layer. Nothing reaches the registry
/// in any other shape.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProposedChange {
    pub block: BlockId,
    pub setting: Setting,
}

impl ProposedChange {
    pub fn new(block: BlockId, setting: Setting) -> ProposedChange {
        ProposedChange { block, setting }
    }
}

impl fmt::Display for ProposedChange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.setting {
            Setting::Occupied(x) => write!(f, "block {} occupied={}", self.block, x),
            Setting::Switch(p) => write!(f, "switch {} -> {:?}", self.block, p),
            Setting::Light(a) => write!(f, "light {} -> {:?}", self.block, a),
            Setting::Gate(g) => write!(f, "gate {} -> {:?}", self.block, g),
        }
    }
}

/// Committed state of one managed block. A capability the block lacks is
/// `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub occupied: bool,
    pub closed: bool,
    pub switch: Option<SwitchPosition>,
    pub light: Option<Aspect>,
    pub gate: Option<GateState>,
    pub fault: Fault,
}

impl Block {
    fn from_static(id: BlockId, s: &StaticBlock) -> Block {
        Block {
            id,
            occupied: false,
            closed: false,
            switch: s.switch.map(|_| SwitchPosition::A),
            light: if s.light { Some(Aspect::Red) } else { None },
            gate: s.gate.as_ref().map(|_| GateState::Closed),
            fault: Fault::None,
        }
    }

    pub fn has(&self, attribute: Attribute) -> bool {
        match attribute {
            Attribute::Occupancy => true,
            Attribute::Switch => self.switch.is_some(),
            Attribute::Light => self.light.is_some(),
            Attribute::Gate => self.gate.is_some(),
        }
    }

    pub fn current(&self, attribute: Attribute) -> Option<Setting> {
        match attribute {
            Attribute::Occupancy => Some(Setting::Occupied(self.occupied)),
            Attribute::Switch => self.switch.map(Setting::Switch),
            Attribute::Light => self.light.map(Setting::Light),
            Attribute::Gate => self.gate.map(Setting::Gate),
        }
    }

    /// Occupied, closed, or reporting a fault.
    pub fn is_blocked(&self) -> bool {
        self.occupied || self.closed || self.fault.is_active()
    }
}

/// Canonical state of the blocks in one controller's partition.
pub struct BlockRegistry {
    partition: Partition,
    blocks: BTreeMap<BlockId, Block>,
    logger: InfLogger,
}

impl fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BlockRegistry {{ partition: {:?}, blocks: {:?} }}", self.partition, self.blocks)
    }
}

impl BlockRegistry {
    pub fn new(layout: &Layout, partition: Partition) -> BlockRegistry {
        let blocks = layout.blocks.iter()
            .filter(|&(id, _)| partition.contains(*id))
            .map(|(id, s)| (*id, Block::from_static(*id, s)))
            .collect();
        BlockRegistry {
            partition,
            blocks,
            logger: Box::new(|_| {}),
        }
    }

    pub fn set_logger(&mut self, logger: InfLogger) {
        self.logger = logger;
    }

    pub fn log(&self, event: InfrastructureLogEvent) {
        (self.logger)(event);
    }

    pub fn partition(&self) -> Partition { self.partition }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    pub fn get(&self, id: BlockId) -> Result<&Block, EngineError> {
        self.blocks.get(&id).ok_or(EngineError::UnknownBlock(id))
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Occupied block ids, copied so that evaluation in a cycle sees one
    /// consistent picture.
    pub fn occupancy(&self) -> BTreeSet<BlockId> {
        self.blocks.values().filter(|b| b.occupied).map(|b| b.id).collect()
    }

    /// Is `change` different from what is committed?
    pub fn differs(&self, change: &ProposedChange) -> bool {
        match self.blocks.get(&change.block) {
            Some(b) => b.current(change.setting.attribute()) != Some(change.setting),
            None => true,
        }
    }

    /// Commits one attribute. Returns whether the committed value changed.
    pub fn apply(&mut self, change: &ProposedChange) -> Result<bool, EngineError> {
        let block = self.blocks.get_mut(&change.block).ok_or(EngineError::UnknownBlock(change.block))?;
        let attribute = change.setting.attribute();
        if !block.has(attribute) {
            return Err(EngineError::CapabilityMismatch { block: change.block, attribute });
        }
        if block.current(attribute) == Some(change.setting) {
            return Ok(false);
        }
        let id = change.block;
        let event = match change.setting {
            Setting::Occupied(x) => { block.occupied = x; InfrastructureLogEvent::Occupied(id, x) }
            Setting::Switch(p) => { block.switch = Some(p); InfrastructureLogEvent::Position(id, p) }
            Setting::Light(a) => { block.light = Some(a); InfrastructureLogEvent::Aspect(id, a) }
            Setting::Gate(g) => { block.gate = Some(g); InfrastructureLogEvent::Gate(id, g) }
        };
        (self.logger)(event);
        Ok(true)
    }

    /// Copies sensor state for managed blocks from the external inputs.
    pub fn ingest(&mut self, inputs: &ExternalInputs) {
        for block in self.blocks.values_mut() {
            let occupied = inputs.is_occupied(block.id);
            if occupied != block.occupied {
                block.occupied = occupied;
                (self.logger)(InfrastructureLogEvent::Occupied(block.id, occupied));
            }
            let closed = inputs.is_closed(block.id);
            if closed != block.closed {
                block.closed = closed;
                (self.logger)(InfrastructureLogEvent::Closed(block.id, closed));
            }
            let fault = inputs.fault(block.id);
            if fault != block.fault {
                block.fault = fault;
                (self.logger)(InfrastructureLogEvent::Fault(block.id, fault));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::get_layout_string;

    fn registry() -> BlockRegistry {
        let layout = get_layout_string("
            block 1 { length 100 next [2] light }
            block 2 { length 100 switch [3, 4] }
            block 3 { length 100 gate [2] }
            block 4 { length 100 }
        ").unwrap();
        BlockRegistry::new(&layout, Partition::new(1, 3))
    }

    #[test]
    fn test_capabilities() {
        let r = registry();
        assert!(r.get(4).is_err());
        let b1 = r.get(1).unwrap();
        assert_eq!(b1.light, Some(Aspect::Red));
        assert_eq!(b1.switch, None);
        assert_eq!(b1.gate, None);
        assert_eq!(r.get(2).unwrap().switch, Some(SwitchPosition::A));
        assert_eq!(r.get(3).unwrap().gate, Some(GateState::Closed));
    }

    #[test]
    fn test_apply() {
        let mut r = registry();
        let c = ProposedChange::new(2, Setting::Switch(SwitchPosition::B));
        assert!(r.differs(&c));
        assert_eq!(r.apply(&c).unwrap(), true);
        assert!(!r.differs(&c));
        assert_eq!(r.apply(&c).unwrap(), false);

        match r.apply(&ProposedChange::new(1, Setting::Switch(SwitchPosition::B))) {
            Err(EngineError::CapabilityMismatch { block: 1, attribute: Attribute::Switch }) => {},
            x => panic!("expected capability mismatch, got {:?}", x),
        }
        match r.apply(&ProposedChange::new(4, Setting::Occupied(true))) {
            Err(EngineError::UnknownBlock(4)) => {},
            x => panic!("expected unknown block, got {:?}", x),
        }
        assert_eq!(r.get(1).unwrap().switch, None);
    }

    #[test]
    fn test_ingest() {
        let mut r = registry();
        let mut inputs = ExternalInputs::default();
        inputs.occupancy = vec![false, true, false, true, true];
        inputs.closed = vec![3];
        inputs.faults.insert(2, Fault::CircuitFailure);
        r.ingest(&inputs);
        assert!(r.get(1).unwrap().occupied);
        assert!(r.get(3).unwrap().occupied && r.get(3).unwrap().closed);
        assert!(r.get(2).unwrap().is_blocked());
        assert_eq!(r.occupancy().into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }
}
