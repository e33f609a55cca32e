//! Pre-commit safety checks.
//!
//! The validator looks only at sensor state (occupancy, closures, faults)
//! and the static topology. It never consults the program that made the
//! proposal, so a wrong program cannot argue its way past it.

use serde::{Serialize, Deserialize};

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::input::layout::{BlockId, Layout, SwitchPosition, Aspect, GateState};
use crate::surface::ExternalInputs;
use super::driver::{TrainId, TrainProgress};
use super::registry::{BlockRegistry, ProposedChange, Setting};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectiveActions {
    pub all_lights_red: bool,
    pub zero_speed: BTreeSet<TrainId>,
    pub protected_blocks: BTreeSet<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub safe: bool,
    pub reasons: Vec<String>,
    pub corrective_actions: CorrectiveActions,
}

impl Default for SafetyReport {
    fn default() -> SafetyReport {
        SafetyReport { safe: true, reasons: Vec::new(), corrective_actions: Default::default() }
    }
}

/// Outcome of one validation pass. `decisions[i]` belongs to proposal `i`.
#[derive(Debug)]
pub struct Verdict {
    pub decisions: Vec<Result<(), String>>,
    pub report: SafetyReport,
}

pub struct VitalValidator<'a> {
    layout: &'a Layout,
    lookahead: usize,
}

impl<'a> VitalValidator<'a> {
    pub fn new(layout: &'a Layout, lookahead: usize) -> VitalValidator<'a> {
        VitalValidator { layout, lookahead }
    }

    fn blocked(&self, block: BlockId, registry: &BlockRegistry, inputs: &ExternalInputs) -> bool {
        match registry.get(block) {
            Ok(b) => b.is_blocked(),
            Err(_) => inputs.is_blocked(block),
        }
    }

    fn occupied(&self, block: BlockId, registry: &BlockRegistry, inputs: &ExternalInputs) -> bool {
        match registry.get(block) {
            Ok(b) => b.occupied,
            Err(_) => inputs.is_occupied(block),
        }
    }

    pub fn check_switch(&self, block: BlockId, pos: SwitchPosition,
                        registry: &BlockRegistry, inputs: &ExternalInputs) -> Result<(), String> {
        let change = ProposedChange::new(block, Setting::Switch(pos));
        if !registry.differs(&change) {
            return Ok(());
        }
        let state = registry.get(block).map_err(|e| e.to_string())?;
        if state.is_blocked() {
            return Err(format!("switch block {} is occupied or closed", block));
        }
        let branch = self.layout.blocks.get(&block)
            .and_then(|b| b.branch(pos))
            .ok_or_else(|| format!("block {} has no branch {:?}", block, pos))?;

        // Breadth first, the branch itself is hop 1.
        let mut visited = HashSet::new();
        visited.insert(block);
        let mut frontier = vec![branch];
        for _hop in 0..self.lookahead {
            let mut next = Vec::new();
            for b in frontier {
                if !visited.insert(b) {
                    continue;
                }
                if self.blocked(b, registry, inputs) {
                    return Err(format!("block {} beyond switch {} is occupied or closed", b, block));
                }
                next.extend(self.layout.successors(b).into_iter().filter(|n| !visited.contains(n)));
            }
            frontier = next;
        }
        Ok(())
    }

    pub fn check_gate(&self, block: BlockId, state: GateState,
                      registry: &BlockRegistry, inputs: &ExternalInputs) -> Result<(), String> {
        if state == GateState::Closed {
            return Ok(());
        }
        let b = registry.get(block).map_err(|e| e.to_string())?;
        if b.fault.is_active() {
            return Err(format!("gate {} is faulted ({:?}) and held closed", block, b.fault));
        }
        let approach = self.layout.blocks.get(&block).and_then(|s| s.gate.as_ref());
        if let Some(approach) = approach {
            if let Some(a) = approach.iter().find(|a| self.occupied(**a, registry, inputs)) {
                return Err(format!("approach block {} of gate {} is occupied", a, block));
            }
        }
        Ok(())
    }

    pub fn check_light(&self, block: BlockId, aspect: Aspect,
                       registry: &BlockRegistry) -> Result<(), String> {
        if aspect.is_restrictive() {
            return Ok(());
        }
        if registry.get(block).map_err(|e| e.to_string())?.is_blocked() {
            return Err(format!("light {} cannot show {:?} over an occupied block", block, aspect));
        }
        Ok(())
    }

    fn check(&self, change: &ProposedChange, registry: &BlockRegistry,
             inputs: &ExternalInputs) -> Result<(), String> {
        let block = registry.get(change.block).map_err(|e| e.to_string())?;
        let attribute = change.setting.attribute();
        if !block.has(attribute) {
            return Err(format!("block {} has no {:?}", change.block, attribute));
        }
        match change.setting {
            Setting::Occupied(_) => Ok(()),
            Setting::Switch(p) => self.check_switch(change.block, p, registry, inputs),
            Setting::Light(a) => self.check_light(change.block, a, registry),
            Setting::Gate(g) => self.check_gate(change.block, g, registry, inputs),
        }
    }

    /// Checks every proposal of one cycle, and runs the system-level
    /// pass over the partition and the tracked trains.
    pub fn validate(&self, proposals: &[ProposedChange], registry: &BlockRegistry,
                    inputs: &ExternalInputs, trains: &BTreeMap<TrainId, TrainProgress>) -> Verdict {
        let mut report = SafetyReport::default();
        let actions = &mut report.corrective_actions;

        for b in registry.blocks().filter(|b| b.occupied && b.closed) {
            report.reasons.push(format!("block {} is occupied and closed", b.id));
            actions.protected_blocks.insert(b.id);
        }

        if inputs.emergency {
            report.reasons.push("emergency stop".to_string());
            actions.all_lights_red = true;
            actions.zero_speed.extend(trains.keys().cloned());
        }

        for (id, t) in trains {
            if t.commanded_authority <= 0.0 && t.commanded_speed > 0.0 {
                report.reasons.push(format!("train {} has speed {} without authority", id, t.commanded_speed));
                actions.zero_speed.insert(*id);
            }
        }

        let mut decisions = Vec::with_capacity(proposals.len());
        for change in proposals {
            let d = if actions.protected_blocks.contains(&change.block) {
                Err(format!("block {} is protected this cycle", change.block))
            } else {
                match change.setting {
                    Setting::Light(a) if actions.all_lights_red && a != Aspect::Red =>
                        Err(format!("light {} held red by emergency", change.block)),
                    _ => self.check(change, registry, inputs),
                }
            };
            if let Err(ref reason) = d {
                report.reasons.push(format!("{} rejected: {}", change, reason));
            }
            decisions.push(d);
        }

        report.safe = report.reasons.is_empty();
        Verdict { decisions, report }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Partition;
    use crate::get_layout_string;
    use crate::input::layout::Fault;
    use crate::surface::TrainCommand;
    use maplit::btreemap;

    fn layout() -> Layout {
        get_layout_string("
            block 1 { length 100 next [2] light }
            block 2 { length 50 switch [3, 6] }
            block 3 { length 100 next [4] }
            block 4 { length 100 next [5] }
            block 5 { length 100 next [9] }
            block 6 { length 100 next [7] }
            block 7 { length 100 next [8] }
            block 8 { length 10 next [9] gate [7, 9] }
            block 9 { length 100 }
        ").unwrap()
    }

    fn registry(layout: &Layout, occupied: &[BlockId]) -> (BlockRegistry, ExternalInputs) {
        let mut r = BlockRegistry::new(layout, Partition::new(1, 8));
        let mut inputs = ExternalInputs::default();
        inputs.occupancy = vec![false; 10];
        for b in occupied {
            inputs.occupancy[*b] = true;
        }
        r.ingest(&inputs);
        (r, inputs)
    }

    #[test]
    fn test_switch_lookahead() {
        let l = layout();
        let v = VitalValidator::new(&l, 3);
        let (r, i) = registry(&l, &[7]);
        assert!(v.check_switch(2, SwitchPosition::B, &r, &i).is_err());
        assert!(VitalValidator::new(&l, 1).check_switch(2, SwitchPosition::B, &r, &i).is_ok());

        let (r, i) = registry(&l, &[5]);
        assert!(v.check_switch(2, SwitchPosition::B, &r, &i).is_ok());
        // A is the committed position, so there is nothing to check
        assert!(v.check_switch(2, SwitchPosition::A, &r, &i).is_ok());

        // block 9 is outside the partition and four hops away
        let (r, i) = registry(&l, &[9]);
        assert!(v.check_switch(2, SwitchPosition::B, &r, &i).is_ok());
        assert!(VitalValidator::new(&l, 4).check_switch(2, SwitchPosition::B, &r, &i).is_err());
    }

    #[test]
    fn test_switch_block_occupied() {
        let l = layout();
        let v = VitalValidator::new(&l, 3);
        let (r, i) = registry(&l, &[2]);
        assert!(v.check_switch(2, SwitchPosition::B, &r, &i).is_err());

        let (mut r, mut i) = registry(&l, &[]);
        i.closed = vec![6];
        r.ingest(&i);
        assert!(v.check_switch(2, SwitchPosition::B, &r, &i).is_err());
    }

    #[test]
    fn test_light_and_gate() {
        let l = layout();
        let v = VitalValidator::new(&l, 3);
        let (r, i) = registry(&l, &[1, 7]);
        assert!(v.check_light(1, Aspect::Green, &r).is_err());
        assert!(v.check_light(1, Aspect::SuperGreen, &r).is_err());
        assert!(v.check_light(1, Aspect::Yellow, &r).is_ok());
        assert!(v.check_light(1, Aspect::Red, &r).is_ok());
        assert!(v.check_gate(8, GateState::Open, &r, &i).is_err());
        assert!(v.check_gate(8, GateState::Closed, &r, &i).is_ok());

        let (mut r, mut i) = registry(&l, &[]);
        assert!(v.check_light(1, Aspect::Green, &r).is_ok());
        assert!(v.check_gate(8, GateState::Open, &r, &i).is_ok());
        i.faults.insert(8, Fault::PowerFailure);
        i.faults.insert(1, Fault::CircuitFailure);
        r.ingest(&i);
        assert!(v.check_gate(8, GateState::Open, &r, &i).is_err());
        assert!(v.check_light(1, Aspect::Green, &r).is_err());
    }

    #[test]
    fn test_emergency_pass() {
        let l = layout();
        let v = VitalValidator::new(&l, 3);
        let (r, mut i) = registry(&l, &[]);
        i.emergency = true;
        let cmd = TrainCommand { suggested_speed: 20.0, suggested_authority: 500.0, active: true };
        let trains = btreemap!{ 4 => TrainProgress::new(0, 1, &cmd) };
        let proposals = vec![
            ProposedChange::new(1, Setting::Light(Aspect::Green)),
            ProposedChange::new(2, Setting::Switch(SwitchPosition::B)),
            ProposedChange::new(1, Setting::Light(Aspect::Red)),
        ];
        let verdict = v.validate(&proposals, &r, &i, &trains);
        assert!(verdict.decisions[0].is_err());
        assert!(verdict.decisions[1].is_ok());
        assert!(verdict.decisions[2].is_ok());
        assert!(!verdict.report.safe);
        assert!(verdict.report.corrective_actions.all_lights_red);
        assert!(verdict.report.corrective_actions.zero_speed.contains(&4));
    }

    #[test]
    fn test_protected_and_authority() {
        let l = layout();
        let v = VitalValidator::new(&l, 3);
        let (mut r, mut i) = registry(&l, &[2]);
        i.closed = vec![2];
        r.ingest(&i);
        let cmd = TrainCommand { suggested_speed: 5.0, suggested_authority: 0.0, active: true };
        let trains = btreemap!{ 1 => TrainProgress::new(0, 1, &cmd) };
        let verdict = v.validate(&[ProposedChange::new(2, Setting::Switch(SwitchPosition::A))], &r, &i, &trains);
        assert!(verdict.decisions[0].is_err());
        let actions = &verdict.report.corrective_actions;
        assert_eq!(actions.protected_blocks.iter().cloned().collect::<Vec<_>>(), vec![2]);
        assert!(actions.zero_speed.contains(&1));
        assert!(!actions.all_lights_red);

        let (r, i) = registry(&l, &[]);
        let verdict = v.validate(&[ProposedChange::new(1, Setting::Light(Aspect::Green))], &r, &i, &BTreeMap::new());
        assert!(verdict.report.safe);
        assert_eq!(verdict.decisions, vec![Ok(())]);
    }
}
