use log::{debug, info, warn};

use std::collections::{BTreeMap, BTreeSet};

use crate::config::AuthorityModel;
use crate::error::EngineError;
use crate::input::layout::{BlockId, Route};
use crate::output::history::TrainLogEvent;
use crate::surface::TrainCommand;
use super::registry::{BlockRegistry, ProposedChange, Setting};

pub type TrainId = usize;
pub type TrainLogger = Box<dyn Fn(TrainId, TrainLogEvent)>;

const EPS: f64 = 1e-6;

/// Position of one train, kept in terms of consumed authority.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainProgress {
    pub route_index: usize,
    /// Authority at the last renewal, less the lengths of blocks passed
    /// since then.
    pub authority_baseline: f64,
    /// Distance into the current block that was consumed before the last
    /// renewal.
    pub offset: f64,
    pub commanded_speed: f64,
    pub commanded_authority: f64,
    pub current_block: BlockId,
    /// False once the train has reached the end of its route.
    pub active: bool,
    observed_authority: f64,
    /// Authority was set from outside this cycle, so nothing is integrated.
    renewed: bool,
}

impl TrainProgress {
    pub fn new(route_index: usize, block: BlockId, cmd: &TrainCommand) -> TrainProgress {
        TrainProgress {
            route_index,
            authority_baseline: cmd.suggested_authority,
            offset: 0.0,
            commanded_speed: cmd.suggested_speed,
            commanded_authority: cmd.suggested_authority,
            current_block: block,
            active: true,
            observed_authority: cmd.suggested_authority,
            renewed: true,
        }
    }

    /// Distance traveled since the baseline was recorded.
    pub fn traveled(&self) -> f64 {
        (self.authority_baseline - self.commanded_authority).max(0.0)
    }

    fn renew(&mut self, authority: f64) {
        self.offset += self.traveled();
        self.authority_baseline = authority;
        self.commanded_authority = authority;
        self.renewed = true;
    }
}

/// Moves trains along the controller's route.
pub struct Simulator {
    route: Route,
    model: AuthorityModel,
    tick_secs: f64,
    trains: BTreeMap<TrainId, TrainProgress>,
    /// Trains that left the partition and are still listed by dispatch.
    departed: BTreeSet<TrainId>,
    logger: TrainLogger,
}

impl Simulator {
    pub fn new(route: Route, model: AuthorityModel, tick_secs: f64) -> Simulator {
        Simulator {
            route,
            model,
            tick_secs,
            trains: BTreeMap::new(),
            departed: BTreeSet::new(),
            logger: Box::new(|_, _| {}),
        }
    }

    pub fn set_logger(&mut self, logger: TrainLogger) {
        self.logger = logger;
    }

    pub fn route(&self) -> &Route { &self.route }

    pub fn trains(&self) -> &BTreeMap<TrainId, TrainProgress> { &self.trains }

    pub fn train(&self, id: TrainId) -> Option<&TrainProgress> { self.trains.get(&id) }

    pub fn has_departed(&self, id: TrainId) -> bool { self.departed.contains(&id) }

    pub fn insert(&mut self, id: TrainId, progress: TrainProgress) {
        self.trains.insert(id, progress);
    }

    pub fn zero_speed(&mut self, id: TrainId) {
        if let Some(t) = self.trains.get_mut(&id) {
            t.commanded_speed = 0.0;
        }
    }

    fn held(&self, except: Option<TrainId>) -> Vec<BlockId> {
        self.trains.iter()
            .filter(|&(id, _)| Some(*id) != except)
            .map(|(_, t)| t.current_block)
            .collect()
    }

    /// Takes this cycle's dispatch commands: drops trains that are no
    /// longer active, places new ones, and updates speed and authority.
    pub fn update_commands(&mut self, commands: &BTreeMap<TrainId, TrainCommand>, registry: &mut BlockRegistry) {
        let gone: Vec<TrainId> = self.trains.keys()
            .filter(|id| !commands.get(id).map(|c| c.active).unwrap_or(false))
            .cloned().collect();
        for id in gone {
            self.trains.remove(&id);
            info!("train {} deactivated", id);
            (self.logger)(id, TrainLogEvent::Deactivated);
        }
        self.departed.retain(|id| commands.get(id).map(|c| c.active).unwrap_or(false));

        for (&id, cmd) in commands.iter().filter(|&(_, c)| c.active) {
            if self.departed.contains(&id) {
                continue;
            }
            let model = self.model;
            if let Some(t) = self.trains.get_mut(&id) {
                t.commanded_speed = cmd.suggested_speed;
                let authority = cmd.suggested_authority;
                match model {
                    AuthorityModel::External => {
                        if authority > t.observed_authority + EPS {
                            t.renew(authority);
                            (self.logger)(id, TrainLogEvent::Renewal(authority));
                        } else {
                            t.commanded_authority = authority;
                        }
                    }
                    AuthorityModel::Integrated => {
                        // decay happens in `advance`, after corrective actions
                        if (authority - t.observed_authority).abs() > EPS {
                            t.renew(authority);
                            (self.logger)(id, TrainLogEvent::Renewal(authority));
                        }
                    }
                }
                t.observed_authority = authority;
                continue;
            }

            if let Some(idx) = self.placement(registry) {
                let block = self.route.blocks[idx];
                info!("train {} placed at block {} (route position {})", id, block, idx);
                self.trains.insert(id, TrainProgress::new(idx, block, cmd));
                (self.logger)(id, TrainLogEvent::Placed(block));
            } else {
                debug!("train {} waiting for occupancy in partition", id);
            }
        }

        // Blocks holding a tracked train stay occupied whatever the
        // detection input said.
        for t in self.trains.values() {
            occupy(registry, t.current_block, true);
        }
    }

    /// Route position for a train that has none yet.
    fn placement(&self, registry: &BlockRegistry) -> Option<usize> {
        let held = self.held(None);
        let free = |b: &BlockId| registry.contains(*b) && !held.contains(b);
        let reported = self.route.blocks.iter().position(|b| {
            free(b) && registry.get(*b).map(|x| x.occupied).unwrap_or(false)
        });
        if reported.is_some() {
            return reported;
        }
        self.route.blocks.iter().position(|b| free(b))
    }

    /// Converts consumed authority into block transitions. Returns the
    /// blocks entered this cycle. Under the integrated model, authority
    /// is first decayed by the speed left after any corrective action.
    pub fn advance(&mut self, registry: &mut BlockRegistry) -> Vec<(TrainId, BlockId)> {
        let mut moves = Vec::new();
        let ids: Vec<TrainId> = self.trains.keys().cloned().collect();
        for id in ids {
            let mut t = match self.trains.remove(&id) {
                Some(t) => t,
                None => continue,
            };
            if self.model == AuthorityModel::Integrated && !t.renewed {
                t.commanded_authority = (t.commanded_authority - t.commanded_speed * self.tick_secs).max(0.0);
            }
            t.renewed = false;
            if self.advance_train(id, &mut t, registry, &mut moves) {
                self.departed.insert(id);
            } else {
                self.trains.insert(id, t);
            }
        }
        moves
    }

    fn advance_train(&mut self, id: TrainId, t: &mut TrainProgress, registry: &mut BlockRegistry,
                     moves: &mut Vec<(TrainId, BlockId)>) -> bool {
        if !t.active {
            return false;
        }
        let mut traveled = t.traveled();
        loop {
            let length = match self.route.block_length(t.route_index) {
                Some(l) => l,
                None => {
                    warn!("{}", EngineError::RouteExhausted { train: id, index: t.route_index });
                    t.active = false;
                    (self.logger)(id, TrainLogEvent::Exhausted(t.route_index));
                    return false;
                }
            };
            let remaining = (length - t.offset).max(0.0);
            if traveled < remaining {
                return false;
            }
            if t.route_index + 1 >= self.route.len() {
                warn!("{}", EngineError::RouteExhausted { train: id, index: t.route_index });
                t.active = false;
                (self.logger)(id, TrainLogEvent::Exhausted(t.route_index));
                return false;
            }

            traveled -= remaining;
            t.authority_baseline -= remaining;
            t.offset = 0.0;
            t.route_index += 1;

            let old = t.current_block;
            let next = self.route.blocks[t.route_index];
            if old != next && !self.held(Some(id)).contains(&old) {
                occupy(registry, old, false);
            }
            if !registry.contains(next) {
                info!("train {} left the partition towards block {}", id, next);
                (self.logger)(id, TrainLogEvent::Departed(next));
                return true;
            }
            occupy(registry, next, true);
            t.current_block = next;
            moves.push((id, next));
            (self.logger)(id, TrainLogEvent::Enter(next));
        }
    }
}

fn occupy(registry: &mut BlockRegistry, block: BlockId, occupied: bool) {
    if let Err(e) = registry.apply(&ProposedChange::new(block, Setting::Occupied(occupied))) {
        warn!("occupancy update failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Partition;
    use crate::get_layout_string;
    use maplit::btreemap;

    fn setup(partition: Partition) -> (BlockRegistry, Simulator) {
        let layout = get_layout_string("
            block 1 { length 100 next [2] }
            block 2 { length 150 next [3] }
            block 3 { length 150 next [4] }
            block 4 { length 100 }
            route abc { blocks [1, 2, 3] }
            route long { blocks [1, 2, 3, 4] }
        ").unwrap();
        let registry = BlockRegistry::new(&layout, partition);
        let sim = Simulator::new(layout.route("abc").unwrap().clone(), AuthorityModel::External, 0.25);
        (registry, sim)
    }

    fn cmd(authority: f64) -> BTreeMap<TrainId, TrainCommand> {
        btreemap!{ 7 => TrainCommand { suggested_speed: 10.0, suggested_authority: authority, active: true } }
    }

    #[test]
    fn test_multi_block_advance() {
        let (mut reg, mut sim) = setup(Partition::new(1, 4));
        sim.update_commands(&cmd(400.0), &mut reg);
        assert_eq!(sim.train(7).unwrap().route_index, 0);
        assert!(reg.get(1).unwrap().occupied);

        sim.update_commands(&cmd(150.0), &mut reg);
        assert_eq!(sim.train(7).unwrap().traveled(), 250.0);
        let moves = sim.advance(&mut reg);
        assert_eq!(moves, vec![(7, 2), (7, 3)]);

        let t = sim.train(7).unwrap();
        assert_eq!(t.route_index, 2);
        assert_eq!(t.current_block, 3);
        assert_eq!(t.traveled(), 0.0);
        assert!(!reg.get(1).unwrap().occupied);
        assert!(!reg.get(2).unwrap().occupied);
        assert!(reg.get(3).unwrap().occupied);
    }

    #[test]
    fn test_decreasing_authority_is_monotone() {
        let (mut reg, mut sim) = setup(Partition::new(1, 4));
        let mut last = 0;
        let mut a = 420.0;
        sim.update_commands(&cmd(a), &mut reg);
        while a > 0.0 {
            a -= 37.0;
            sim.update_commands(&cmd(a), &mut reg);
            sim.advance(&mut reg);
            let idx = sim.train(7).unwrap().route_index;
            assert!(idx >= last);
            last = idx;
        }
        assert_eq!(last, 2);
        assert!(!sim.train(7).unwrap().active);
    }

    #[test]
    fn test_renewal_is_not_travel() {
        let (mut reg, mut sim) = setup(Partition::new(1, 4));
        sim.update_commands(&cmd(400.0), &mut reg);
        sim.update_commands(&cmd(340.0), &mut reg);
        sim.advance(&mut reg);
        assert_eq!(sim.train(7).unwrap().route_index, 0);

        sim.update_commands(&cmd(1000.0), &mut reg);
        let t = sim.train(7).unwrap();
        assert_eq!(t.authority_baseline, 1000.0);
        assert_eq!(t.traveled(), 0.0);
        assert_eq!(t.offset, 60.0);
        assert!(sim.advance(&mut reg).is_empty());

        // 40 m left of block 1 after the renewal
        sim.update_commands(&cmd(960.0), &mut reg);
        assert_eq!(sim.advance(&mut reg), vec![(7, 2)]);
    }

    #[test]
    fn test_leaving_partition() {
        let (mut reg, mut sim) = setup(Partition::new(1, 2));
        sim.update_commands(&cmd(400.0), &mut reg);
        sim.update_commands(&cmd(100.0), &mut reg);
        assert_eq!(sim.advance(&mut reg), vec![(7, 2)]);
        assert!(sim.train(7).is_none());
        assert!(sim.has_departed(7));
        assert!(!reg.get(1).unwrap().occupied);
        assert!(!reg.get(2).unwrap().occupied);

        // still listed by dispatch, but it is somebody else's train now
        sim.update_commands(&cmd(90.0), &mut reg);
        assert!(sim.train(7).is_none());
        assert!(!reg.get(1).unwrap().occupied);

        // a new trip once dispatch has let go of it
        sim.update_commands(&BTreeMap::new(), &mut reg);
        assert!(!sim.has_departed(7));
        sim.update_commands(&cmd(400.0), &mut reg);
        assert_eq!(sim.train(7).unwrap().route_index, 0);
    }

    #[test]
    fn test_placement() {
        // route starts outside the partition and nothing is occupied
        let (mut reg, mut sim) = setup(Partition::new(2, 4));
        sim.update_commands(&cmd(400.0), &mut reg);
        assert_eq!(sim.train(7).unwrap().route_index, 1);
        assert_eq!(sim.train(7).unwrap().current_block, 2);

        sim.update_commands(&BTreeMap::new(), &mut reg);
        assert!(sim.train(7).is_none());

        // a reported occupancy wins over the first position in the partition
        let mut inputs = crate::surface::ExternalInputs::default();
        inputs.occupancy = vec![false, false, false, true];
        reg.ingest(&inputs);
        sim.update_commands(&cmd(400.0), &mut reg);
        assert_eq!(sim.train(7).unwrap().route_index, 2);

        // no route position inside the partition
        let (mut reg, mut sim) = setup(Partition::new(4, 4));
        sim.update_commands(&cmd(400.0), &mut reg);
        assert!(sim.train(7).is_none());
    }

    #[test]
    fn test_integrated_decay() {
        let (mut reg, _) = setup(Partition::new(1, 4));
        let mut sim = Simulator::new(Route::new(vec![1, 2], vec![100.0, 250.0]).unwrap(),
                                     AuthorityModel::Integrated, 1.0);
        let c = btreemap!{ 1 => TrainCommand { suggested_speed: 40.0, suggested_authority: 500.0, active: true } };
        sim.update_commands(&c, &mut reg);
        assert!(sim.advance(&mut reg).is_empty());
        assert_eq!(sim.train(1).unwrap().commanded_authority, 500.0);

        sim.update_commands(&c, &mut reg);
        assert!(sim.advance(&mut reg).is_empty());
        sim.update_commands(&c, &mut reg);
        assert!(sim.advance(&mut reg).is_empty());
        assert_eq!(sim.train(1).unwrap().commanded_authority, 420.0);

        // a zeroed speed holds the train where it is
        sim.update_commands(&c, &mut reg);
        sim.zero_speed(1);
        assert!(sim.advance(&mut reg).is_empty());
        assert_eq!(sim.train(1).unwrap().commanded_authority, 420.0);

        sim.update_commands(&c, &mut reg);
        assert_eq!(sim.advance(&mut reg), vec![(1, 2)]);
    }
}
