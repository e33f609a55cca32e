use log::{debug, info, warn};

use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Instant;

use crate::AppResult;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::input::layout::{BlockId, Layout, Aspect};
use crate::output::history::{InfrastructureLogEvent, Recorder};
use crate::plc::Program;
use crate::surface::{StateSurface, ExternalInputs, Outputs, TrainStatus};
use super::driver::{Simulator, TrainId};
use super::maintenance::{self, Envelope, MaintenanceHandle, Mode, Reply, Request};
use super::registry::{BlockRegistry, ProposedChange, Setting};
use super::vital::{SafetyReport, VitalValidator};

/// Summary of one scan cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub mode: Mode,
    /// The inputs could not be read and the previous snapshot was used.
    pub stale: bool,
    pub safety: SafetyReport,
    pub moves: Vec<(TrainId, BlockId)>,
}

/// The scan-cycle loop for one partition.
pub struct Controller<S: StateSurface> {
    config: EngineConfig,
    layout: Layout,
    program: Program,
    registry: BlockRegistry,
    sim: Simulator,
    mode: Mode,
    surface: S,
    handle: MaintenanceHandle,
    requests: Receiver<Envelope>,
    last_inputs: Option<ExternalInputs>,
    cycle: u64,
}

impl<S: StateSurface> Controller<S> {
    pub fn new(config: EngineConfig, layout: Layout, program: Program, surface: S) -> AppResult<Controller<S>> {
        let route = layout.route(&config.route)
            .ok_or_else(|| failure::err_msg(format!("layout has no route named {:?}", config.route)))?
            .clone();
        let registry = BlockRegistry::new(&layout, config.partition);
        if !route.blocks.iter().any(|b| registry.contains(*b)) {
            warn!("route {:?} never enters partition {:?}", config.route, config.partition);
        }
        program.validate(&registry)?;
        let sim = Simulator::new(route, config.authority_model, config.tick.as_secs_f64());
        let (handle, requests) = maintenance::queue();
        info!("controller for blocks {}-{} running program {}", config.partition.first, config.partition.last,
              program.name.as_ref().map(|x| x.as_str()).unwrap_or("(unnamed)"));
        Ok(Controller {
            config,
            layout,
            program,
            registry,
            sim,
            mode: Mode::Normal,
            surface,
            handle,
            requests,
            last_inputs: None,
            cycle: 0,
        })
    }

    /// Send registry and train events to `recorder`.
    pub fn record_into(&mut self, recorder: &Recorder) {
        self.registry.set_logger(recorder.inf_logger());
        self.sim.set_logger(recorder.train_logger());
    }

    pub fn handle(&self) -> MaintenanceHandle { self.handle.clone() }
    pub fn mode(&self) -> Mode { self.mode }
    pub fn program(&self) -> &Program { &self.program }
    pub fn registry(&self) -> &BlockRegistry { &self.registry }
    pub fn simulator(&self) -> &Simulator { &self.sim }
    pub fn surface(&self) -> &S { &self.surface }
    pub fn surface_mut(&mut self) -> &mut S { &mut self.surface }

    /// Handles queued operator requests. Returns the change proposals
    /// that still need the validator, with their envelopes.
    fn drain_requests(&mut self) -> Vec<(ProposedChange, Envelope)> {
        let mut pending = Vec::new();
        let envelopes: Vec<Envelope> = self.requests.try_iter().collect();
        for env in envelopes {
            match env.request {
                Request::Enter => {
                    if self.mode != Mode::Maintenance {
                        info!("entering maintenance mode");
                    }
                    self.mode = Mode::Maintenance;
                    env.answer(Reply::Accepted);
                }
                Request::Exit => {
                    if self.mode != Mode::Normal {
                        info!("leaving maintenance mode");
                    }
                    self.mode = Mode::Normal;
                    env.answer(Reply::Accepted);
                }
                _ if self.mode != Mode::Maintenance => {
                    env.answer(Reply::Rejected("not in maintenance".to_string()));
                }
                Request::Propose(change) => pending.push((change, env)),
                Request::Upload(ref program) => {
                    match program.validate(&self.registry) {
                        Ok(()) => {
                            info!("activating program {:?}", program.name);
                            self.program = program.clone();
                            env.answer(Reply::Accepted);
                        }
                        Err(e) => {
                            warn!("upload refused: {}", e);
                            env.answer(Reply::Rejected(e.to_string()));
                        }
                    }
                }
            }
        }
        pending
    }

    fn read_inputs(&mut self) -> (ExternalInputs, bool) {
        let retry = self.config.retry.clone();
        let surface = &mut self.surface;
        match retry.run(|_| surface.read_inputs()) {
            Ok(inputs) => {
                self.last_inputs = Some(inputs.clone());
                (inputs, false)
            }
            Err(e) => {
                warn!("{}", EngineError::StaleInput(e.to_string()));
                (self.last_inputs.clone().unwrap_or_default(), true)
            }
        }
    }

    /// Runs one scan: requests, inputs, proposals, validation, commit,
    /// corrective actions, train movement, publish.
    pub fn cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        self.registry.log(InfrastructureLogEvent::Cycle(self.cycle));

        let operator = self.drain_requests();
        let (inputs, stale) = self.read_inputs();
        self.registry.ingest(&inputs);
        self.sim.update_commands(&inputs.trains, &mut self.registry);

        let (proposals, envelopes): (Vec<ProposedChange>, Vec<Option<Envelope>>) = match self.mode {
            Mode::Normal => {
                // proposals queued before an exit in the same batch
                for (_, env) in operator {
                    env.answer(Reply::Rejected("not in maintenance".to_string()));
                }
                self.program.evaluate(&self.registry.occupancy()).into_iter()
                    .filter(|c| self.registry.differs(c))
                    .map(|c| (c, None))
                    .unzip()
            }
            Mode::Maintenance => operator.into_iter().map(|(c, e)| (c, Some(e))).unzip(),
        };

        let validator = VitalValidator::new(&self.layout, self.config.lookahead);
        let mut verdict = validator.validate(&proposals, &self.registry, &inputs, self.sim.trains());

        for ((change, decision), env) in proposals.iter().zip(verdict.decisions.into_iter()).zip(envelopes) {
            let reply = match decision {
                Ok(()) => match self.registry.apply(change) {
                    Ok(_) => Reply::Accepted,
                    Err(e) => {
                        warn!("{}: {}", change, e);
                        verdict.report.reasons.push(e.to_string());
                        verdict.report.safe = false;
                        Reply::Rejected(e.to_string())
                    }
                },
                Err(reason) => {
                    warn!("{}", EngineError::SafetyRejected { block: change.block, reason: reason.clone() });
                    self.registry.log(InfrastructureLogEvent::Rejected(change.block, reason.clone()));
                    Reply::Rejected(reason)
                }
            };
            if let Some(env) = env {
                env.answer(reply);
            }
        }

        let actions = &verdict.report.corrective_actions;
        if actions.all_lights_red {
            let lights: Vec<BlockId> = self.registry.blocks().filter(|b| b.light.is_some()).map(|b| b.id).collect();
            for b in lights {
                if let Err(e) = self.registry.apply(&ProposedChange::new(b, Setting::Light(Aspect::Red))) {
                    warn!("could not force light {} red: {}", b, e);
                }
            }
        }
        for id in &actions.zero_speed {
            self.sim.zero_speed(*id);
        }

        let moves = self.sim.advance(&mut self.registry);

        let outputs = self.outputs(&inputs, &verdict.report);
        let retry = self.config.retry.clone();
        let surface = &mut self.surface;
        if let Err(e) = retry.run(|_| surface.publish(&outputs)) {
            warn!("publishing cycle {} failed: {}", self.cycle, e);
        }

        debug!("cycle {} mode={:?} stale={} safe={} moves={:?}",
               self.cycle, self.mode, stale, verdict.report.safe, moves);

        CycleReport {
            cycle: self.cycle,
            mode: self.mode,
            stale,
            safety: verdict.report,
            moves,
        }
    }

    /// Current state in published form.
    pub fn outputs(&self, inputs: &ExternalInputs, safety: &SafetyReport) -> Outputs {
        let mut out = Outputs { cycle: self.cycle, safety: safety.clone(), ..Default::default() };
        for b in self.registry.blocks() {
            if let Some(p) = b.switch { out.switches.insert(b.id, p); }
            if let Some(a) = b.light { out.lights.insert(b.id, a); }
            if let Some(g) = b.gate { out.gates.insert(b.id, g); }
        }
        let n = inputs.occupancy.len().max(self.config.partition.last + 1);
        out.occupancy = (0..n).map(|i| match self.registry.get(i) {
            Ok(b) => b.occupied,
            Err(_) => inputs.is_occupied(i),
        }).collect();
        for (id, t) in self.sim.trains() {
            out.trains.insert(*id, TrainStatus {
                commanded_speed: t.commanded_speed,
                commanded_authority: t.commanded_authority,
                route_index: t.route_index,
                current_block: t.current_block,
                active: t.active,
            });
        }
        out
    }

    /// Ticks at the configured period. Runs forever when `cycles` is `None`.
    pub fn run(&mut self, cycles: Option<u64>) {
        let mut n = 0;
        loop {
            let start = Instant::now();
            let report = self.cycle();
            if !report.safety.safe {
                info!("cycle {}: {}", report.cycle, report.safety.reasons.join("; "));
            }
            n += 1;
            if cycles.map(|c| n >= c).unwrap_or(false) {
                break;
            }
            let elapsed = start.elapsed();
            if elapsed < self.config.tick {
                thread::sleep(self.config.tick - elapsed);
            } else {
                warn!("cycle {} overran its tick ({:?})", report.cycle, elapsed);
            }
        }
    }
}
