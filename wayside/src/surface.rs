//! The shared external state the controller reads from and publishes to.

use serde::{Serialize, Deserialize};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::AppResult;
use crate::input::layout::{BlockId, SwitchPosition, Aspect, GateState, Fault};
use crate::railway::driver::TrainId;
use crate::railway::vital::SafetyReport;

fn yes() -> bool { true }

/// Dispatch suggestion for one train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainCommand {
    pub suggested_speed: f64,
    pub suggested_authority: f64,
    #[serde(default = "yes")]
    pub active: bool,
}

/// Snapshot of the inputs for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalInputs {
    /// One entry per block id. Ids beyond the end read as clear.
    pub occupancy: Vec<bool>,
    pub trains: BTreeMap<TrainId, TrainCommand>,
    pub closed: Vec<BlockId>,
    pub emergency: bool,
    pub faults: BTreeMap<BlockId, Fault>,
}

impl ExternalInputs {
    pub fn is_occupied(&self, block: BlockId) -> bool {
        self.occupancy.get(block).cloned().unwrap_or(false)
    }

    pub fn is_closed(&self, block: BlockId) -> bool {
        self.closed.contains(&block)
    }

    pub fn fault(&self, block: BlockId) -> Fault {
        self.faults.get(&block).cloned().unwrap_or_default()
    }

    /// Same rule as `Block::is_blocked`, for blocks outside the partition.
    pub fn is_blocked(&self, block: BlockId) -> bool {
        self.is_occupied(block) || self.is_closed(block) || self.fault(block).is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainStatus {
    pub commanded_speed: f64,
    pub commanded_authority: f64,
    pub route_index: usize,
    pub current_block: BlockId,
    pub active: bool,
}

/// Everything published at the end of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outputs {
    pub cycle: u64,
    pub switches: BTreeMap<BlockId, SwitchPosition>,
    pub lights: BTreeMap<BlockId, Aspect>,
    pub gates: BTreeMap<BlockId, GateState>,
    /// Managed blocks from the registry, all others echoed from the input.
    pub occupancy: Vec<bool>,
    pub trains: BTreeMap<TrainId, TrainStatus>,
    pub safety: SafetyReport,
}

pub trait StateSurface {
    fn read_inputs(&mut self) -> AppResult<ExternalInputs>;
    /// Replaces the published outputs as a whole.
    fn publish(&mut self, outputs: &Outputs) -> AppResult<()>;
}

/// JSON documents on disk.
pub struct FileSurface {
    inputs: PathBuf,
    outputs: PathBuf,
}

impl FileSurface {
    pub fn new(inputs: &Path, outputs: &Path) -> FileSurface {
        FileSurface { inputs: inputs.to_path_buf(), outputs: outputs.to_path_buf() }
    }
}

impl StateSurface for FileSurface {
    fn read_inputs(&mut self) -> AppResult<ExternalInputs> {
        let contents = crate::read_file(&self.inputs)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn publish(&mut self, outputs: &Outputs) -> AppResult<()> {
        let json = serde_json::to_string_pretty(outputs)?;
        let mut tmp = self.outputs.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.outputs)?;
        Ok(())
    }
}

#[derive(Debug, Fail)]
#[fail(display = "input source unavailable")]
pub struct Unavailable;

/// In-process surface for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySurface {
    pub inputs: ExternalInputs,
    pub published: Vec<Outputs>,
    /// Number of upcoming reads that fail.
    pub fail_reads: usize,
}

impl MemorySurface {
    pub fn new(inputs: ExternalInputs) -> MemorySurface {
        MemorySurface { inputs, ..Default::default() }
    }

    pub fn last(&self) -> Option<&Outputs> { self.published.last() }
}

impl StateSurface for MemorySurface {
    fn read_inputs(&mut self) -> AppResult<ExternalInputs> {
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            return Err(Unavailable.into());
        }
        Ok(self.inputs.clone())
    }

    fn publish(&mut self, outputs: &Outputs) -> AppResult<()> {
        self.published.push(outputs.clone());
        Ok(())
    }
}
