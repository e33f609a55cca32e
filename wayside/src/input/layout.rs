use smallvec::SmallVec;
use serde::{Serialize, Deserialize};

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

pub type Dist = f64;
pub type BlockId = usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchPosition {
    A,
    B,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aspect {
    Red,
    Yellow,
    Green,
    SuperGreen,
}

impl Aspect {
    /// Red and yellow can be shown regardless of what is ahead.
    pub fn is_restrictive(&self) -> bool {
        match *self {
            Aspect::Red | Aspect::Yellow => true,
            Aspect::Green | Aspect::SuperGreen => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    Open,
    Closed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    None,
    PowerFailure,
    CircuitFailure,
    BrokenTrack,
}

impl Fault {
    pub fn is_active(&self) -> bool { *self != Fault::None }
}

impl Default for Fault {
    fn default() -> Fault { Fault::None }
}

#[derive(Debug, Fail)]
#[fail(display = "unknown value {:?}", _0)]
pub struct UnknownValue(pub String);

impl FromStr for SwitchPosition {
    type Err = UnknownValue;
    fn from_str(s: &str) -> Result<Self, UnknownValue> {
        match s {
            "a" | "A" => Ok(SwitchPosition::A),
            "b" | "B" => Ok(SwitchPosition::B),
            x => Err(UnknownValue(x.to_string())),
        }
    }
}

impl FromStr for Aspect {
    type Err = UnknownValue;
    fn from_str(s: &str) -> Result<Self, UnknownValue> {
        match s {
            "red" => Ok(Aspect::Red),
            "yellow" => Ok(Aspect::Yellow),
            "green" => Ok(Aspect::Green),
            "supergreen" => Ok(Aspect::SuperGreen),
            x => Err(UnknownValue(x.to_string())),
        }
    }
}

impl FromStr for GateState {
    type Err = UnknownValue;
    fn from_str(s: &str) -> Result<Self, UnknownValue> {
        match s {
            "open" => Ok(GateState::Open),
            "closed" => Ok(GateState::Closed),
            x => Err(UnknownValue(x.to_string())),
        }
    }
}

/// Fixed topology of one block.
#[derive(Debug, Clone, Default)]
pub struct StaticBlock {
    pub length: Dist,
    pub next: SmallVec<[BlockId; 2]>,
    /// Branch entered in position A and in position B.
    pub switch: Option<(BlockId, BlockId)>,
    pub light: bool,
    /// Approach blocks guarded by a crossing gate on this block.
    pub gate: Option<SmallVec<[BlockId; 4]>>,
}

impl StaticBlock {
    pub fn branch(&self, pos: SwitchPosition) -> Option<BlockId> {
        self.switch.map(|(a, b)| match pos {
            SwitchPosition::A => a,
            SwitchPosition::B => b,
        })
    }

    pub fn successors(&self) -> SmallVec<[BlockId; 4]> {
        let mut s: SmallVec<[BlockId; 4]> = self.next.iter().cloned().collect();
        if let Some((a, b)) = self.switch {
            for x in &[a, b] {
                if !s.contains(x) { s.push(*x); }
            }
        }
        s
    }
}

#[derive(Debug, Fail)]
pub enum LayoutError {
    #[fail(display = "{} refers to unknown block {}", _0, _1)]
    UnknownBlock(String, BlockId),
    #[fail(display = "route {}: {}", _0, _1)]
    BadRoute(String, String),
}

/// Ordered block sequence with the distance from the route start to the
/// end of each position.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub blocks: Vec<BlockId>,
    pub distances: Vec<Dist>,
}

impl Route {
    pub fn new(blocks: Vec<BlockId>, distances: Vec<Dist>) -> Result<Route, String> {
        if blocks.is_empty() {
            return Err("route has no blocks".to_string());
        }
        if blocks.len() != distances.len() {
            return Err(format!("{} blocks but {} distances", blocks.len(), distances.len()));
        }
        let mut prev = 0.0;
        for d in &distances {
            if !(*d >= prev) {
                return Err(format!("distance {} after {} is decreasing", d, prev));
            }
            prev = *d;
        }
        Ok(Route { blocks, distances })
    }

    pub fn len(&self) -> usize { self.blocks.len() }

    pub fn block(&self, idx: usize) -> Option<BlockId> { self.blocks.get(idx).cloned() }

    /// Length of the block at a route position, from the distance table.
    pub fn block_length(&self, idx: usize) -> Option<Dist> {
        let end = *self.distances.get(idx)?;
        let start = if idx == 0 { 0.0 } else { self.distances[idx - 1] };
        Some(end - start)
    }
}

/// A route as written in the layout file, before distances are resolved.
#[derive(Debug, Clone)]
pub struct RouteDecl {
    pub blocks: Vec<BlockId>,
    pub distances: Option<Vec<Dist>>,
}

#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub blocks: BTreeMap<BlockId, StaticBlock>,
    pub routes: HashMap<String, Route>,
}

impl Layout {
    pub fn new(blocks: BTreeMap<BlockId, StaticBlock>, decls: Vec<(String, RouteDecl)>) -> Result<Layout, LayoutError> {
        let mut routes = HashMap::new();
        for (name, decl) in decls {
            let distances = match decl.distances {
                Some(d) => d,
                None => {
                    let mut acc = 0.0;
                    let mut d = Vec::new();
                    for b in &decl.blocks {
                        let block = blocks.get(b).ok_or_else(|| LayoutError::UnknownBlock(format!("route {}", name), *b))?;
                        acc += block.length;
                        d.push(acc);
                    }
                    d
                }
            };
            let route = Route::new(decl.blocks, distances).map_err(|e| LayoutError::BadRoute(name.clone(), e))?;
            routes.insert(name, route);
        }
        Ok(Layout { blocks, routes })
    }

    /// Every block referenced by links, switches, gates and routes exists.
    pub fn check(&self) -> Result<(), LayoutError> {
        let known = |what: String, b: BlockId| {
            if self.blocks.contains_key(&b) { Ok(()) } else { Err(LayoutError::UnknownBlock(what, b)) }
        };
        for (id, block) in &self.blocks {
            for n in block.successors() {
                known(format!("block {}", id), n)?;
            }
            if let Some(ref approach) = block.gate {
                for a in approach {
                    known(format!("gate {}", id), *a)?;
                }
            }
        }
        for (name, route) in &self.routes {
            for b in &route.blocks {
                known(format!("route {}", name), *b)?;
            }
        }
        Ok(())
    }

    pub fn route(&self, name: &str) -> Option<&Route> {
        self.routes.get(name)
    }

    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 4]> {
        self.blocks.get(&block).map(|b| b.successors()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_table() {
        let r = Route::new(vec![1, 2, 3], vec![100.0, 250.0, 400.0]).unwrap();
        assert_eq!(r.block_length(0), Some(100.0));
        assert_eq!(r.block_length(1), Some(150.0));
        assert_eq!(r.block_length(2), Some(150.0));
        assert_eq!(r.block_length(3), None);

        assert!(Route::new(vec![1, 2], vec![100.0]).is_err());
        assert!(Route::new(vec![1, 2], vec![100.0, 50.0]).is_err());
        assert!(Route::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_switch_successors() {
        let mut b = StaticBlock::default();
        b.next.push(4);
        b.switch = Some((4, 10));
        assert_eq!(b.successors().to_vec(), vec![4, 10]);
        assert_eq!(b.branch(SwitchPosition::B), Some(10));
        assert!(!StaticBlock::default().branch(SwitchPosition::A).is_some());
    }
}
