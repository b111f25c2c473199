//! Incremental maintenance of the directional clear distance field.
//!
//! Each coarse group of 4x4x4 chunks stores six 5-bit counts, one per axis direction, used by acceleration structures to
//! skip empty space. When chunks change, their groups become seeds of a bounded breadth-first flood. The flooded groups are
//! then recomputed by repeated directional relaxation.

use crate::coordinates::{group_of_chunk, WorldShape};
use crate::units::*;

use basalt_core::glam::IVec3;
use std::collections::VecDeque;

const COUNT_BITS: u32 = 5;
const COUNT_MASK: u32 = (1 << COUNT_BITS) - 1;
pub const MAX_CLEAR_DISTANCE: u8 = COUNT_MASK as u8;

/// Flood distance gained per hop, and clear distance gained per relaxation step.
const HOP: u32 = 4;
/// Groups reached at this flood distance or beyond don't spread the flood any further.
const FLOOD_CUTOFF: u32 = 28;
const RELAXATION_ROUNDS: usize = 7;
const UNVISITED: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    NegX = 0,
    PosX = 1,
    NegY = 2,
    PosY = 3,
    NegZ = 4,
    PosZ = 5,
}

impl Direction {
    pub const ALL: [Self; 6] = [
        Self::NegX,
        Self::PosX,
        Self::NegY,
        Self::PosY,
        Self::NegZ,
        Self::PosZ,
    ];

    #[inline]
    fn bit_offset(self) -> u32 {
        self as u32 * COUNT_BITS
    }

    pub fn step(self) -> IVec3 {
        match self {
            Self::NegX => IVec3::new(-1, 0, 0),
            Self::PosX => IVec3::new(1, 0, 0),
            Self::NegY => IVec3::new(0, -1, 0),
            Self::PosY => IVec3::new(0, 1, 0),
            Self::NegZ => IVec3::new(0, 0, -1),
            Self::PosZ => IVec3::new(0, 0, 1),
        }
    }

    /// The negative and positive direction along `axis`.
    fn along_axis(axis: usize) -> [Self; 2] {
        [Self::ALL[2 * axis], Self::ALL[2 * axis + 1]]
    }
}

/// Six packed 5-bit counts: -X at bit 0, +X at 5, -Y at 10, +Y at 15, -Z at 20, +Z at 25.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ClearDistance(pub u32);

impl ClearDistance {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(0x3FFF_FFFF);

    #[inline]
    pub fn get(self, d: Direction) -> u8 {
        ((self.0 >> d.bit_offset()) & COUNT_MASK) as u8
    }

    /// Saturates at [`MAX_CLEAR_DISTANCE`].
    #[inline]
    pub fn add(self, d: Direction, amount: u32) -> Self {
        let count = (self.get(d) as u32 + amount).min(COUNT_MASK);
        Self((self.0 & !(COUNT_MASK << d.bit_offset())) | (count << d.bit_offset()))
    }

    /// True if every one of our six counts is at least the matching count of `other`.
    #[inline]
    pub fn dominates(self, other: Self) -> bool {
        Direction::ALL
            .iter()
            .all(|&d| self.get(d) >= other.get(d))
    }

    pub fn to_array(self) -> [u8; 6] {
        Direction::ALL.map(|d| self.get(d))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GroupValue {
    /// The group itself changed. Consumers must rebuild it from the hierarchy.
    Rebuild,
    Field(ClearDistance),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GroupUpdate {
    pub index: usize,
    pub coords: GroupUnits<IVec3>,
    pub value: GroupValue,
}

#[derive(Clone, Debug, Default)]
pub struct PropagationReport {
    /// Seeds first, then flooded groups in visiting order.
    pub updates: Vec<GroupUpdate>,
    pub num_seeds: usize,
}

impl PropagationReport {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

pub struct ChangePropagator {
    shape: WorldShape,
    fields: Vec<ClearDistance>,
    /// Flood distance this pass, or `UNVISITED`. Seeds sit at zero.
    flood: Vec<u32>,
    working: Vec<ClearDistance>,
    seeds: Vec<usize>,
}

impl ChangePropagator {
    /// A fresh world is empty, so every group starts fully clear.
    pub fn new(shape: WorldShape) -> Self {
        let n = shape.num_groups();
        Self {
            shape,
            fields: vec![ClearDistance::MAX; n],
            flood: vec![UNVISITED; n],
            working: vec![ClearDistance::ZERO; n],
            seeds: Vec::new(),
        }
    }

    /// Seeds the group containing `chunk`. Returns false if the group was already pending or lies outside the world.
    pub fn mark_changed(&mut self, chunk: ChunkUnits<IVec3>) -> bool {
        let index = match self.shape.group_index(group_of_chunk(chunk)) {
            Some(i) => i,
            None => return false,
        };
        if self.flood[index] != UNVISITED {
            return false;
        }
        self.flood[index] = 0;
        self.seeds.push(index);
        true
    }

    pub fn num_pending(&self) -> usize {
        self.seeds.len()
    }

    pub fn clear_distance(&self, group: GroupUnits<IVec3>) -> Option<[u8; 6]> {
        self.shape
            .group_index(group)
            .map(|i| self.fields[i].to_array())
    }

    pub fn propagate(&mut self) -> PropagationReport {
        if self.seeds.is_empty() {
            return PropagationReport::default();
        }

        let num_seeds = self.seeds.len();
        let mut changed = std::mem::take(&mut self.seeds);
        self.flood_from_seeds(&mut changed);
        self.relax(&changed[num_seeds..]);

        let mut updates = Vec::with_capacity(changed.len());
        for (k, &g) in changed.iter().enumerate() {
            let value = if k < num_seeds {
                self.fields[g] = ClearDistance::ZERO;
                GroupValue::Rebuild
            } else {
                self.fields[g] = self.working[g];
                GroupValue::Field(self.working[g])
            };
            updates.push(GroupUpdate {
                index: g,
                coords: self.shape.group_coords(g),
                value,
            });
            self.flood[g] = UNVISITED;
            self.working[g] = ClearDistance::ZERO;
        }

        log::debug!(
            "Propagated clear distance from {} seeds to {} groups",
            num_seeds,
            changed.len() - num_seeds
        );

        PropagationReport { updates, num_seeds }
    }

    /// Breadth-first over the 26-neighborhood. Every group reached is appended to `changed`.
    fn flood_from_seeds(&mut self, changed: &mut Vec<usize>) {
        let mut queue: VecDeque<usize> = changed.iter().copied().collect();
        while let Some(g) = queue.pop_front() {
            let distance = self.flood[g];
            let GroupUnits(p) = self.shape.group_coords(g);
            for z in -1..=1 {
                for y in -1..=1 {
                    for x in -1..=1 {
                        if x == 0 && y == 0 && z == 0 {
                            continue;
                        }
                        let n = match self.shape.group_index(GroupUnits(p + IVec3::new(x, y, z))) {
                            Some(n) => n,
                            None => continue,
                        };
                        if self.flood[n] != UNVISITED {
                            continue;
                        }
                        let next_distance = distance + HOP;
                        self.flood[n] = next_distance;
                        changed.push(n);
                        if next_distance < FLOOD_CUTOFF {
                            queue.push_back(n);
                        }
                    }
                }
            }
        }
    }

    /// Sweeps X, then Y, then Z, updating fields in place. A direction gains one hop when the world ends there, or when the
    /// neighbor's field dominates ours. Seed neighbors never contribute. Neighbors outside this pass count as fully clear.
    fn relax(&mut self, flooded: &[usize]) {
        for &g in flooded {
            self.working[g] = ClearDistance::ZERO;
        }

        for _ in 0..RELAXATION_ROUNDS {
            for axis in 0..3 {
                for &g in flooded {
                    let GroupUnits(p) = self.shape.group_coords(g);
                    let mut current = self.working[g];
                    for d in Direction::along_axis(axis) {
                        match self.shape.group_index(GroupUnits(p + d.step())) {
                            None => current = current.add(d, HOP),
                            Some(n) => {
                                if let Some(neighbor) = self.neighbor_field(n) {
                                    if neighbor.dominates(current) {
                                        current = current.add(d, HOP);
                                    }
                                }
                            }
                        }
                    }
                    self.working[g] = current;
                }
            }
        }
    }

    fn neighbor_field(&self, n: usize) -> Option<ClearDistance> {
        match self.flood[n] {
            UNVISITED => Some(ClearDistance::MAX),
            0 => None,
            _ => Some(self.working[n]),
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
