//! The node catalog (§3).
//!
//! A sum type with one variant per node class, the re-expression spec.md §9 asks for of
//! the "variant link types" note applied symmetrically to nodes — grounded on the
//! teacher's `Node` enum (`node.rs`: `Input`/`Output`/`Link`/`Storage`), generalized
//! from pywr's flow-allocation node roles to SWMM's hydraulic node roles.

use crate::define_index;
use crate::error::SwmmError;
use crate::storage_curve::StorageCurveModel;
use std::ops::{Deref, DerefMut};

define_index!(NodeIndex);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Junction,
    Outfall,
    Divider,
    Storage,
}

/// Two-phase old/new state shared by every node variant (§3 "Lifecycle").
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeDynamicState {
    pub old_depth: f64,
    pub new_depth: f64,
    pub old_volume: f64,
    pub new_volume: f64,
    pub old_net_inflow: f64,
    pub lateral_inflow: f64,
    pub inflow: f64,
    pub outflow: f64,
    pub overflow: f64,
    pub losses: f64,
    /// Set once `setNewNodeState`/storage iteration has run for this node this step.
    pub updated: bool,
}

impl NodeDynamicState {
    /// `setOldState`: copy new -> old and zero the per-step accumulators (§3).
    pub fn set_old_state(&mut self) {
        self.old_depth = self.new_depth;
        self.old_volume = self.new_volume;
        self.old_net_inflow = self.inflow - self.outflow - self.losses;
        self.lateral_inflow = 0.0;
        self.inflow = 0.0;
        self.outflow = 0.0;
        self.overflow = 0.0;
        self.losses = 0.0;
        self.updated = false;
    }
}

#[derive(Debug, Clone)]
pub struct JunctionNode {
    pub index: NodeIndex,
    pub name: String,
    pub invert: f64,
    pub full_depth: f64,
    pub ponded_area: f64,
    pub initial_depth: f64,
    pub degree: usize,
    pub state: NodeDynamicState,
    pub quality: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct OutfallNode {
    pub index: NodeIndex,
    pub name: String,
    pub invert: f64,
    pub initial_depth: f64,
    /// Subcatchment index this outfall re-routes its outflow to, or `None` (§4.7).
    pub route_to: Option<crate::subcatchment::SubcatchmentIndex>,
    /// Accumulated volume (ft^3) awaiting re-routing at the next runoff step.
    pub v_routed: f64,
    pub state: NodeDynamicState,
    pub quality: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct DividerNode {
    pub index: NodeIndex,
    pub name: String,
    pub invert: f64,
    pub full_depth: f64,
    pub initial_depth: f64,
    pub degree: usize,
    pub state: NodeDynamicState,
    pub quality: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct StorageNode {
    pub index: NodeIndex,
    pub name: String,
    pub invert: f64,
    pub full_depth: f64,
    pub full_volume: f64,
    pub ponded_area: f64,
    pub allow_ponding: bool,
    pub initial_depth: f64,
    pub degree: usize,
    pub state: NodeDynamicState,
    pub quality: Vec<f64>,
    /// Hydraulic residence time, persisted from hotstart version >= 4 (§4.1).
    pub hrt: f64,
    pub curve: StorageCurveModel,
}

#[derive(Debug, Clone)]
pub enum Node {
    Junction(JunctionNode),
    Outfall(OutfallNode),
    Divider(DividerNode),
    Storage(StorageNode),
}

impl Node {
    pub fn index(&self) -> NodeIndex {
        match self {
            Node::Junction(n) => n.index,
            Node::Outfall(n) => n.index,
            Node::Divider(n) => n.index,
            Node::Storage(n) => n.index,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Junction(n) => &n.name,
            Node::Outfall(n) => &n.name,
            Node::Divider(n) => &n.name,
            Node::Storage(n) => &n.name,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Junction(_) => NodeType::Junction,
            Node::Outfall(_) => NodeType::Outfall,
            Node::Divider(_) => NodeType::Divider,
            Node::Storage(_) => NodeType::Storage,
        }
    }

    pub fn invert(&self) -> f64 {
        match self {
            Node::Junction(n) => n.invert,
            Node::Outfall(n) => n.invert,
            Node::Divider(n) => n.invert,
            Node::Storage(n) => n.invert,
        }
    }

    pub fn full_depth(&self) -> f64 {
        match self {
            Node::Junction(n) => n.full_depth,
            Node::Outfall(_) => 0.0,
            Node::Divider(n) => n.full_depth,
            Node::Storage(n) => n.full_depth,
        }
    }

    pub fn full_volume(&self) -> f64 {
        match self {
            Node::Storage(n) => n.full_volume,
            // Non-storage nodes are treated as having no meaningful volume cap beyond
            // their full depth; §4.6 step 1 drains only above-full non-storage nodes
            // using their own `full_volume()` so this must still be finite.
            _ => f64::INFINITY,
        }
    }

    pub fn ponded_area(&self) -> f64 {
        match self {
            Node::Junction(n) => n.ponded_area,
            Node::Storage(n) => {
                if n.allow_ponding {
                    n.ponded_area
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    pub fn degree(&self) -> usize {
        match self {
            Node::Junction(n) => n.degree,
            Node::Outfall(_) => 0,
            Node::Divider(n) => n.degree,
            Node::Storage(n) => n.degree,
        }
    }

    pub fn state(&self) -> &NodeDynamicState {
        match self {
            Node::Junction(n) => &n.state,
            Node::Outfall(n) => &n.state,
            Node::Divider(n) => &n.state,
            Node::Storage(n) => &n.state,
        }
    }

    pub fn state_mut(&mut self) -> &mut NodeDynamicState {
        match self {
            Node::Junction(n) => &mut n.state,
            Node::Outfall(n) => &mut n.state,
            Node::Divider(n) => &mut n.state,
            Node::Storage(n) => &mut n.state,
        }
    }

    pub fn quality(&self) -> &[f64] {
        match self {
            Node::Junction(n) => &n.quality,
            Node::Outfall(n) => &n.quality,
            Node::Divider(n) => &n.quality,
            Node::Storage(n) => &n.quality,
        }
    }

    pub fn quality_mut(&mut self) -> &mut Vec<f64> {
        match self {
            Node::Junction(n) => &mut n.quality,
            Node::Outfall(n) => &mut n.quality,
            Node::Divider(n) => &mut n.quality,
            Node::Storage(n) => &mut n.quality,
        }
    }

    pub fn as_storage(&self) -> Option<&StorageNode> {
        match self {
            Node::Storage(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_storage_mut(&mut self) -> Option<&mut StorageNode> {
        match self {
            Node::Storage(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_outfall(&self) -> Option<&OutfallNode> {
        match self {
            Node::Outfall(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_outfall_mut(&mut self) -> Option<&mut OutfallNode> {
        match self {
            Node::Outfall(n) => Some(n),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct NodeVec {
    nodes: Vec<Node>,
}

impl Deref for NodeVec {
    type Target = Vec<Node>;

    fn deref(&self) -> &Self::Target {
        &self.nodes
    }
}

impl DerefMut for NodeVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.nodes
    }
}

impl NodeVec {
    pub fn get(&self, index: &NodeIndex) -> Result<&Node, SwmmError> {
        self.nodes.get(index.value()).ok_or(SwmmError::NodeIndexNotFound)
    }

    pub fn get_mut(&mut self, index: &NodeIndex) -> Result<&mut Node, SwmmError> {
        self.nodes.get_mut(index.value()).ok_or(SwmmError::NodeIndexNotFound)
    }

    fn next_index(&self) -> NodeIndex {
        NodeIndex::new(self.nodes.len())
    }

    pub fn push_junction(&mut self, name: &str, invert: f64, full_depth: f64, n_pollutants: usize) -> NodeIndex {
        let index = self.next_index();
        self.nodes.push(Node::Junction(JunctionNode {
            index,
            name: name.to_string(),
            invert,
            full_depth,
            ponded_area: 0.0,
            initial_depth: 0.0,
            degree: 0,
            state: NodeDynamicState::default(),
            quality: vec![0.0; n_pollutants],
        }));
        index
    }

    pub fn push_outfall(&mut self, name: &str, invert: f64, n_pollutants: usize) -> NodeIndex {
        let index = self.next_index();
        self.nodes.push(Node::Outfall(OutfallNode {
            index,
            name: name.to_string(),
            invert,
            initial_depth: 0.0,
            route_to: None,
            v_routed: 0.0,
            state: NodeDynamicState::default(),
            quality: vec![0.0; n_pollutants],
        }));
        index
    }

    pub fn push_divider(&mut self, name: &str, invert: f64, full_depth: f64, n_pollutants: usize) -> NodeIndex {
        let index = self.next_index();
        self.nodes.push(Node::Divider(DividerNode {
            index,
            name: name.to_string(),
            invert,
            full_depth,
            initial_depth: 0.0,
            degree: 0,
            state: NodeDynamicState::default(),
            quality: vec![0.0; n_pollutants],
        }));
        index
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push_storage(
        &mut self,
        name: &str,
        invert: f64,
        full_depth: f64,
        full_volume: f64,
        curve: StorageCurveModel,
        n_pollutants: usize,
    ) -> NodeIndex {
        let index = self.next_index();
        self.nodes.push(Node::Storage(StorageNode {
            index,
            name: name.to_string(),
            invert,
            full_depth,
            full_volume,
            ponded_area: 0.0,
            allow_ponding: false,
            initial_depth: 0.0,
            degree: 0,
            state: NodeDynamicState::default(),
            quality: vec![0.0; n_pollutants],
            hrt: 0.0,
            curve,
        }));
        index
    }

    pub fn index_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.nodes.iter().find(|n| n.name() == name).map(|n| n.index())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_old_state_zeroes_accumulators() {
        let mut s = NodeDynamicState {
            new_depth: 1.5,
            new_volume: 100.0,
            inflow: 10.0,
            outflow: 8.0,
            overflow: 1.0,
            losses: 0.5,
            ..Default::default()
        };
        s.set_old_state();
        assert_eq!(s.old_depth, 1.5);
        assert_eq!(s.old_volume, 100.0);
        assert_eq!(s.old_net_inflow, 10.0 - 8.0 - 0.5);
        assert_eq!(s.inflow, 0.0);
        assert_eq!(s.outflow, 0.0);
        assert_eq!(s.overflow, 0.0);
        assert!(!s.updated);
    }

    #[test]
    fn test_node_vec_push_and_get() {
        let mut nodes = NodeVec::default();
        let j = nodes.push_junction("J1", 100.0, 5.0, 0);
        let o = nodes.push_outfall("OUT1", 90.0, 0);
        assert_eq!(nodes.get(&j).unwrap().name(), "J1");
        assert_eq!(nodes.get(&o).unwrap().node_type(), NodeType::Outfall);
        assert!(nodes.get(&NodeIndex::new(99)).is_err());
    }
}
