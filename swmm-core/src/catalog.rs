//! The process-wide object catalogs (§3).
//!
//! Grounded on the teacher's `Network` (`network.rs`), which owns every node/edge/
//! parameter catalog for one model and is built once, then mutated in place for the
//! life of a run. `Catalog` plays the same role for the four catalogs this engine
//! needs: rain gages, subcatchments, nodes, and links, plus the two catalog-wide counts
//! (pollutants, land uses) every per-object state vector is sized against.

use crate::error::SwmmError;
use crate::gage::GageVec;
use crate::link::{Link, LinkVec};
use crate::node::{Node, NodeVec};
use crate::routing::{self, RoutingModel};
use crate::subcatchment::SubcatchmentVec;

/// Every process-wide object table, built once at run open and read/mutated in place
/// throughout the simulation (§3 "Lifecycle").
#[derive(Default)]
pub struct Catalog {
    pub gages: GageVec,
    pub subcatchments: SubcatchmentVec,
    pub nodes: NodeVec,
    pub links: LinkVec,
    pub n_pollutants: usize,
    pub n_land_uses: usize,
}

impl Catalog {
    pub fn new(n_pollutants: usize, n_land_uses: usize) -> Self {
        Self {
            n_pollutants,
            n_land_uses,
            ..Default::default()
        }
    }

    /// Assign `Node::degree` from the outgoing-link count (§3: "Node `degree` = count
    /// of outgoing links; set during validation"). Run once, inside [`Self::validate`].
    fn set_node_degrees(&mut self) {
        let mut out_degree = vec![0usize; self.nodes.len()];
        for link in self.links.iter() {
            out_degree[link.node1().value()] += 1;
        }
        for node in self.nodes.iter_mut() {
            let degree = out_degree[node.index().value()];
            match node {
                Node::Junction(n) => n.degree = degree,
                Node::Divider(n) => n.degree = degree,
                Node::Storage(n) => n.degree = degree,
                Node::Outfall(_) => {}
            }
        }
    }

    /// Validate the §3 invariants for the requested routing model and return the
    /// topologically sorted link traversal order the routing engine drives off of.
    /// Steady/kinematic routing requires the tree-shaped conveyance graph of §3;
    /// dynamic-wave routing delegates graph shape validation to its own collaborator
    /// (§4.6.3), so only the topological order (used for diagnostics, not traversal) is
    /// still computed here.
    pub fn validate(&mut self, model: RoutingModel) -> Result<Vec<crate::link::LinkIndex>, SwmmError> {
        self.set_node_degrees();
        match model {
            RoutingModel::Steady | RoutingModel::Kinematic => {
                routing::validate_network(&self.nodes, &self.links)?;
                routing::topological_link_order(&self.nodes, &self.links)
            }
            RoutingModel::Dynamic => {
                if !self.nodes.iter().any(|n| matches!(n, Node::Outfall(_))) {
                    return Err(SwmmError::NoOutlets);
                }
                Ok(self.links.iter().map(Link::index).collect())
            }
        }
    }

    /// §4.6 "open": seed each node's inflow/outflow accumulators from the flows the
    /// initial-depth link state implies, and initialise storage-node volumes from their
    /// initial depths via the storage curve. Called once, after [`Self::validate`].
    pub fn initialize_routing_state(&mut self) {
        for node in self.nodes.iter_mut() {
            let initial_depth = match node {
                Node::Junction(n) => n.initial_depth,
                Node::Outfall(n) => n.initial_depth,
                Node::Divider(n) => n.initial_depth,
                Node::Storage(n) => n.initial_depth,
            };
            let full_depth = node.full_depth();
            let ponded_area = node.ponded_area();
            let state = node.state_mut();
            state.old_depth = initial_depth;
            state.new_depth = initial_depth;
            if let Node::Storage(storage) = node {
                let mut volume = storage.curve.volume_of_depth(initial_depth);
                if initial_depth > full_depth && ponded_area > 0.0 {
                    volume = storage.full_volume + (initial_depth - full_depth) * ponded_area;
                }
                storage.state.old_volume = volume;
                storage.state.new_volume = volume;
            }
        }

        for link in self.links.iter_mut() {
            if let Link::Conduit(c) = link {
                let area = c.xsect.area_of_depth(c.state.new_depth);
                let initial_flow = if c.xsect.full_area() > 0.0 {
                    c.q_full * (area / c.xsect.full_area())
                } else {
                    0.0
                };
                c.state.old_flow = initial_flow;
                c.state.new_flow = initial_flow;
            }
        }

        let mut outflow = vec![0.0; self.nodes.len()];
        let mut inflow = vec![0.0; self.nodes.len()];
        for link in self.links.iter() {
            let q = link.state().new_flow;
            outflow[link.node1().value()] += q;
            inflow[link.node2().value()] += q;
        }
        for node in self.nodes.iter_mut() {
            let idx = node.index().value();
            let state = node.state_mut();
            state.outflow = outflow[idx];
            state.inflow = inflow[idx];
            state.old_net_inflow = inflow[idx] - outflow[idx];
        }
    }

    /// `setOldState` over every catalog that carries two-phase dynamic state (§3).
    pub fn set_old_state(&mut self) {
        for sc in self.subcatchments.iter_mut() {
            sc.set_old_state();
        }
        for node in self.nodes.iter_mut() {
            node.state_mut().set_old_state();
        }
        for link in self.links.iter_mut() {
            link.state_mut().set_old_state();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage_curve::{FunctionalStorageCurve, StorageCurveModel};
    use crate::xsect::XSect;

    #[test]
    fn test_set_node_degrees() {
        let mut cat = Catalog::new(0, 0);
        let a = cat.nodes.push_junction("A", 10.0, 5.0, 0);
        let b = cat.nodes.push_junction("B", 9.0, 5.0, 0);
        let out = cat.nodes.push_outfall("OUT", 8.0, 0);
        cat.links.push_conduit("L1", a, b, 100.0, 0.013, 0.01, XSect::circular(1.0), 0);
        cat.links.push_conduit("L2", b, out, 100.0, 0.013, 0.01, XSect::circular(1.0), 0);

        let order = cat.validate(RoutingModel::Steady).unwrap();
        assert_eq!(order.len(), 2);
        if let Node::Junction(j) = cat.nodes.get(&a).unwrap() {
            assert_eq!(j.degree, 1);
        } else {
            panic!("expected junction");
        }
    }

    #[test]
    fn test_initialize_routing_state_seeds_storage_volume() {
        let mut cat = Catalog::new(0, 0);
        let storage = cat.nodes.push_storage(
            "ST1",
            0.0,
            10.0,
            5000.0,
            StorageCurveModel::Functional(FunctionalStorageCurve::new(500.0, 1.0)),
            0,
        );
        if let Node::Storage(s) = cat.nodes.get_mut(&storage).unwrap() {
            s.initial_depth = 2.0;
        }
        cat.initialize_routing_state();
        let s = cat.nodes.get(&storage).unwrap().as_storage().unwrap();
        assert!((s.state.new_volume - 1000.0).abs() < 1e-9);
    }
}
