//! The link catalog (§3, §9).
//!
//! spec.md §9 flags the "variant link types" design directly: "currently share a
//! struct with a type tag and per-type satellite arrays indexed by `subIndex`. A sum
//! type with per-variant payload is the natural re-expression." This is that sum type,
//! grounded on the teacher's `Node` enum shape (`node.rs`) applied to links instead.

use crate::define_index;
use crate::error::SwmmError;
use crate::node::NodeIndex;
use crate::xsect::XSect;
use std::ops::{Deref, DerefMut};

define_index!(LinkIndex);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fullness {
    None,
    SomeBarrelsFull,
    AllFull,
}

/// Two-phase old/new state shared by every link variant (§3).
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkDynamicState {
    pub old_flow: f64,
    pub new_flow: f64,
    pub old_depth: f64,
    pub new_depth: f64,
    pub old_volume: f64,
    pub new_volume: f64,
}

impl LinkDynamicState {
    pub fn set_old_state(&mut self) {
        self.old_flow = self.new_flow;
        self.old_depth = self.new_depth;
        self.old_volume = self.new_volume;
    }
}

#[derive(Debug, Clone)]
pub struct ConduitLink {
    pub index: LinkIndex,
    pub name: String,
    pub node1: NodeIndex,
    pub node2: NodeIndex,
    pub direction: f64,
    pub length: f64,
    pub roughness: f64,
    pub slope: f64,
    pub offset1: f64,
    pub offset2: f64,
    pub xsect: XSect,
    pub q_full: f64,
    pub loss_rate: f64,
    pub fullness: Fullness,
    pub state: LinkDynamicState,
    pub quality: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct RegulatorLink {
    pub index: LinkIndex,
    pub name: String,
    pub node1: NodeIndex,
    pub node2: NodeIndex,
    pub direction: f64,
    pub q_full: f64,
    pub setting: f64,
    pub target_setting: f64,
    /// Linear discharge coefficient `k` in the simplified rating `q = setting * k *
    /// depth` used by the storage iteration's outflow function (§4.6.1; SPEC_FULL.md §3
    /// supplements a concrete rating since spec.md only worked the linear case in its
    /// §8 storage example).
    pub discharge_coeff: f64,
    pub state: LinkDynamicState,
    pub quality: Vec<f64>,
}

#[derive(Debug, Clone)]
pub enum Link {
    Conduit(ConduitLink),
    Pump(RegulatorLink),
    Orifice(RegulatorLink),
    Weir(RegulatorLink),
    Outlet(RegulatorLink),
}

impl Link {
    pub fn index(&self) -> LinkIndex {
        match self {
            Link::Conduit(l) => l.index,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => l.index,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Link::Conduit(l) => &l.name,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => &l.name,
        }
    }

    pub fn node1(&self) -> NodeIndex {
        match self {
            Link::Conduit(l) => l.node1,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => l.node1,
        }
    }

    pub fn node2(&self) -> NodeIndex {
        match self {
            Link::Conduit(l) => l.node2,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => l.node2,
        }
    }

    pub fn direction(&self) -> f64 {
        match self {
            Link::Conduit(l) => l.direction,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => l.direction,
        }
    }

    /// Is this link a regulator (orifice/weir/outlet)? §3 requires these originate only
    /// at storage nodes.
    pub fn is_regulator(&self) -> bool {
        matches!(self, Link::Orifice(_) | Link::Weir(_) | Link::Outlet(_))
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self, Link::Conduit(c) if c.roughness <= 0.0 && c.q_full <= 0.0)
    }

    pub fn q_full(&self) -> f64 {
        match self {
            Link::Conduit(l) => l.q_full,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => l.q_full,
        }
    }

    pub fn state(&self) -> &LinkDynamicState {
        match self {
            Link::Conduit(l) => &l.state,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => &l.state,
        }
    }

    pub fn state_mut(&mut self) -> &mut LinkDynamicState {
        match self {
            Link::Conduit(l) => &mut l.state,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => &mut l.state,
        }
    }

    pub fn setting(&self) -> f64 {
        match self {
            Link::Conduit(_) => 1.0,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => l.setting,
        }
    }

    pub fn set_setting(&mut self, value: f64) {
        if let Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) = self {
            l.setting = value.clamp(0.0, 1.0);
        }
    }

    pub fn target_setting(&self) -> f64 {
        match self {
            Link::Conduit(_) => 1.0,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => l.target_setting,
        }
    }

    pub fn set_target_setting(&mut self, value: f64) {
        if let Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) = self {
            l.target_setting = value.clamp(0.0, 1.0);
        }
    }

    /// Linear discharge coefficient for regulator links (§4.6.1's storage outflow
    /// function); `0.0` for conduits, which are rated by [`crate::xsect::XSect`]
    /// instead.
    pub fn discharge_coeff(&self) -> f64 {
        match self {
            Link::Conduit(_) => 0.0,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => l.discharge_coeff,
        }
    }

    pub fn as_conduit(&self) -> Option<&ConduitLink> {
        match self {
            Link::Conduit(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_conduit_mut(&mut self) -> Option<&mut ConduitLink> {
        match self {
            Link::Conduit(l) => Some(l),
            _ => None,
        }
    }

    pub fn quality(&self) -> &[f64] {
        match self {
            Link::Conduit(l) => &l.quality,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => &l.quality,
        }
    }

    pub fn quality_mut(&mut self) -> &mut Vec<f64> {
        match self {
            Link::Conduit(l) => &mut l.quality,
            Link::Pump(l) | Link::Orifice(l) | Link::Weir(l) | Link::Outlet(l) => &mut l.quality,
        }
    }
}

#[derive(Default)]
pub struct LinkVec {
    links: Vec<Link>,
}

impl Deref for LinkVec {
    type Target = Vec<Link>;

    fn deref(&self) -> &Self::Target {
        &self.links
    }
}

impl DerefMut for LinkVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.links
    }
}

impl LinkVec {
    pub fn get(&self, index: &LinkIndex) -> Result<&Link, SwmmError> {
        self.links.get(index.value()).ok_or(SwmmError::LinkIndexNotFound)
    }

    pub fn get_mut(&mut self, index: &LinkIndex) -> Result<&mut Link, SwmmError> {
        self.links.get_mut(index.value()).ok_or(SwmmError::LinkIndexNotFound)
    }

    fn next_index(&self) -> LinkIndex {
        LinkIndex::new(self.links.len())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push_conduit(
        &mut self,
        name: &str,
        node1: NodeIndex,
        node2: NodeIndex,
        length: f64,
        roughness: f64,
        slope: f64,
        xsect: XSect,
        n_pollutants: usize,
    ) -> LinkIndex {
        let index = self.next_index();
        let q_full = xsect.full_flow_capacity(roughness, slope);
        self.links.push(Link::Conduit(ConduitLink {
            index,
            name: name.to_string(),
            node1,
            node2,
            direction: 1.0,
            length,
            roughness,
            slope,
            offset1: 0.0,
            offset2: 0.0,
            xsect,
            q_full,
            loss_rate: 0.0,
            fullness: Fullness::None,
            state: LinkDynamicState::default(),
            quality: vec![0.0; n_pollutants],
        }));
        index
    }

    #[allow(clippy::too_many_arguments)]
    fn push_regulator(
        &mut self,
        name: &str,
        node1: NodeIndex,
        node2: NodeIndex,
        q_full: f64,
        discharge_coeff: f64,
        n_pollutants: usize,
    ) -> RegulatorLink {
        RegulatorLink {
            index: LinkIndex::new(0), // overwritten by caller before push
            name: name.to_string(),
            node1,
            node2,
            direction: 1.0,
            q_full,
            setting: 1.0,
            target_setting: 1.0,
            discharge_coeff,
            state: LinkDynamicState::default(),
            quality: vec![0.0; n_pollutants],
        }
    }

    pub fn push_pump(&mut self, name: &str, node1: NodeIndex, node2: NodeIndex, q_full: f64, n_pollutants: usize) -> LinkIndex {
        let index = self.next_index();
        let mut r = self.push_regulator(name, node1, node2, q_full, 0.0, n_pollutants);
        r.index = index;
        self.links.push(Link::Pump(r));
        index
    }

    pub fn push_orifice(
        &mut self,
        name: &str,
        node1: NodeIndex,
        node2: NodeIndex,
        q_full: f64,
        discharge_coeff: f64,
        n_pollutants: usize,
    ) -> LinkIndex {
        let index = self.next_index();
        let mut r = self.push_regulator(name, node1, node2, q_full, discharge_coeff, n_pollutants);
        r.index = index;
        self.links.push(Link::Orifice(r));
        index
    }

    pub fn push_weir(
        &mut self,
        name: &str,
        node1: NodeIndex,
        node2: NodeIndex,
        q_full: f64,
        discharge_coeff: f64,
        n_pollutants: usize,
    ) -> LinkIndex {
        let index = self.next_index();
        let mut r = self.push_regulator(name, node1, node2, q_full, discharge_coeff, n_pollutants);
        r.index = index;
        self.links.push(Link::Weir(r));
        index
    }

    pub fn push_outlet(
        &mut self,
        name: &str,
        node1: NodeIndex,
        node2: NodeIndex,
        q_full: f64,
        discharge_coeff: f64,
        n_pollutants: usize,
    ) -> LinkIndex {
        let index = self.next_index();
        let mut r = self.push_regulator(name, node1, node2, q_full, discharge_coeff, n_pollutants);
        r.index = index;
        self.links.push(Link::Outlet(r));
        index
    }

    pub fn index_by_name(&self, name: &str) -> Option<LinkIndex> {
        self.links.iter().find(|l| l.name() == name).map(|l| l.index())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::xsect::XSect;

    #[test]
    fn test_set_old_state() {
        let mut s = LinkDynamicState {
            new_flow: 5.0,
            new_depth: 1.0,
            new_volume: 10.0,
            ..Default::default()
        };
        s.set_old_state();
        assert_eq!(s.old_flow, 5.0);
        assert_eq!(s.old_depth, 1.0);
        assert_eq!(s.old_volume, 10.0);
    }

    #[test]
    fn test_regulator_setting_clamped() {
        let mut links = LinkVec::default();
        let idx = links.push_orifice("ORI1", NodeIndex::new(0), NodeIndex::new(1), 5.0, 2.0, 0);
        let link = links.get_mut(&idx).unwrap();
        link.set_setting(1.5);
        assert_eq!(link.setting(), 1.0);
        link.set_setting(-0.5);
        assert_eq!(link.setting(), 0.0);
    }

    #[test]
    fn test_conduit_q_full_positive() {
        let mut links = LinkVec::default();
        let idx = links.push_conduit(
            "C1",
            NodeIndex::new(0),
            NodeIndex::new(1),
            100.0,
            0.015,
            0.01,
            XSect::circular(1.0),
            0,
        );
        assert!(links.get(&idx).unwrap().q_full() > 0.0);
    }
}
