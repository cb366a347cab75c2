//! The simulation orchestrator (§3 "Lifecycle", §5 Concurrency).
//!
//! Grounded on the teacher's `Network`/`RunOptions` split (`network.rs`, run loop in
//! `lib.rs`): one long-lived object owns every catalog and is driven forward one step
//! at a time by a caller-controlled loop, rather than taking over the thread itself.
//! `Project` plays that role here — it owns the catalogs, the clock, and the runoff/
//! routing collaborators, and exposes `run_step` for the caller to drive (directly, or
//! through [`Project::run_to_completion`], which also owns the results file).
//!
//! Concurrency (§5): this core is single-threaded by construction — one catalog, one
//! clock, one routing pass per step — since SWMM's network traversal is inherently
//! sequential (each link's resolved flow depends on its upstream node having already
//! been finalized this step). Parallelism, where the corpus uses it (the teacher's LP
//! solve is `rayon`-parallel across scenarios), belongs one level up: running several
//! independent `Project`s concurrently, which is why `Project` holds no interior
//! mutability and is `Send` whenever its collaborators are.

use crate::catalog::Catalog;
use crate::collaborators::DynamicWaveModel;
use crate::error::SwmmError;
use crate::hotstart::{self, HotstartHeader};
use crate::link::LinkIndex;
use crate::node::Node;
use crate::routing::{RoutingModel, RoutingStep};
use crate::runoff_step::{EvaporationSource, RunoffStepController};
use crate::timestep::{Clock, SimDuration};
use std::io::{Read, Write};

/// A fully wired simulation, ready to be driven forward one step at a time.
pub struct Project {
    pub catalog: Catalog,
    pub clock: Clock,
    pub routing_model: RoutingModel,
    /// Routing sub-step length; §2 notes this is "generally smaller than the runoff
    /// step", so one call to [`Self::run_step`] may drive several of these.
    pub route_step: SimDuration,
    pub runoff: RunoffStepController,
    pub evap: Box<dyn EvaporationSource>,
    pub flow_unit_code: i32,
    dynamic_wave: Option<Box<dyn DynamicWaveModel>>,
    link_order: Vec<LinkIndex>,
}

impl Project {
    /// Validate the catalog for `routing_model` (§3 invariants), seed initial routing
    /// state from each node's initial depth (§4.6 "open"), and return a ready-to-run
    /// project. Mirrors the teacher's `Network::from_schema` + `RunOptions`-driven
    /// `Network::run` split: validation happens once, here, not on every step.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        mut catalog: Catalog,
        clock: Clock,
        routing_model: RoutingModel,
        route_step: SimDuration,
        runoff: RunoffStepController,
        evap: Box<dyn EvaporationSource>,
        flow_unit_code: i32,
    ) -> Result<Self, SwmmError> {
        let link_order = catalog.validate(routing_model)?;
        catalog.initialize_routing_state();
        Ok(Self {
            catalog,
            clock,
            routing_model,
            route_step,
            runoff,
            evap,
            flow_unit_code,
            dynamic_wave: None,
            link_order,
        })
    }

    /// Attach the dynamic-wave collaborator required when `routing_model ==
    /// RoutingModel::Dynamic` (§4.6.3). A no-op for steady/kinematic projects.
    pub fn set_dynamic_wave(&mut self, model: Box<dyn DynamicWaveModel>) {
        self.dynamic_wave = Some(model);
    }

    pub fn is_finished(&self) -> bool {
        self.clock.is_finished()
    }

    /// Advance the simulation by one runoff step, §4.5, and every routing sub-step it
    /// spans, §4.6. Returns the runoff step length actually used (zero once the clock
    /// has already reached the end of the run).
    ///
    /// Order of operations per step, matching §3's "Lifecycle" and §4.7's re-routing
    /// note: run the runoff engine first (it re-routes last step's outfall flooding and
    /// cross-subcatchment runon internally), map the resulting subcatchment outflows
    /// onto their destination nodes' lateral inflow, then drive the routing engine
    /// across the same interval in `route_step`-sized pieces.
    pub fn run_step(&mut self) -> Result<SimDuration, SwmmError> {
        if self.clock.is_finished() {
            return Ok(SimDuration::zero());
        }

        let tstep = self.runoff.run_runoff_step(
            &self.clock,
            &self.catalog.gages,
            self.evap.as_ref(),
            &mut self.catalog.nodes,
            &mut self.catalog.subcatchments,
        )?;
        if tstep.is_zero() {
            return Ok(tstep);
        }

        for node in self.catalog.nodes.iter_mut() {
            node.state_mut().lateral_inflow = 0.0;
        }
        for sc in self.catalog.subcatchments.iter() {
            if let Some(node_idx) = sc.outlet_node {
                if let Ok(node) = self.catalog.nodes.get_mut(&node_idx) {
                    node.state_mut().lateral_inflow += sc.new_runoff;
                }
            }
        }

        let total = tstep.seconds();
        let mut elapsed = 0.0;
        while elapsed < total - 1.0e-9 {
            let dt = self.route_step.seconds().min(total - elapsed);

            for node in self.catalog.nodes.iter_mut() {
                let lateral = node.state().lateral_inflow;
                node.state_mut().set_old_state();
                node.state_mut().lateral_inflow = lateral;
            }
            for link in self.catalog.links.iter_mut() {
                link.state_mut().set_old_state();
            }

            let mut step = RoutingStep {
                nodes: &mut self.catalog.nodes,
                links: &mut self.catalog.links,
                order: &self.link_order,
                model: self.routing_model,
                dynamic_wave: self.dynamic_wave.as_deref_mut(),
            };
            step.run(dt)?;

            elapsed += dt;
        }

        self.clock.advance(tstep)?;
        Ok(tstep)
    }

    /// Drive the project to the end of its clock, calling `on_step` after every
    /// completed runoff+routing step with the step length just run. Stops at the first
    /// error (§7: "the sticky error code" maps to [`SwmmError::code`] on the `Err` this
    /// returns), leaving the catalog in whatever state the failing step left it — the
    /// caller is expected to still flush hotstart/results on teardown regardless.
    pub fn run_to_completion(&mut self, mut on_step: impl FnMut(&Project, SimDuration)) -> Result<(), SwmmError> {
        while !self.is_finished() {
            let tstep = self.run_step()?;
            if tstep.is_zero() {
                break;
            }
            on_step(self, tstep);
        }
        Ok(())
    }

    /// Total subcatchment area (ft^2), used for area-weighted system means (§4.2).
    pub fn total_subcatchment_area(&self) -> f64 {
        self.catalog.subcatchments.iter().map(|s| s.area).sum()
    }

    /// Sum of every subcatchment's mass-balance runoff volume accumulator (ft^3).
    pub fn total_runoff_volume(&self) -> f64 {
        self.catalog.subcatchments.iter().map(|s| s.outflow_volume).sum()
    }

    pub fn total_rainfall_volume(&self) -> f64 {
        self.catalog.subcatchments.iter().map(|s| s.rainfall_volume).sum()
    }

    /// Current system storage volume across every node and link (§4.2), with `f = 1.0`
    /// since this is always called between routing sub-steps rather than mid-step.
    pub fn system_storage_volume(&self) -> f64 {
        let node_volumes: Vec<f64> = self.catalog.nodes.iter().map(|n| n.state().new_volume).collect();
        let link_old: Vec<f64> = self.catalog.links.iter().map(|l| l.state().old_volume).collect();
        let link_new: Vec<f64> = self.catalog.links.iter().map(|l| l.state().new_volume).collect();
        crate::results::system_storage_volume(&node_volumes, &link_old, &link_new, 1.0)
    }

    /// Write the full §4.1 hotstart snapshot: header, then every subcatchment's runoff
    /// (and, if attached, groundwater and quality/buildup) payload in catalog order,
    /// then the routing state for every node and link. Snowpack state is never written
    /// since no subcatchment here ever has a snowpack collaborator attached (§1
    /// Non-goals); a future snowpack integration would add that block right after the
    /// groundwater one, matching the legacy file's field order.
    pub fn write_hotstart<W: Write>(&self, w: &mut W) -> Result<(), SwmmError> {
        let header = HotstartHeader {
            version: 4,
            n_subcatch: self.catalog.subcatchments.len() as i32,
            n_land_uses: self.catalog.n_land_uses as i32,
            n_nodes: self.catalog.nodes.len() as i32,
            n_links: self.catalog.links.len() as i32,
            n_pollutants: self.catalog.n_pollutants as i32,
            flow_unit_code: self.flow_unit_code,
        };
        hotstart::write_header(w, &header)?;

        for sc in self.catalog.subcatchments.iter() {
            let depths = [sc.sub_areas[0].depth, sc.sub_areas[1].depth, sc.sub_areas[2].depth];
            hotstart::write_subcatchment_runoff(w, depths, sc.new_runoff, sc.infiltration_state())?;
            if sc.groundwater_attached {
                hotstart::write_groundwater_state(w, sc.groundwater_state())?;
            }
            if self.catalog.n_pollutants > 0 {
                hotstart::write_subcatchment_quality(w, &sc.new_quality, &sc.ponded_quality)?;
                for lu in 0..self.catalog.n_land_uses {
                    let start = lu * self.catalog.n_pollutants;
                    let end = start + self.catalog.n_pollutants;
                    hotstart::write_landuse_buildup(w, &sc.buildup[start..end], sc.last_swept[lu])?;
                }
            }
        }

        hotstart::write_routing_state(w, &self.catalog.nodes, &self.catalog.links)
    }

    /// Read a §4.1 hotstart snapshot back into this project's catalog. The header's
    /// catalog sizes must match exactly (`hotstart::read_header`'s own check); the
    /// caller is expected to have built the project from the same input that produced
    /// the file being read.
    pub fn read_hotstart<R: Read>(&mut self, r: &mut R) -> Result<(), SwmmError> {
        let header = hotstart::read_header(
            r,
            self.catalog.subcatchments.len() as i32,
            self.catalog.nodes.len() as i32,
            self.catalog.links.len() as i32,
            self.catalog.n_pollutants as i32,
            self.flow_unit_code,
        )?;

        for sc in self.catalog.subcatchments.iter_mut() {
            let (depths, new_runoff, infil_state) = hotstart::read_subcatchment_runoff(r)?;
            for (area, depth) in sc.sub_areas.iter_mut().zip(depths) {
                area.depth = depth;
            }
            sc.new_runoff = new_runoff;
            sc.set_infiltration_state(infil_state);

            if sc.groundwater_attached {
                let gw = hotstart::read_groundwater_state(r)?;
                sc.set_groundwater_state(gw);
            }
            if self.catalog.n_pollutants > 0 {
                let (runoff_q, ponded_q) = hotstart::read_subcatchment_quality(r, self.catalog.n_pollutants)?;
                sc.new_quality = runoff_q;
                sc.ponded_quality = ponded_q;
                for lu in 0..self.catalog.n_land_uses {
                    let (buildup, swept) = hotstart::read_landuse_buildup(r, self.catalog.n_pollutants)?;
                    let start = lu * self.catalog.n_pollutants;
                    sc.buildup[start..start + self.catalog.n_pollutants].copy_from_slice(&buildup);
                    sc.last_swept[lu] = swept;
                }
            }
        }

        hotstart::read_routing_state(r, header.version, &mut self.catalog.nodes, &mut self.catalog.links)?;

        for node in self.catalog.nodes.iter_mut() {
            if let Node::Storage(s) = node {
                s.state.new_volume = s.curve.volume_of_depth(s.state.new_depth);
                s.state.old_volume = s.state.new_volume;
            }
            node.state_mut().old_depth = node.state().new_depth;
        }
        for link in self.catalog.links.iter_mut() {
            link.state_mut().old_flow = link.state().new_flow;
            link.state_mut().old_depth = link.state().new_depth;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::runoff_step::ConstantEvaporation;
    use crate::storage_curve::{FunctionalStorageCurve, StorageCurveModel};
    use crate::subcatchment::{RouteTo, SubArea, SubAreaKind};
    use crate::xsect::XSect;
    use chrono::NaiveDateTime;
    use std::io::Cursor;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn flat_sub_areas() -> [SubArea; 3] {
        [
            SubArea::new(SubAreaKind::Imperv0, 0.015, 0.0, 1.0, 5.0, RouteTo::Outlet, 1.0),
            SubArea::new(SubAreaKind::Imperv1, 0.015, 0.0, 0.0, 5.0, RouteTo::Outlet, 1.0),
            SubArea::new(SubAreaKind::Perv, 0.25, 0.0, 0.0, 1.0, RouteTo::Outlet, 1.0),
        ]
    }

    /// §8 scenario 1: a single impervious subcatchment draining directly to an
    /// outfall, under constant rain. Confirms the full runoff -> lateral inflow ->
    /// routing -> outfall chain moves water end to end.
    fn build_scenario_1() -> Project {
        let mut catalog = Catalog::new(0, 0);
        let gage = catalog.gages.push(
            "G1",
            vec![crate::gage::RainRecord {
                start: dt("2021-01-01 00:00:00"),
                intensity: 2.0,
            }],
        );
        let sc = catalog
            .subcatchments
            .push("S1", 43560.0, 1.0, 500.0, 0.01, 100.0, flat_sub_areas(), 0, 0)
            .unwrap();
        let out = catalog.nodes.push_outfall("OUT1", 0.0, 0);
        {
            let s = catalog.subcatchments.get_mut(&sc).unwrap();
            s.gage = Some(gage);
            s.outlet_node = Some(out);
        }

        let clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-01 04:00:00"));
        let runoff = RunoffStepController::new(SimDuration::from_seconds(60.0), SimDuration::from_seconds(3600.0));
        Project::open(
            catalog,
            clock,
            RoutingModel::Steady,
            SimDuration::from_seconds(60.0),
            runoff,
            Box::new(ConstantEvaporation::zero()),
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_scenario_1_runs_to_completion_and_produces_outflow() {
        let mut project = build_scenario_1();
        let mut steps = 0;
        project.run_to_completion(|_p, _dt| steps += 1).unwrap();
        assert!(project.is_finished());
        assert!(steps > 0);
        assert!(project.total_rainfall_volume() > 0.0);
    }

    #[test]
    fn test_hotstart_round_trips_through_a_running_project() {
        let mut project = build_scenario_1();
        for _ in 0..30 {
            if project.is_finished() {
                break;
            }
            project.run_step().unwrap();
        }

        let mut buf = Vec::new();
        project.write_hotstart(&mut buf).unwrap();

        let mut fresh = build_scenario_1();
        let mut cursor = Cursor::new(buf);
        fresh.read_hotstart(&mut cursor).unwrap();

        let orig_sc = &project.catalog.subcatchments[0];
        let fresh_sc = &fresh.catalog.subcatchments[0];
        assert_eq!(orig_sc.new_runoff, fresh_sc.new_runoff);
        assert_eq!(orig_sc.sub_areas[0].depth, fresh_sc.sub_areas[0].depth);
    }

    #[test]
    fn test_scenario_3_storage_node_converges_under_project_loop() {
        let mut catalog = Catalog::new(0, 0);
        let storage = catalog.nodes.push_storage(
            "ST1",
            0.0,
            20.0,
            10000.0,
            StorageCurveModel::Functional(FunctionalStorageCurve::new(500.0, 1.0)),
            0,
        );
        let out = catalog.nodes.push_outfall("OUT1", 0.0, 0);
        catalog.links.push_outlet("OL1", storage, out, 2.0, 2.0, 0);

        let sc = catalog
            .subcatchments
            .push("S1", 43560.0, 1.0, 500.0, 0.01, 100.0, flat_sub_areas(), 0, 0)
            .unwrap();
        let gage = catalog.gages.push(
            "G1",
            vec![crate::gage::RainRecord {
                start: dt("2021-01-01 00:00:00"),
                intensity: 1.0,
            }],
        );
        {
            let s = catalog.subcatchments.get_mut(&sc).unwrap();
            s.gage = Some(gage);
            s.outlet_node = Some(storage);
        }

        let clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-01 02:00:00"));
        let runoff = RunoffStepController::new(SimDuration::from_seconds(60.0), SimDuration::from_seconds(1800.0));
        let mut project = Project::open(
            catalog,
            clock,
            RoutingModel::Steady,
            SimDuration::from_seconds(60.0),
            runoff,
            Box::new(ConstantEvaporation::zero()),
            0,
        )
        .unwrap();

        project.run_to_completion(|_p, _dt| {}).unwrap();
        assert!(project.is_finished());
        assert!(project.system_storage_volume() >= 0.0);
    }
}
