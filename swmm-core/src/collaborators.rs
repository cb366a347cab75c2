//! External collaborator contracts (§6, §1 Non-goals).
//!
//! spec.md explicitly scopes infiltration sub-models, LID units, snow pack
//! thermodynamics, groundwater aquifer flow, and the dynamic-wave momentum solver out
//! of this core, referencing each only by the interface it consumes. Those interfaces
//! are the traits below, grounded on the teacher's `solvers::Solver` trait
//! (`solvers/mod.rs`) — a pluggable collaborator selected at model-setup time rather
//! than hard-wired into the routing loop. Each trait ships one zero-effect
//! implementation (`Null*`) so the runoff and routing engines are exercisable without a
//! real physics model plugged in (SPEC_FULL.md §3).

use crate::routing::RoutingModel;

/// `getInfil`/`getState`/`setState` (§6). Applies only to the pervious sub-area.
pub trait InfiltrationModel: std::fmt::Debug {
    /// Infiltration rate (ft/sec) given the step length, net precipitation rate, total
    /// inflow rate and current ponded depth, all in ft or ft/sec.
    fn get_infil(&mut self, dt: f64, precip: f64, inflow: f64, depth: f64) -> f64;

    /// Persisted state vector for the hotstart payload (§4.1: 6 x f64 per subcatchment).
    fn get_state(&self) -> [f64; 6];
    fn set_state(&mut self, state: [f64; 6]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullInfiltration;

impl InfiltrationModel for NullInfiltration {
    fn get_infil(&mut self, _dt: f64, _precip: f64, _inflow: f64, _depth: f64) -> f64 {
        0.0
    }

    fn get_state(&self) -> [f64; 6] {
        [0.0; 6]
    }

    fn set_state(&mut self, _state: [f64; 6]) {}
}

/// `getGroundwater`/`validate`/`initState`/`getState`/`setState` (§6).
pub trait GroundwaterModel: std::fmt::Debug {
    /// Net exchange with the pervious sub-area (ft/sec, positive = loss from surface),
    /// and the void fraction still available to absorb infiltration this step.
    fn get_groundwater(&mut self, perv_evap: f64, total_infil: f64, dt: f64) -> (f64, f64);

    fn get_state(&self) -> [f64; 4];
    fn set_state(&mut self, state: [f64; 4]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullGroundwater;

impl GroundwaterModel for NullGroundwater {
    fn get_groundwater(&mut self, _perv_evap: f64, _total_infil: f64, _dt: f64) -> (f64, f64) {
        (0.0, f64::INFINITY)
    }

    fn get_state(&self) -> [f64; 4] {
        [0.0; 4]
    }

    fn set_state(&mut self, _state: [f64; 4]) {}
}

/// `getSnowMelt`/`plowSnow`/`initSnowpack`/`getState`/`setState` (§6). Three surfaces
/// (plowable, impervious, pervious), each with a 5 x f64 state vector (§4.1).
pub trait SnowpackModel: std::fmt::Debug {
    /// Split gross precipitation into (rain, snow) seen by each of the three
    /// sub-areas, and report whether the pack holds any water (used by §4.5's wet-step
    /// test).
    fn get_snow_melt(&mut self, dt: f64, precip: f64, temp: f64) -> ([f64; 3], [f64; 3], bool);

    fn get_state(&self, surface: usize) -> [f64; 5];
    fn set_state(&mut self, surface: usize, state: [f64; 5]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSnowpack;

impl SnowpackModel for NullSnowpack {
    fn get_snow_melt(&mut self, _dt: f64, precip: f64, _temp: f64) -> ([f64; 3], [f64; 3], bool) {
        ([precip; 3], [0.0; 3], false)
    }

    fn get_state(&self, _surface: usize) -> [f64; 5] {
        [0.0; 5]
    }

    fn set_state(&mut self, _surface: usize, _state: [f64; 5]) {}
}

/// `getRunoff`/`getDrainFlow`/`addDrainRunon`/`getFlowToPerv`/`getPervArea`/
/// `getStoredVolume` (§6).
pub trait LidModel: std::fmt::Debug {
    /// Evaluate the LID's own water balance for this step. Mutates internal evap,
    /// infiltration, and surface in/out flow accumulators; returns the net outflow
    /// leaving the LID (cfs).
    fn get_runoff(&mut self, dt: f64) -> f64;

    fn get_drain_flow(&self, is_final_step: bool) -> f64;
    fn add_drain_runon(&mut self, flow: f64);
    fn get_flow_to_perv(&self) -> f64;
    fn get_perv_area(&self) -> f64;
    fn get_stored_volume(&self) -> f64;
}

/// The occupied area of every subcatchment with a null LID model is zero, so this
/// collaborator is never consulted in practice; it exists purely to let
/// [`crate::subcatchment::Subcatchment`] hold an optional boxed LID without a special
/// case in the runoff engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLid;

impl LidModel for NullLid {
    fn get_runoff(&mut self, _dt: f64) -> f64 {
        0.0
    }

    fn get_drain_flow(&self, _is_final_step: bool) -> f64 {
        0.0
    }

    fn add_drain_runon(&mut self, _flow: f64) {}

    fn get_flow_to_perv(&self) -> f64 {
        0.0
    }

    fn get_perv_area(&self) -> f64 {
        0.0
    }

    fn get_stored_volume(&self) -> f64 {
        0.0
    }
}

/// `init`/`close`/`getRoutingStep`/`execute` (§6, §4.6.3). Only consulted when the
/// project's routing model is [`RoutingModel::Dynamic`] — steady and kinematic routing
/// never touch this trait (§4.6.3: "The core merely delegates when routingModel == DW").
pub trait DynamicWaveModel: std::fmt::Debug {
    fn init(&mut self) -> Result<(), String>;
    fn close(&mut self);
    fn get_routing_step(&self, fixed_step: f64) -> f64;
    /// Advance the network by `dt`; returns the number of internal computational steps
    /// taken.
    fn execute(&mut self, dt: f64) -> Result<u32, String>;
}

#[derive(Debug, Default)]
pub struct NullDynamicWave;

impl DynamicWaveModel for NullDynamicWave {
    fn init(&mut self) -> Result<(), String> {
        Err("dynamic wave routing is not implemented by this core; a DynamicWaveModel \
             collaborator must be supplied when RoutingModel::Dynamic is selected"
            .to_string())
    }

    fn close(&mut self) {}

    fn get_routing_step(&self, fixed_step: f64) -> f64 {
        fixed_step
    }

    fn execute(&mut self, _dt: f64) -> Result<u32, String> {
        Err("dynamic wave routing is not implemented by this core".to_string())
    }
}

/// Helper used by `Project::validate` to check a requested routing model is actually
/// runnable with the collaborators on hand.
pub fn routing_model_is_supported(model: RoutingModel, has_dynamic_wave: bool) -> bool {
    match model {
        RoutingModel::Steady | RoutingModel::Kinematic => true,
        RoutingModel::Dynamic => has_dynamic_wave,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_null_infiltration_is_inert() {
        let mut m = NullInfiltration;
        assert_eq!(m.get_infil(1.0, 0.1, 0.1, 0.1), 0.0);
        assert_eq!(m.get_state(), [0.0; 6]);
    }

    #[test]
    fn test_null_groundwater_unbounded_void() {
        let mut m = NullGroundwater;
        let (exchange, void) = m.get_groundwater(0.1, 0.1, 1.0);
        assert_eq!(exchange, 0.0);
        assert!(void.is_infinite());
    }

    #[test]
    fn test_routing_model_support() {
        assert!(routing_model_is_supported(RoutingModel::Steady, false));
        assert!(!routing_model_is_supported(RoutingModel::Dynamic, false));
        assert!(routing_model_is_supported(RoutingModel::Dynamic, true));
    }
}
