//! Subcatchments and the per-step runoff engine (§3, §4.3, §4.4).
//!
//! Grounded on the teacher's `Node`/`AggregatedNode` dynamic-state split (old/new
//! fields, `setOldState`) generalized to the three-sub-area surface water balance
//! spec.md describes. The sub-area ODE itself lives in [`crate::ode`].

use crate::collaborators::{GroundwaterModel, InfiltrationModel, LidModel, NullGroundwater, NullInfiltration, NullLid};
use crate::define_index;
use crate::error::SwmmError;
use crate::ode;
use std::ops::{Deref, DerefMut};

define_index!(SubcatchmentIndex);

pub const MIN_RUNOFF: f64 = 1.0e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAreaKind {
    Imperv0,
    Imperv1,
    Perv,
}

/// Where a sub-area's outflow goes once it leaves the sub-area (§3: "routing
/// destination").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTo {
    Outlet,
    Pervious,
    Impervious,
}

/// One of a subcatchment's three sub-areas (§3, §4.3 step 4).
#[derive(Debug, Clone, Copy)]
pub struct SubArea {
    pub kind: SubAreaKind,
    /// Manning's roughness.
    pub n: f64,
    /// Depression storage capacity, ft.
    pub d_store: f64,
    /// Fraction of the subcatchment's non-LID area this sub-area occupies.
    pub f_area: f64,
    /// Non-linear reservoir coefficient (`1.49 * sqrt(slope) / (n * width)` scaled into
    /// ft/s units by the caller — kept opaque here since the geometry that produces it
    /// is out of scope, §1).
    pub alpha: f64,
    pub route_to: RouteTo,
    /// Fraction of this sub-area's outflow that leaves the subcatchment rather than
    /// cascading to the sub-area named by `route_to`.
    pub f_outlet: f64,
    pub depth: f64,
    pub inflow: f64,
    pub runoff: f64,
}

impl SubArea {
    pub fn new(kind: SubAreaKind, n: f64, d_store: f64, f_area: f64, alpha: f64, route_to: RouteTo, f_outlet: f64) -> Self {
        Self {
            kind,
            n,
            d_store,
            f_area,
            alpha,
            route_to,
            f_outlet,
            depth: 0.0,
            inflow: 0.0,
            runoff: 0.0,
        }
    }

    fn has_area(&self) -> bool {
        self.f_area > 0.0
    }

    /// §4.3 step 4: evaluate this sub-area's water balance over `tstep` seconds given a
    /// constant net precipitation rate `precip` (ft/sec, already rain+snow or
    /// snowmelt-split) and evaporation rate `evap` (ft/sec). `infil` is the infiltration
    /// rate already computed by the collaborator (zero for impervious sub-areas).
    /// Returns the moisture-loss volumes (evap, infil) in ft/sec averaged over this
    /// sub-area's own area, for mass-balance bookkeeping by the caller.
    fn evaluate(&mut self, tstep: f64, precip: f64, evap: f64, infil: f64) -> (f64, f64) {
        if !self.has_area() || tstep <= 0.0 {
            self.runoff = 0.0;
            return (0.0, 0.0);
        }

        let surf_moisture0 = self.depth / tstep;
        let surf_evap = surf_moisture0.min(evap);
        let mut inflow = self.inflow + precip;
        let surf_moisture = surf_moisture0 + inflow;
        let losses = surf_evap + infil;

        if losses >= surf_moisture {
            self.depth = 0.0;
            self.runoff = 0.0;
            // Losses are capped by what was actually available this step.
            return (surf_evap.min(surf_moisture), infil.min((surf_moisture - surf_evap).max(0.0)));
        }

        inflow -= evap + infil;

        if self.n <= 0.0 {
            // N == 0: no routing, any excess above dStore drains within the step.
            let total_depth = self.depth + inflow * tstep;
            self.runoff = ((total_depth - self.d_store).max(0.0) / tstep).max(0.0);
            self.depth = total_depth.min(self.d_store).max(0.0);
        } else {
            let r = ode::integrate_ponded_depth(self.depth, self.d_store, self.alpha, inflow, tstep);
            self.depth = r.depth;
            self.runoff = if self.depth > self.d_store {
                self.alpha * (self.depth - self.d_store).powf(5.0 / 3.0)
            } else {
                0.0
            };
        }

        (surf_evap, infil)
    }
}

/// A single subcatchment (§3).
#[derive(Debug, Clone)]
pub struct Subcatchment {
    pub index: SubcatchmentIndex,
    pub name: String,
    pub area: f64,
    pub pct_imperv: f64,
    pub width: f64,
    pub slope: f64,
    pub curb_length: f64,
    pub lid_area: f64,
    pub gage: Option<crate::gage::GageIndex>,
    /// Subcatchment this one drains to via runon (§4.3 step 1), if any.
    pub outlet: Option<SubcatchmentIndex>,
    /// Conveyance-network node this subcatchment's runoff drains into as lateral
    /// inflow, if its outlet is the network rather than another subcatchment. Mutually
    /// exclusive with `outlet` in practice, though nothing enforces that here.
    pub outlet_node: Option<crate::node::NodeIndex>,

    pub sub_areas: [SubArea; 3],

    pub old_runoff: f64,
    pub new_runoff: f64,
    pub old_snow_depth: f64,
    pub new_snow_depth: f64,
    /// Accumulated runon rate, ft/sec over non-LID area (§3).
    pub runon: f64,
    pub evap_loss: f64,
    pub infil_loss: f64,
    pub old_quality: Vec<f64>,
    pub new_quality: Vec<f64>,
    pub ponded_quality: Vec<f64>,
    /// Per-(land use, pollutant) buildup mass, land-use major (§3). The washoff
    /// chemistry that would accumulate this is out of scope (§1); the state exists so
    /// hotstart round-trips carry it even though nothing here ever writes a non-zero
    /// value yet.
    pub buildup: Vec<f64>,
    /// Last-swept time per land use, in days since the start of the simulation (§3).
    pub last_swept: Vec<f64>,

    /// Mass-balance accumulators (ft^3), reset by the caller at reporting boundaries.
    pub rainfall_volume: f64,
    pub evap_volume: f64,
    pub infil_volume: f64,
    pub outflow_volume: f64,

    infiltration: Box<dyn InfiltrationModel>,
    groundwater: Box<dyn GroundwaterModel>,
    /// Set when [`Self::set_groundwater`] is called with a real model, so the hotstart
    /// codec (§4.1: "if groundwater is attached") knows whether to carry its 4xf64
    /// state block.
    pub groundwater_attached: bool,
    lid: Box<dyn LidModel>,
}

/// Area a sub-area's non-linear-reservoir formula resolves against: SPEC_FULL.md §5
/// OQ2 resolves the disputed convention as *this* sub-area's own area, not the
/// subcatchment's non-LID area as a whole — the α coefficient supplied by the caller is
/// assumed already scaled to the sub-area's own `fArea * (area - lidArea)` footprint, so
/// no extra area factor appears in [`SubArea::evaluate`]. The rejected alternative
/// (scaling against the full non-LID area) is recorded in DESIGN.md.
const _OQ2_NOTE: () = ();

impl Subcatchment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: SubcatchmentIndex,
        name: &str,
        area: f64,
        pct_imperv: f64,
        width: f64,
        slope: f64,
        curb_length: f64,
        sub_areas: [SubArea; 3],
        n_pollutants: usize,
        n_land_uses: usize,
    ) -> Result<Self, SwmmError> {
        let sum_f_area: f64 = sub_areas.iter().map(|s| s.f_area).sum();
        if (sum_f_area - 1.0).abs() > 1e-6 {
            return Err(SwmmError::SubAreaFractionsInvalid(name.to_string(), sum_f_area));
        }
        Ok(Self {
            index,
            name: name.to_string(),
            area,
            pct_imperv: pct_imperv.clamp(0.0, 1.0),
            width,
            slope,
            curb_length,
            lid_area: 0.0,
            gage: None,
            outlet: None,
            outlet_node: None,
            sub_areas,
            old_runoff: 0.0,
            new_runoff: 0.0,
            old_snow_depth: 0.0,
            new_snow_depth: 0.0,
            runon: 0.0,
            evap_loss: 0.0,
            infil_loss: 0.0,
            old_quality: vec![0.0; n_pollutants],
            new_quality: vec![0.0; n_pollutants],
            ponded_quality: vec![0.0; n_pollutants],
            buildup: vec![0.0; n_land_uses * n_pollutants],
            last_swept: vec![0.0; n_land_uses],
            rainfall_volume: 0.0,
            evap_volume: 0.0,
            infil_volume: 0.0,
            outflow_volume: 0.0,
            infiltration: Box::new(NullInfiltration),
            groundwater: Box::new(NullGroundwater),
            groundwater_attached: false,
            lid: Box::new(NullLid),
        })
    }

    pub fn set_infiltration(&mut self, model: Box<dyn InfiltrationModel>) {
        self.infiltration = model;
    }

    pub fn set_groundwater(&mut self, model: Box<dyn GroundwaterModel>) {
        self.groundwater = model;
        self.groundwater_attached = true;
    }

    /// The attached infiltration collaborator's serializable state (§4.1 hotstart
    /// payload).
    pub fn infiltration_state(&self) -> [f64; 6] {
        self.infiltration.get_state()
    }

    pub fn set_infiltration_state(&mut self, state: [f64; 6]) {
        self.infiltration.set_state(state);
    }

    /// The attached groundwater collaborator's serializable state, valid only when
    /// [`Self::groundwater_attached`] is set.
    pub fn groundwater_state(&self) -> [f64; 4] {
        self.groundwater.get_state()
    }

    pub fn set_groundwater_state(&mut self, state: [f64; 4]) {
        self.groundwater.set_state(state);
    }

    pub fn set_lid(&mut self, model: Box<dyn LidModel>) {
        self.lid = model;
    }

    pub fn non_lid_area(&self) -> f64 {
        (self.area - self.lid_area).max(0.0)
    }

    /// `setOldState` (§3 Lifecycle).
    pub fn set_old_state(&mut self) {
        self.old_runoff = self.new_runoff;
        self.old_snow_depth = self.new_snow_depth;
        self.old_quality.copy_from_slice(&self.new_quality);
    }

    fn is_wet(&self) -> bool {
        self.sub_areas.iter().any(|s| s.depth > 0.0) || self.new_runoff > 0.0
    }

    pub fn has_active_runoff(&self) -> bool {
        self.area > 0.0 && self.is_wet()
    }

    /// §4.3: run one subcatchment's runoff step. `precip`/`snow` are the gage-reported
    /// rates (ft/sec); `evap` is the evaporation rate (ft/sec). Snowpack splitting is
    /// out of scope beyond the trivial "no snowpack attached" case, so every sub-area
    /// sees the same `precip + snow` net rate unless the caller has already split it
    /// (§4.3 step 3, delegated to a snowpack collaborator the caller owns).
    pub fn compute_runoff(&mut self, tstep: f64, precip: f64, snow: f64, evap: f64) {
        if self.area <= 0.0 || tstep <= 0.0 {
            self.new_runoff = 0.0;
            return;
        }

        // Step 2: sub-area cross-routing of the prior step's outflows.
        let (imperv0_carry, imperv1_carry, perv_carry) = self.cross_route();

        let net_precip = precip + snow;

        let mut total_evap = 0.0;
        let mut total_infil = 0.0;
        let mut non_lid_outflow = 0.0;

        for i in 0..3 {
            let carry = match i {
                0 => imperv0_carry,
                1 => imperv1_carry,
                _ => perv_carry,
            };
            let is_perv = self.sub_areas[i].kind == SubAreaKind::Perv;
            self.sub_areas[i].inflow = self.runon + carry;

            let infil = if is_perv {
                let raw = self
                    .infiltration
                    .get_infil(tstep, net_precip, self.sub_areas[i].inflow, self.sub_areas[i].depth);
                let (_, void) = self.groundwater.get_groundwater(0.0, raw, tstep);
                raw.min(void.max(0.0))
            } else {
                0.0
            };

            let (sub_evap, sub_infil) = self.sub_areas[i].evaluate(tstep, net_precip, evap, infil);

            total_evap += sub_evap * self.sub_areas[i].f_area;
            total_infil += sub_infil * self.sub_areas[i].f_area;

            if matches!(self.sub_areas[i].route_to, RouteTo::Outlet) || self.sub_areas[i].f_outlet >= 1.0 {
                non_lid_outflow += self.sub_areas[i].runoff * self.sub_areas[i].f_area;
            } else {
                non_lid_outflow += self.sub_areas[i].runoff * self.sub_areas[i].f_area * self.sub_areas[i].f_outlet;
            }
        }

        self.evap_loss = total_evap;
        self.infil_loss = total_infil;

        let lid_out = self.lid.get_runoff(tstep);
        let perv_evap = total_evap;
        self.groundwater.get_groundwater(perv_evap, total_infil, tstep);

        let flow_to_lid = self.lid.get_flow_to_perv().max(0.0);
        self.new_runoff = (non_lid_outflow - flow_to_lid + lid_out).max(0.0);

        if self.new_runoff < MIN_RUNOFF * self.area {
            self.new_runoff = 0.0;
        }

        let non_lid_area = self.non_lid_area();
        let area_sq_ft = self.area;
        self.rainfall_volume += net_precip * area_sq_ft * tstep;
        self.evap_volume += total_evap * area_sq_ft * tstep;
        self.infil_volume += total_infil * area_sq_ft * tstep;
        self.outflow_volume += self.new_runoff * tstep;
        let _ = non_lid_area;
    }

    /// §4.3 step 2: if IMPERV sub-areas cascade to PERV (or PERV cascades to
    /// IMPERV1), return the carried-over inflow rate for each sub-area this step, drawn
    /// from the *previous* step's runoff (the two-phase state means `runoff` still holds
    /// last step's value when this runs, since it is overwritten later in the same
    /// call).
    fn cross_route(&self) -> (f64, f64, f64) {
        let mut imperv0_to_perv = 0.0;
        let mut imperv1_to_perv = 0.0;
        let mut perv_to_imperv1 = 0.0;

        for area in &self.sub_areas {
            let carried = area.runoff * area.f_area * (1.0 - area.f_outlet);
            match (area.kind, area.route_to) {
                (SubAreaKind::Imperv0, RouteTo::Pervious) => imperv0_to_perv = carried,
                (SubAreaKind::Imperv1, RouteTo::Pervious) => imperv1_to_perv = carried,
                (SubAreaKind::Perv, RouteTo::Impervious) => perv_to_imperv1 = carried,
                _ => {}
            }
        }

        let perv_area = self.sub_areas[2].f_area;
        let imperv1_area = self.sub_areas[1].f_area;
        let to_perv = if perv_area > 0.0 {
            (imperv0_to_perv + imperv1_to_perv) / perv_area
        } else {
            0.0
        };
        let to_imperv1 = if imperv1_area > 0.0 { perv_to_imperv1 / imperv1_area } else { 0.0 };

        (0.0, to_imperv1, to_perv)
    }
}

#[derive(Default)]
pub struct SubcatchmentVec {
    subcatchments: Vec<Subcatchment>,
}

impl Deref for SubcatchmentVec {
    type Target = Vec<Subcatchment>;

    fn deref(&self) -> &Self::Target {
        &self.subcatchments
    }
}

impl DerefMut for SubcatchmentVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.subcatchments
    }
}

impl SubcatchmentVec {
    pub fn get(&self, index: &SubcatchmentIndex) -> Result<&Subcatchment, SwmmError> {
        self.subcatchments.get(index.value()).ok_or(SwmmError::SubcatchmentIndexNotFound)
    }

    pub fn get_mut(&mut self, index: &SubcatchmentIndex) -> Result<&mut Subcatchment, SwmmError> {
        self.subcatchments
            .get_mut(index.value())
            .ok_or(SwmmError::SubcatchmentIndexNotFound)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        name: &str,
        area: f64,
        pct_imperv: f64,
        width: f64,
        slope: f64,
        curb_length: f64,
        sub_areas: [SubArea; 3],
        n_pollutants: usize,
        n_land_uses: usize,
    ) -> Result<SubcatchmentIndex, SwmmError> {
        let index = SubcatchmentIndex::new(self.subcatchments.len());
        let sc = Subcatchment::new(
            index,
            name,
            area,
            pct_imperv,
            width,
            slope,
            curb_length,
            sub_areas,
            n_pollutants,
            n_land_uses,
        )?;
        self.subcatchments.push(sc);
        Ok(index)
    }

    pub fn index_by_name(&self, name: &str) -> Option<SubcatchmentIndex> {
        self.subcatchments.iter().position(|s| s.name == name).map(SubcatchmentIndex::new)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn flat_sub_areas() -> [SubArea; 3] {
        [
            SubArea::new(SubAreaKind::Imperv0, 0.015, 0.0, 0.3, 5.0, RouteTo::Outlet, 1.0),
            SubArea::new(SubAreaKind::Imperv1, 0.015, 0.05 / 12.0, 0.2, 5.0, RouteTo::Outlet, 1.0),
            SubArea::new(SubAreaKind::Perv, 0.25, 0.1 / 12.0, 0.5, 1.0, RouteTo::Outlet, 1.0),
        ]
    }

    #[test]
    fn test_invalid_fraction_sum_rejected() {
        let mut areas = flat_sub_areas();
        areas[0].f_area = 0.9;
        let r = Subcatchment::new(SubcatchmentIndex::new(0), "S1", 43560.0, 0.3, 500.0, 0.01, 100.0, areas, 0, 0);
        assert!(r.is_err());
    }

    #[test]
    fn test_constant_rain_produces_runoff_eventually() {
        let mut sc = Subcatchment::new(
            SubcatchmentIndex::new(0),
            "S1",
            43560.0,
            0.3,
            500.0,
            0.01,
            100.0,
            flat_sub_areas(),
            0,
            0,
        )
        .unwrap();

        let rain = 1.0 / 3600.0; // 1 in/hr in ft/sec
        for _ in 0..200 {
            sc.set_old_state();
            sc.compute_runoff(60.0, rain, 0.0, 0.0);
        }
        assert!(sc.new_runoff > 0.0);
    }

    #[test]
    fn test_no_rain_no_runoff() {
        let mut sc = Subcatchment::new(
            SubcatchmentIndex::new(0),
            "S1",
            43560.0,
            0.3,
            500.0,
            0.01,
            100.0,
            flat_sub_areas(),
            0,
            0,
        )
        .unwrap();
        sc.compute_runoff(60.0, 0.0, 0.0, 0.0);
        assert_eq!(sc.new_runoff, 0.0);
    }

    #[test]
    fn test_runon_from_upstream_subcatchment() {
        let mut b = Subcatchment::new(
            SubcatchmentIndex::new(1),
            "B",
            43560.0,
            1.0,
            500.0,
            0.01,
            100.0,
            [
                SubArea::new(SubAreaKind::Imperv0, 0.015, 0.0, 1.0, 5.0, RouteTo::Outlet, 1.0),
                SubArea::new(SubAreaKind::Imperv1, 0.015, 0.0, 0.0, 5.0, RouteTo::Outlet, 1.0),
                SubArea::new(SubAreaKind::Perv, 0.25, 0.0, 0.0, 1.0, RouteTo::Outlet, 1.0),
            ],
            0,
            0,
        )
        .unwrap();

        // B's upstream runoff, normalized to ft/s over B's non-LID area (§4.3 step 1).
        b.runon = 0.01;
        b.compute_runoff(60.0, 0.0, 0.0, 0.0);
        assert!(b.new_runoff > 0.0);
    }
}
