//! The runoff step controller (§4.4, §4.5).
//!
//! Unlike routing, which always advances by a fixed interval, the runoff engine picks
//! its own step length every time it runs: short while any gage is actively raining or
//! any subcatchment still has ponded water draining (the "wet" step), long the rest of
//! the time (the "dry" step), and always clamped short enough that it never steps past
//! the next change in rainfall or evaporation. Grounded on the teacher's `Timestepper`
//! duration policy (`timestep.rs` in this crate already generalizes the *mechanism*;
//! this module is the policy that decides what duration to feed it) and, for the
//! evaporation collaborator boundary, on the same `Null*`-default pattern used in
//! [`crate::collaborators`].

use crate::error::SwmmError;
use crate::gage::GageVec;
use crate::node::NodeVec;
use crate::routing;
use crate::subcatchment::{SubcatchmentIndex, SubcatchmentVec};
use crate::timestep::{Clock, SimDuration};
use chrono::NaiveDateTime;

/// Rain gages report intensity in in/hr (§3); the runoff water balance works entirely
/// in ft/sec, so every rate pulled from a gage must be converted at the boundary.
fn in_per_hr_to_ft_per_sec(v: f64) -> f64 {
    v / 12.0 / 3600.0
}

/// `getEvaporation` (§6): the evaporation rate active at time `t`, ft/sec, and the next
/// time it is scheduled to change (bounding `maxStep`, §4.5). Evaporation series
/// interpolation is out of scope (§1) beyond this contract.
pub trait EvaporationSource: Send + Sync {
    fn get_evap(&self, t: NaiveDateTime) -> f64;
    fn get_next_evap_change(&self, t: NaiveDateTime) -> Option<NaiveDateTime>;
}

/// A fixed evaporation rate that never changes, for demo projects and tests that don't
/// need a real evaporation time series.
pub struct ConstantEvaporation {
    rate: f64,
}

impl ConstantEvaporation {
    /// `rate_in_per_day`: evaporation rate, in/day (the conventional SWMM input unit),
    /// converted internally to ft/sec.
    pub fn new(rate_in_per_day: f64) -> Self {
        Self {
            rate: rate_in_per_day / 12.0 / 86400.0,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0)
    }
}

impl EvaporationSource for ConstantEvaporation {
    fn get_evap(&self, _t: NaiveDateTime) -> f64 {
        self.rate
    }

    fn get_next_evap_change(&self, _t: NaiveDateTime) -> Option<NaiveDateTime> {
        None
    }
}

/// Drives the §4.4/§4.5 step-selection policy. `wet_step`/`dry_step` are the two base
/// intervals; the controller picks between them and then clamps to the next rain/evap
/// change and to the clock's remaining time.
#[derive(Debug, Clone, Copy)]
pub struct RunoffStepController {
    pub wet_step: SimDuration,
    pub dry_step: SimDuration,
    /// Length (seconds) of the runoff step most recently run, used by §4.7's outfall
    /// re-routing, which always re-spreads the *previous* step's outfall flooding.
    prev_tstep: f64,
}

impl RunoffStepController {
    pub fn new(wet_step: SimDuration, dry_step: SimDuration) -> Self {
        Self {
            wet_step,
            dry_step,
            prev_tstep: 0.0,
        }
    }

    fn any_gage_raining(&self, gages: &GageVec, t: NaiveDateTime) -> bool {
        gages.iter().any(|g| g.is_raining(t))
    }

    fn any_subcatchment_wet(&self, subcatchments: &SubcatchmentVec) -> bool {
        subcatchments.iter().any(|s| s.has_active_runoff())
    }

    /// §4.5: `base = wetStep if (any gage raining or any subcatchment still draining)
    /// else dryStep`; `bound = min(dryStep, nextEvapChange, min over gages of
    /// nextRainChange)`; `step = min(base, bound)`, clamped by the clock to the end of
    /// the run. The `bound` side deliberately uses `dryStep` (not `base`) as its own
    /// ceiling: a wet step must still be allowed to run its full `wetStep` length when
    /// nothing changes sooner, but it may never run *past* `dryStep` without first
    /// checking whether conditions have dried out.
    pub fn compute_step(
        &self,
        clock: &Clock,
        gages: &GageVec,
        evap: &dyn EvaporationSource,
        subcatchments: &SubcatchmentVec,
    ) -> SimDuration {
        let now = clock.now();
        let is_wet = self.any_gage_raining(gages, now) || self.any_subcatchment_wet(subcatchments);
        let base = if is_wet { self.wet_step } else { self.dry_step };

        let mut bound = self.dry_step;
        if let Some(next_evap) = evap.get_next_evap_change(now) {
            let d = SimDuration::from((next_evap - now).max(chrono::TimeDelta::zero()));
            if d.seconds() < bound.seconds() {
                bound = d;
            }
        }
        for gage in gages.iter() {
            if let Some(next_rain) = gage.get_next_rain_date(now) {
                let d = SimDuration::from((next_rain - now).max(chrono::TimeDelta::zero()));
                if d.seconds() < bound.seconds() {
                    bound = d;
                }
            }
        }

        let step = if base.seconds() < bound.seconds() { base } else { bound };
        let remaining = clock.time_remaining();
        if step.seconds() > remaining.seconds() {
            remaining
        } else {
            step
        }
    }

    /// Run one runoff step across every subcatchment in catalog order (§4.3, §4.4):
    /// `setOldState`, determine the step length, re-route the previous step's outfall
    /// flooding and cross-subcatchment runon, evaluate each subcatchment's water
    /// balance, and return the step length actually used (zero subcatchments, or a
    /// clock already at `end`, yields a zero-length step and performs no work, leaving
    /// `prev_tstep` untouched).
    pub fn run_runoff_step(
        &mut self,
        clock: &Clock,
        gages: &GageVec,
        evap: &dyn EvaporationSource,
        nodes: &mut NodeVec,
        subcatchments: &mut SubcatchmentVec,
    ) -> Result<SimDuration, SwmmError> {
        let tstep = self.compute_step(clock, gages, evap, subcatchments);
        if tstep.is_zero() {
            return Ok(tstep);
        }

        for sc in subcatchments.iter_mut() {
            sc.set_old_state();
        }

        // §4.7: outfalls that flooded last step re-spread that flow back onto the
        // subcatchments draining to them, scaled by the previous step's length.
        routing::route_outfalls(nodes, subcatchments, self.prev_tstep)?;

        // §4.3 step 1: subcatchments draining to another subcatchment (rather than
        // straight to the conveyance network) contribute their previous step's runoff
        // as runon, normalized to ft/sec over the receiving subcatchment's non-LID
        // area. Accumulate on top of whatever route_outfalls has already deposited.
        let carries: Vec<(SubcatchmentIndex, f64)> = subcatchments
            .iter()
            .filter_map(|sc| sc.outlet.map(|dest| (dest, sc.old_runoff)))
            .collect();
        for (dest, old_runoff) in carries {
            if old_runoff <= 0.0 {
                continue;
            }
            if let Ok(downstream) = subcatchments.get_mut(&dest) {
                let area = downstream.non_lid_area();
                if area > 0.0 {
                    downstream.runon += old_runoff / area;
                }
            }
        }

        let now = clock.now();
        let evap_rate = evap.get_evap(now);

        for sc in subcatchments.iter_mut() {
            let (precip, snow) = match sc.gage {
                Some(gage_idx) => gages
                    .get(&gage_idx)
                    .map(|g| {
                        let (p, s) = g.get_precip(now);
                        (in_per_hr_to_ft_per_sec(p), in_per_hr_to_ft_per_sec(s))
                    })
                    .unwrap_or((0.0, 0.0)),
                None => (0.0, 0.0),
            };
            sc.compute_runoff(tstep.seconds(), precip, snow, evap_rate);
            sc.runon = 0.0;
        }

        self.prev_tstep = tstep.seconds();
        Ok(tstep)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gage::{GageVec, RainRecord};
    use crate::subcatchment::{SubArea, SubAreaKind, SubcatchmentVec};

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn flat_sub_areas() -> [SubArea; 3] {
        [
            SubArea::new(SubAreaKind::Imperv0, 0.015, 0.0, 1.0, 5.0, crate::subcatchment::RouteTo::Outlet, 1.0),
            SubArea::new(SubAreaKind::Imperv1, 0.015, 0.0, 0.0, 5.0, crate::subcatchment::RouteTo::Outlet, 1.0),
            SubArea::new(SubAreaKind::Perv, 0.25, 0.0, 0.0, 1.0, crate::subcatchment::RouteTo::Outlet, 1.0),
        ]
    }

    #[test]
    fn test_dry_step_used_when_nothing_is_wet() {
        let controller = RunoffStepController::new(SimDuration::from_seconds(300.0), SimDuration::from_seconds(3600.0));
        let clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-02 00:00:00"));
        let gages = GageVec::default();
        let subcatchments = SubcatchmentVec::default();
        let evap = ConstantEvaporation::zero();

        let step = controller.compute_step(&clock, &gages, &evap, &subcatchments);
        assert_eq!(step.seconds(), 3600.0);
    }

    #[test]
    fn test_wet_step_used_while_gage_is_raining() {
        let controller = RunoffStepController::new(SimDuration::from_seconds(300.0), SimDuration::from_seconds(3600.0));
        let clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-02 00:00:00"));
        let mut gages = GageVec::default();
        gages.push(
            "G1",
            vec![RainRecord {
                start: dt("2021-01-01 00:00:00"),
                intensity: 1.0,
            }],
        );
        let subcatchments = SubcatchmentVec::default();
        let evap = ConstantEvaporation::zero();

        let step = controller.compute_step(&clock, &gages, &evap, &subcatchments);
        assert_eq!(step.seconds(), 300.0);
    }

    #[test]
    fn test_step_clamped_to_next_rain_change() {
        let controller = RunoffStepController::new(SimDuration::from_seconds(300.0), SimDuration::from_seconds(3600.0));
        let clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-02 00:00:00"));
        let mut gages = GageVec::default();
        gages.push(
            "G1",
            vec![RainRecord {
                start: dt("2021-01-01 00:10:00"),
                intensity: 1.0,
            }],
        );
        let subcatchments = SubcatchmentVec::default();
        let evap = ConstantEvaporation::zero();

        // Dry now, but rain starts in 600s, which is shorter than the 3600s dry step.
        let step = controller.compute_step(&clock, &gages, &evap, &subcatchments);
        assert_eq!(step.seconds(), 600.0);
    }

    #[test]
    fn test_step_clamped_to_clock_end() {
        let controller = RunoffStepController::new(SimDuration::from_seconds(300.0), SimDuration::from_seconds(3600.0));
        let clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-01 00:10:00"));
        let gages = GageVec::default();
        let subcatchments = SubcatchmentVec::default();
        let evap = ConstantEvaporation::zero();

        let step = controller.compute_step(&clock, &gages, &evap, &subcatchments);
        assert_eq!(step.seconds(), 600.0);
    }

    #[test]
    fn test_run_runoff_step_advances_subcatchment() {
        let mut controller = RunoffStepController::new(SimDuration::from_seconds(60.0), SimDuration::from_seconds(3600.0));
        let clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-01 01:00:00"));
        let mut gages = GageVec::default();
        let gage = gages.push(
            "G1",
            vec![RainRecord {
                start: dt("2021-01-01 00:00:00"),
                intensity: 1.0,
            }],
        );
        let mut subcatchments = SubcatchmentVec::default();
        let idx = subcatchments
            .push("S1", 43560.0, 1.0, 500.0, 0.01, 100.0, flat_sub_areas(), 0, 0)
            .unwrap();
        subcatchments.get_mut(&idx).unwrap().gage = Some(gage);
        let evap = ConstantEvaporation::zero();
        let mut nodes = crate::node::NodeVec::default();

        let step = controller
            .run_runoff_step(&clock, &gages, &evap, &mut nodes, &mut subcatchments)
            .unwrap();
        assert!(step.seconds() > 0.0);
        assert!(subcatchments.get(&idx).unwrap().rainfall_volume > 0.0);
    }

    #[test]
    fn test_run_runoff_step_propagates_cross_subcatchment_runon() {
        let mut controller = RunoffStepController::new(SimDuration::from_seconds(60.0), SimDuration::from_seconds(3600.0));
        let clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-01 02:00:00"));
        let mut gages = GageVec::default();
        let gage = gages.push(
            "G1",
            vec![RainRecord {
                start: dt("2021-01-01 00:00:00"),
                intensity: 2.0,
            }],
        );
        let mut subcatchments = SubcatchmentVec::default();
        let upstream = subcatchments
            .push("A", 43560.0, 1.0, 500.0, 0.01, 100.0, flat_sub_areas(), 0, 0)
            .unwrap();
        let downstream = subcatchments
            .push("B", 43560.0, 1.0, 500.0, 0.01, 100.0, flat_sub_areas(), 0, 0)
            .unwrap();
        subcatchments.get_mut(&upstream).unwrap().gage = Some(gage);
        subcatchments.get_mut(&upstream).unwrap().outlet = Some(downstream);
        let evap = ConstantEvaporation::zero();
        let mut nodes = crate::node::NodeVec::default();

        // Run enough steps for the upstream subcatchment to start producing runoff,
        // then confirm it shows up as runon on the downstream one the step after.
        for _ in 0..120 {
            controller
                .run_runoff_step(&clock, &gages, &evap, &mut nodes, &mut subcatchments)
                .unwrap();
            if subcatchments.get(&upstream).unwrap().old_runoff > 0.0 {
                break;
            }
        }
        assert!(subcatchments.get(&upstream).unwrap().old_runoff > 0.0);

        controller
            .run_runoff_step(&clock, &gages, &evap, &mut nodes, &mut subcatchments)
            .unwrap();
        assert!(subcatchments.get(&downstream).unwrap().outflow_volume > 0.0);
    }
}
