//! Ponded-depth integration (§4.4).
//!
//! `dD/dt = i(t) - alpha * max(D - dStore, 0)^(5/3)`, with `i` constant over the step.
//! The integrator only runs for the portion of the step during which `D > dStore`; the
//! initial dry portion (where the sub-area is simply filling its depression storage) is
//! advanced linearly, exactly as §4.4 specifies. "Runge-Kutta family, collaborator"
//! is implemented here as an adaptive RK4 with step-doubling error control, the
//! step-halving idiom this shape of equation is conventionally solved with.

pub const ODETOL: f64 = 1e-4;
const MIN_SUBSTEP: f64 = 1e-6;

/// Result of integrating one subcatchment sub-area's ponded depth over a step.
#[derive(Debug, Clone, Copy)]
pub struct OdeResult {
    /// Depth at the end of the step.
    pub depth: f64,
    /// Duration, in seconds, during which `depth > d_store` — used to compute runoff
    /// (§4.4: "the returned `tx`... is used to compute runoff").
    pub tx: f64,
}

fn derivative(depth: f64, d_store: f64, alpha: f64, inflow: f64) -> f64 {
    let excess = (depth - d_store).max(0.0);
    inflow - alpha * excess.powf(5.0 / 3.0)
}

/// One RK4 step of size `h` starting from `depth`.
fn rk4_step(depth: f64, d_store: f64, alpha: f64, inflow: f64, h: f64) -> f64 {
    let k1 = derivative(depth, d_store, alpha, inflow);
    let k2 = derivative(depth + 0.5 * h * k1, d_store, alpha, inflow);
    let k3 = derivative(depth + 0.5 * h * k2, d_store, alpha, inflow);
    let k4 = derivative(depth + h * k3, d_store, alpha, inflow);
    depth + h / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4)
}

/// Integrate the wet portion of the step (`depth > d_store` throughout) by adaptive
/// step-doubling RK4: take one step of `h` and two steps of `h/2`; if they disagree by
/// more than [`ODETOL`], halve `h` and retry.
fn integrate_wet(mut depth: f64, d_store: f64, alpha: f64, inflow: f64, duration: f64) -> f64 {
    if duration <= 0.0 {
        return depth;
    }
    let mut remaining = duration;
    let mut h = duration;

    while remaining > 0.0 {
        h = h.min(remaining);
        let coarse = rk4_step(depth, d_store, alpha, inflow, h);
        let half = rk4_step(depth, d_store, alpha, inflow, h / 2.0);
        let fine = rk4_step(half, d_store, alpha, inflow, h / 2.0);

        if (fine - coarse).abs() <= ODETOL || h <= MIN_SUBSTEP {
            depth = fine.max(0.0);
            remaining -= h;
            // Growing the step back up keeps subsequent passes from over-refining once
            // the solution has settled.
            h = (h * 1.5).min(remaining.max(h));
        } else {
            h *= 0.5;
        }
    }
    depth
}

/// Integrate one sub-area's ponded depth over `tstep` seconds given a step-constant
/// inflow rate `inflow` (ft/sec), depression storage `d_store` and reservoir
/// coefficient `alpha`.
pub fn integrate_ponded_depth(depth0: f64, d_store: f64, alpha: f64, inflow: f64, tstep: f64) -> OdeResult {
    if tstep <= 0.0 {
        return OdeResult { depth: depth0.max(0.0), tx: 0.0 };
    }

    if depth0 > d_store {
        let depth = integrate_wet(depth0, d_store, alpha, inflow, tstep);
        return OdeResult {
            depth: depth.max(0.0),
            tx: tstep,
        };
    }

    // Dry portion: depth rises (or falls, if inflow is negative) linearly until either
    // the step ends or depression storage fills.
    if inflow <= 0.0 {
        let depth = (depth0 + inflow * tstep).max(0.0);
        return OdeResult { depth, tx: 0.0 };
    }

    let t_to_fill = (d_store - depth0) / inflow;
    if t_to_fill >= tstep {
        OdeResult {
            depth: depth0 + inflow * tstep,
            tx: 0.0,
        }
    } else {
        let wet_duration = tstep - t_to_fill;
        let depth = integrate_wet(d_store, d_store, alpha, inflow, wet_duration);
        OdeResult {
            depth: depth.max(0.0),
            tx: wet_duration,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_dry_step_never_reaches_dstore() {
        let r = integrate_ponded_depth(0.0, 0.05 / 12.0, 50.0, 1e-6, 10.0);
        assert!(r.depth <= 0.05 / 12.0 + 1e-9);
        assert_eq!(r.tx, 0.0);
    }

    #[test]
    fn test_zero_inflow_no_ponding_drains_to_dstore() {
        // With no inflow a sub-area above dStore should drain back towards dStore, not
        // go negative or diverge.
        let r = integrate_ponded_depth(0.01, 0.05 / 12.0, 50.0, 0.0, 600.0);
        assert!(r.depth >= 0.0);
        assert!(r.depth <= 0.01);
    }

    #[test]
    fn test_steady_state_runoff_balances_inflow() {
        // At equilibrium alpha * (D - dStore)^(5/3) == inflow; integrate long enough
        // from rest to approach that depth and check the runoff formula balances.
        let alpha = 1.0;
        let d_store = 0.0;
        let inflow = 1e-5;
        let mut depth = 0.0;
        for _ in 0..2000 {
            let r = integrate_ponded_depth(depth, d_store, alpha, inflow, 5.0);
            depth = r.depth;
        }
        let runoff = alpha * (depth - d_store).max(0.0).powf(5.0 / 3.0);
        assert!(approx_eq!(f64, runoff, inflow, epsilon = 1e-3));
    }

    #[test]
    fn test_depth_never_negative() {
        let r = integrate_ponded_depth(0.0, 0.01, 10.0, -1e-4, 60.0);
        assert!(r.depth >= 0.0);
    }
}
