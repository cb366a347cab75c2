//! Conduit cross-section geometry (§4.6.2, §6, SPEC_FULL.md §3).
//!
//! spec.md names the geometry collaborator methods `getAofY`/`getYofA`/`getAofS` and
//! says the steady-flow link solver must "invert the rating `q = β·S(A)` via the
//! cross-section table" — i.e. area and conveyance are not closed-form invertible in
//! general, so they are tabulated at a fixed number of depth increments and the inverse
//! is found by interpolating the table. `CircularXSect` is the one shape this core
//! implements in closed form for table construction; other shapes are a natural
//! extension of the same `XSect` representation (SPEC_FULL.md §3).

const TABLE_STEPS: usize = 200;

/// A tabulated conduit cross-section.
///
/// The table stores, at `TABLE_STEPS + 1` evenly spaced depth fractions `y/D`, the
/// corresponding area fraction `A/A_full` and hydraulic-radius fraction `R/R_full`.
/// Conveyance (`A * R^(2/3)`) is derived from those two columns, never stored
/// separately, so the table cannot go out of sync with the area/radius columns.
#[derive(Debug, Clone)]
pub struct XSect {
    full_depth: f64,
    full_area: f64,
    full_hyd_radius: f64,
    /// area fraction at each tabulated depth fraction, monotonically increasing
    area_frac: Vec<f64>,
    /// hydraulic radius fraction at each tabulated depth fraction
    radius_frac: Vec<f64>,
}

impl XSect {
    /// Build a circular conduit cross-section of the given diameter (ft).
    pub fn circular(diameter: f64) -> Self {
        let full_area = std::f64::consts::PI / 4.0 * diameter * diameter;
        let full_perimeter = std::f64::consts::PI * diameter;
        let full_hyd_radius = full_area / full_perimeter;

        let mut area_frac = Vec::with_capacity(TABLE_STEPS + 1);
        let mut radius_frac = Vec::with_capacity(TABLE_STEPS + 1);

        for i in 0..=TABLE_STEPS {
            let y_frac = i as f64 / TABLE_STEPS as f64;
            let y = y_frac * diameter;
            let (area, perimeter) = circular_segment(diameter, y);
            let hyd_radius = if perimeter > 0.0 { area / perimeter } else { 0.0 };
            area_frac.push(area / full_area);
            radius_frac.push(if full_hyd_radius > 0.0 {
                hyd_radius / full_hyd_radius
            } else {
                0.0
            });
        }
        // Guarantee monotonicity despite floating point noise near y = D.
        for i in 1..area_frac.len() {
            if area_frac[i] < area_frac[i - 1] {
                area_frac[i] = area_frac[i - 1];
            }
        }

        Self {
            full_depth: diameter,
            full_area,
            full_hyd_radius,
            area_frac,
            radius_frac,
        }
    }

    pub fn full_depth(&self) -> f64 {
        self.full_depth
    }

    pub fn full_area(&self) -> f64 {
        self.full_area
    }

    /// `getAofY`: area at a given depth.
    pub fn area_of_depth(&self, y: f64) -> f64 {
        let y_frac = (y / self.full_depth).clamp(0.0, 1.0);
        interpolate(&self.area_frac, y_frac) * self.full_area
    }

    /// `getYofA`: depth at a given area, by inverting the tabulated area column.
    pub fn depth_of_area(&self, a: f64) -> f64 {
        let a_frac = (a / self.full_area).clamp(0.0, 1.0);
        interpolate_inverse(&self.area_frac, a_frac) * self.full_depth
    }

    fn conveyance_of_depth(&self, y: f64) -> f64 {
        let y_frac = (y / self.full_depth).clamp(0.0, 1.0);
        let a = interpolate(&self.area_frac, y_frac) * self.full_area;
        let r = interpolate(&self.radius_frac, y_frac) * self.full_hyd_radius;
        a * r.powf(2.0 / 3.0)
    }

    /// `getAofS`: the area whose conveyance matches a target section factor `s`,
    /// found by bisecting the tabulated depth range since conveyance is monotone
    /// increasing in depth.
    pub fn area_of_conveyance(&self, s: f64) -> f64 {
        if s <= 0.0 {
            return 0.0;
        }
        let full_conveyance = self.conveyance_of_depth(self.full_depth);
        if s >= full_conveyance {
            return self.full_area;
        }
        let (mut lo, mut hi) = (0.0_f64, self.full_depth);
        for _ in 0..40 {
            let mid = 0.5 * (lo + hi);
            if self.conveyance_of_depth(mid) < s {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        self.area_of_depth(0.5 * (lo + hi))
    }

    /// Manning's-equation full-flow capacity `q_full` (§3), using the US customary
    /// constant 1.486 and Manning's roughness `n`.
    pub fn full_flow_capacity(&self, roughness: f64, slope: f64) -> f64 {
        if roughness <= 0.0 || slope <= 0.0 {
            return 0.0;
        }
        (1.486 / roughness) * self.full_area * self.full_hyd_radius.powf(2.0 / 3.0) * slope.sqrt()
    }

    /// Section factor `S(A) = Q * n / (1.486 * sqrt(slope))` inverted back to an area,
    /// i.e. `getAofS` parameterised directly by a target flow (§4.6.2's "invert the
    /// rating q = β·S(A)").
    pub fn area_of_flow(&self, q: f64, roughness: f64, slope: f64) -> f64 {
        if roughness <= 0.0 || slope <= 0.0 {
            return self.full_area;
        }
        let target_conveyance = q * roughness / (1.486 * slope.sqrt());
        self.area_of_conveyance(target_conveyance)
    }
}

/// Area and wetted perimeter of a circular segment of diameter `d` filled to depth `y`.
fn circular_segment(d: f64, y: f64) -> (f64, f64) {
    if y <= 0.0 {
        return (0.0, 0.0);
    }
    let r = d / 2.0;
    if y >= d {
        return (std::f64::consts::PI * r * r, std::f64::consts::PI * d);
    }
    // Central half-angle subtended by the water surface chord.
    let theta = 2.0 * ((r - y) / r).clamp(-1.0, 1.0).acos();
    let area = r * r * (theta - theta.sin()) / 2.0;
    let perimeter = r * theta;
    (area, perimeter)
}

/// Linear interpolation of `table` at depth fraction `x` in [0, 1], `table` indexed by
/// `i / TABLE_STEPS`.
fn interpolate(table: &[f64], x: f64) -> f64 {
    let n = table.len() - 1;
    let pos = x * n as f64;
    let i0 = pos.floor() as usize;
    let i0 = i0.min(n.saturating_sub(1));
    let frac = pos - i0 as f64;
    table[i0] + (table[i0 + 1] - table[i0]) * frac
}

/// Inverse lookup: find the fraction `x` such that `interpolate(table, x) == value`,
/// given `table` is non-decreasing.
fn interpolate_inverse(table: &[f64], value: f64) -> f64 {
    let n = table.len() - 1;
    match table.binary_search_by(|v| v.partial_cmp(&value).unwrap()) {
        Ok(i) => i as f64 / n as f64,
        Err(i) => {
            if i == 0 {
                0.0
            } else if i > n {
                1.0
            } else {
                let lo = table[i - 1];
                let hi = table[i];
                let frac = if hi > lo { (value - lo) / (hi - lo) } else { 0.0 };
                (i - 1) as f64 / n as f64 + frac / n as f64
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_full_depth_gives_full_area() {
        let x = XSect::circular(2.0);
        assert!(approx_eq!(f64, x.area_of_depth(2.0), x.full_area(), epsilon = 1e-6));
        assert!(approx_eq!(f64, x.area_of_depth(0.0), 0.0, epsilon = 1e-9));
    }

    #[test]
    fn test_area_depth_round_trip() {
        let x = XSect::circular(3.0);
        for y in [0.1, 0.5, 1.0, 1.5, 2.0, 2.9] {
            let a = x.area_of_depth(y);
            let y2 = x.depth_of_area(a);
            assert!((y2 - y).abs() < 0.02, "y={y} y2={y2}");
        }
    }

    #[test]
    fn test_full_flow_capacity_positive() {
        let x = XSect::circular(1.0);
        let q = x.full_flow_capacity(0.015, 0.01);
        assert!(q > 0.0);
    }

    #[test]
    fn test_area_of_flow_inverts_full_flow() {
        let x = XSect::circular(1.0);
        let q_full = x.full_flow_capacity(0.013, 0.005);
        let a = x.area_of_flow(q_full, 0.013, 0.005);
        assert!((a - x.full_area()).abs() / x.full_area() < 0.02);
    }
}
