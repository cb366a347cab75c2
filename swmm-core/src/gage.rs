//! Rain gages (§3 catalogs, §6 collaborator contract).
//!
//! spec.md lists "rainfall gage interpolation" among the out-of-scope sub-systems
//! (§1) and only specifies the contract the runoff engine consumes: `getPrecip(gage,
//! t) -> (rain, snow)` and `getNextRainDate(gage, t) -> t'`. This module is the
//! concrete catalog entry and the minimal time-series lookup behind that contract — not
//! a gage-interpolation engine (no areal averaging between multiple gages, no
//! disaggregation of coarse time series).

use crate::define_index;
use chrono::NaiveDateTime;

define_index!(GageIndex);

/// One recorded rainfall intensity valid from `start` until the next record (or
/// indefinitely, for the last record).
#[derive(Debug, Clone, Copy)]
pub struct RainRecord {
    pub start: NaiveDateTime,
    /// Rainfall intensity, in/hr.
    pub intensity: f64,
}

#[derive(Debug, Clone)]
pub struct RainGage {
    pub index: GageIndex,
    pub name: String,
    /// Time series of rainfall intensity, sorted ascending by `start`.
    records: Vec<RainRecord>,
}

impl RainGage {
    pub fn new(index: GageIndex, name: &str, mut records: Vec<RainRecord>) -> Self {
        records.sort_by_key(|r| r.start);
        Self {
            index,
            name: name.to_string(),
            records,
        }
    }

    /// `getPrecip`: the (rain, snow) rate active at time `t`, in/hr. Snow is always
    /// zero here — temperature-driven rain/snow splitting belongs to the snowpack
    /// collaborator (§6), not the gage.
    pub fn get_precip(&self, t: NaiveDateTime) -> (f64, f64) {
        (self.intensity_at(t), 0.0)
    }

    fn intensity_at(&self, t: NaiveDateTime) -> f64 {
        match self.records.partition_point(|r| r.start <= t) {
            0 => 0.0,
            i => self.records[i - 1].intensity,
        }
    }

    /// `getNextRainDate`: the next time at which rainfall starts (for a currently-dry
    /// gage) or the next time the recorded intensity changes, whichever the step
    /// controller needs to bound `maxStep` by (§4.5).
    pub fn get_next_rain_date(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        self.records.iter().find(|r| r.start > t).map(|r| r.start)
    }

    pub fn is_raining(&self, t: NaiveDateTime) -> bool {
        self.intensity_at(t) > 0.0
    }
}

#[derive(Default)]
pub struct GageVec {
    gages: Vec<RainGage>,
}

impl std::ops::Deref for GageVec {
    type Target = Vec<RainGage>;

    fn deref(&self) -> &Self::Target {
        &self.gages
    }
}

impl GageVec {
    pub fn push(&mut self, name: &str, records: Vec<RainRecord>) -> GageIndex {
        let index = GageIndex::new(self.gages.len());
        self.gages.push(RainGage::new(index, name, records));
        index
    }

    pub fn get(&self, index: &GageIndex) -> Option<&RainGage> {
        self.gages.get(index.value())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_constant_rain() {
        let records = vec![RainRecord {
            start: dt("2021-01-01 00:00:00"),
            intensity: 0.5,
        }];
        let gage = RainGage::new(GageIndex::new(0), "G1", records);
        assert_eq!(gage.get_precip(dt("2021-01-01 00:30:00")).0, 0.5);
        assert!(gage.is_raining(dt("2021-01-01 00:30:00")));
        assert_eq!(gage.get_next_rain_date(dt("2021-01-01 00:30:00")), None);
    }

    #[test]
    fn test_dry_before_first_record() {
        let records = vec![RainRecord {
            start: dt("2021-01-01 01:00:00"),
            intensity: 0.5,
        }];
        let gage = RainGage::new(GageIndex::new(0), "G1", records);
        assert_eq!(gage.get_precip(dt("2021-01-01 00:00:00")).0, 0.0);
        assert_eq!(
            gage.get_next_rain_date(dt("2021-01-01 00:00:00")),
            Some(dt("2021-01-01 01:00:00"))
        );
    }

    #[test]
    fn test_rain_stops_at_zero_record() {
        let records = vec![
            RainRecord {
                start: dt("2021-01-01 00:00:00"),
                intensity: 0.5,
            },
            RainRecord {
                start: dt("2021-01-01 01:00:00"),
                intensity: 0.0,
            },
        ];
        let gage = RainGage::new(GageIndex::new(0), "G1", records);
        assert!(!gage.is_raining(dt("2021-01-01 01:30:00")));
    }
}
