//! The binary results store (§4.2).
//!
//! A single file with three logical regions written in a fixed order: a **prologue**
//! (magic, version, catalog sizes, reported-object names, per-object static inputs, and
//! the result-variable code lists), a **per-period block stream** of fixed-width
//! records, and an **epilogue** (region offsets, period count, terminal error code,
//! trailing magic). Grounded on the teacher's `recorders::csv` "open once, append a
//! record per timestep, close once" shape (`recorders/csv.rs`), generalized from a text
//! CSV stream to a fixed-width binary layout so every period can be randomly addressed
//! by arithmetic alone — §4.2 is explicit that "an implementer MUST NOT scan".

use crate::error::SwmmError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

pub const MAGIC: &[u8] = b"SWMM5-OUTPUT1";
pub const VERSION: i32 = 1;

/// Fixed count of system-wide result variables written every period (§6): TEMPERATURE,
/// RAINFALL, SNOWDEPTH, INFIL, RUNOFF, DWFLOW, GWFLOW, IIFLOW, EXFLOW, INFLOW,
/// FLOODING, OUTFLOW, STORAGE, EVAP, PET.
pub const MAX_SYS_RESULTS: usize = 15;

/// Number of fixed (non-pollutant) subcatchment result variables (§6): RAINFALL,
/// SNOWDEPTH, EVAP, INFIL, RUNOFF, GW_FLOW, GW_ELEV, SOIL_MOIST.
pub const N_FIXED_SUBCATCH_VARS: usize = 8;
/// Number of fixed node result variables (§6): DEPTH, HEAD, VOLUME, LATFLOW, INFLOW,
/// OVERFLOW.
pub const N_FIXED_NODE_VARS: usize = 6;
/// Number of fixed link result variables (§6): FLOW, DEPTH, VELOCITY, VOLUME, CAPACITY.
pub const N_FIXED_LINK_VARS: usize = 5;

/// The greatest byte offset this store's random-access readers will seek to; legacy
/// SWMM output files are indexed with signed 32-bit offsets, so the projected file size
/// is bounded by that even though this implementation reads/writes through a 64-bit API
/// (§4.2 "Size guard").
pub const MAX_FILE_OFFSET: u64 = i32::MAX as u64;

/// Catalog sizes and reported-object identity needed to lay out the prologue and
/// compute every downstream offset.
#[derive(Debug, Clone)]
pub struct ResultsLayout {
    pub flow_unit_code: i32,
    pub n_pollutants: usize,
    pub subcatch_names: Vec<String>,
    pub node_names: Vec<String>,
    pub link_names: Vec<String>,
}

impl ResultsLayout {
    pub fn n_subcatch_vars(&self) -> usize {
        N_FIXED_SUBCATCH_VARS + self.n_pollutants
    }

    pub fn n_node_vars(&self) -> usize {
        N_FIXED_NODE_VARS + self.n_pollutants
    }

    pub fn n_link_vars(&self) -> usize {
        N_FIXED_LINK_VARS + self.n_pollutants
    }

    /// Bytes occupied by one period block (§4.2): the date plus every reported
    /// object's result vector plus the fixed system block.
    pub fn bytes_per_period(&self) -> u64 {
        let subcatch = self.subcatch_names.len() * self.n_subcatch_vars();
        let node = self.node_names.len() * self.n_node_vars();
        let link = self.link_names.len() * self.n_link_vars();
        (8 + (subcatch + node + link + MAX_SYS_RESULTS) * 4) as u64
    }

    fn write_names<W: Write>(w: &mut W, names: &[String]) -> Result<(), SwmmError> {
        w.write_i32::<LittleEndian>(names.len() as i32)?;
        for name in names {
            let bytes = name.as_bytes();
            w.write_i32::<LittleEndian>(bytes.len() as i32)?;
            w.write_all(bytes)?;
        }
        Ok(())
    }

    fn read_names<R: Read>(r: &mut R) -> Result<Vec<String>, SwmmError> {
        let n = r.read_i32::<LittleEndian>()?;
        let mut names = Vec::with_capacity(n.max(0) as usize);
        for _ in 0..n {
            let len = r.read_i32::<LittleEndian>()? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            names.push(String::from_utf8_lossy(&buf).into_owned());
        }
        Ok(names)
    }
}

/// Sequential writer for the results file. Opened once at the start of a run, fed one
/// period at a time in order, closed once at the end (§3 "Lifecycle": owned by the
/// project, closed exactly once on teardown).
pub struct ResultsWriter<W: Write + Seek> {
    writer: W,
    layout: ResultsLayout,
    prologue_offset: u64,
    period_start_offset: u64,
    periods_written: u64,
}

impl<W: Write + Seek> ResultsWriter<W> {
    /// Open the store and write the prologue. `expected_periods` is used only for the
    /// size guard (§4.2): the projected total file size is checked against
    /// [`MAX_FILE_OFFSET`] before any period is written.
    pub fn open(mut writer: W, layout: ResultsLayout, expected_periods: u64) -> Result<Self, SwmmError> {
        let prologue_offset = writer.stream_position()?;

        writer.write_all(MAGIC)?;
        writer.write_i32::<LittleEndian>(VERSION)?;
        writer.write_i32::<LittleEndian>(layout.flow_unit_code)?;
        writer.write_i32::<LittleEndian>(layout.n_pollutants as i32)?;
        ResultsLayout::write_names(&mut writer, &layout.subcatch_names)?;
        ResultsLayout::write_names(&mut writer, &layout.node_names)?;
        ResultsLayout::write_names(&mut writer, &layout.link_names)?;

        let period_start_offset = writer.stream_position()?;
        let bytes_per_period = layout.bytes_per_period();
        let projected_size = period_start_offset + bytes_per_period * expected_periods + epilogue_size();
        if projected_size > MAX_FILE_OFFSET {
            return Err(SwmmError::FileSize);
        }

        Ok(Self {
            writer,
            layout,
            prologue_offset,
            period_start_offset,
            periods_written: 0,
        })
    }

    /// Append one period's results. `subcatch`/`node`/`link` are flattened, reported-
    /// object-major vectors (each object's full result vector contiguous, in catalog
    /// order) and `system` is the fixed [`MAX_SYS_RESULTS`]-length system block.
    pub fn write_period(
        &mut self,
        date: f64,
        subcatch: &[f32],
        node: &[f32],
        link: &[f32],
        system: &[f32; MAX_SYS_RESULTS],
    ) -> Result<(), SwmmError> {
        debug_assert_eq!(subcatch.len(), self.layout.subcatch_names.len() * self.layout.n_subcatch_vars());
        debug_assert_eq!(node.len(), self.layout.node_names.len() * self.layout.n_node_vars());
        debug_assert_eq!(link.len(), self.layout.link_names.len() * self.layout.n_link_vars());

        self.writer.write_f64::<LittleEndian>(date)?;
        for &v in subcatch {
            self.writer.write_f32::<LittleEndian>(v)?;
        }
        for &v in node {
            self.writer.write_f32::<LittleEndian>(v)?;
        }
        for &v in link {
            self.writer.write_f32::<LittleEndian>(v)?;
        }
        for &v in system {
            self.writer.write_f32::<LittleEndian>(v)?;
        }
        self.periods_written += 1;
        Ok(())
    }

    /// Write the epilogue and finish the file (§4.2), handing back the underlying
    /// writer. `error_code` is the sticky project error code (§7), zero if the run
    /// completed cleanly; it is written even on a fatal run so downstream readers can
    /// detect a partial file.
    pub fn close(mut self, error_code: i32) -> Result<W, SwmmError> {
        let epilogue_offset = self.writer.stream_position()?;
        self.writer.write_u64::<LittleEndian>(self.prologue_offset)?;
        self.writer.write_u64::<LittleEndian>(self.period_start_offset)?;
        self.writer.write_u64::<LittleEndian>(epilogue_offset)?;
        self.writer.write_i32::<LittleEndian>(self.periods_written as i32)?;
        self.writer.write_i32::<LittleEndian>(error_code)?;
        self.writer.write_all(MAGIC)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

fn epilogue_size() -> u64 {
    // 3 x u64 offsets + period count (i32) + error code (i32) + trailing magic.
    (8 * 3 + 4 + 4 + MAGIC.len()) as u64
}

/// Random-access reader over a closed results file (§4.2). Every read computes its
/// seek position arithmetically from the period index and the object-class offsets
/// within a block; none of these methods scan.
pub struct ResultsReader<R: Read + Seek> {
    reader: R,
    layout: ResultsLayout,
    period_start_offset: u64,
    bytes_per_period: u64,
    pub n_periods: u64,
    pub error_code: i32,
}

impl<R: Read + Seek> ResultsReader<R> {
    pub fn open(mut reader: R) -> Result<Self, SwmmError> {
        reader.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if magic != *MAGIC {
            return Err(SwmmError::OutFile("bad prologue magic".to_string()));
        }
        let _version = reader.read_i32::<LittleEndian>()?;
        let flow_unit_code = reader.read_i32::<LittleEndian>()?;
        let n_pollutants = reader.read_i32::<LittleEndian>()? as usize;
        let subcatch_names = ResultsLayout::read_names(&mut reader)?;
        let node_names = ResultsLayout::read_names(&mut reader)?;
        let link_names = ResultsLayout::read_names(&mut reader)?;

        let layout = ResultsLayout {
            flow_unit_code,
            n_pollutants,
            subcatch_names,
            node_names,
            link_names,
        };
        let period_start_offset = reader.stream_position()?;
        let bytes_per_period = layout.bytes_per_period();

        reader.seek(SeekFrom::End(-(epilogue_size() as i64)))?;
        let _prologue_offset = reader.read_u64::<LittleEndian>()?;
        let _period_start_offset_check = reader.read_u64::<LittleEndian>()?;
        let _epilogue_offset = reader.read_u64::<LittleEndian>()?;
        let n_periods = reader.read_i32::<LittleEndian>()? as u64;
        let error_code = reader.read_i32::<LittleEndian>()?;
        let mut trailing_magic = [0u8; MAGIC.len()];
        reader.read_exact(&mut trailing_magic)?;
        if trailing_magic != *MAGIC {
            return Err(SwmmError::OutFile("bad epilogue magic".to_string()));
        }

        Ok(Self {
            reader,
            layout,
            period_start_offset,
            bytes_per_period,
            n_periods,
            error_code,
        })
    }

    pub fn layout(&self) -> &ResultsLayout {
        &self.layout
    }

    fn period_offset(&self, period: u64) -> u64 {
        self.period_start_offset + period * self.bytes_per_period
    }

    pub fn read_date_time(&mut self, period: u64) -> Result<f64, SwmmError> {
        self.reader.seek(SeekFrom::Start(self.period_offset(period)))?;
        Ok(self.reader.read_f64::<LittleEndian>()?)
    }

    fn read_vars_at(&mut self, offset: u64, n: usize) -> Result<Vec<f32>, SwmmError> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.reader.read_f32::<LittleEndian>()?);
        }
        Ok(values)
    }

    pub fn read_subcatch_results(&mut self, period: u64, reported_index: usize) -> Result<Vec<f32>, SwmmError> {
        let n_vars = self.layout.n_subcatch_vars();
        let offset = self.period_offset(period) + 8 + (reported_index * n_vars * 4) as u64;
        self.read_vars_at(offset, n_vars)
    }

    pub fn read_node_results(&mut self, period: u64, reported_index: usize) -> Result<Vec<f32>, SwmmError> {
        let n_subcatch_vars = self.layout.subcatch_names.len() * self.layout.n_subcatch_vars();
        let n_vars = self.layout.n_node_vars();
        let offset = self.period_offset(period) + 8 + (n_subcatch_vars * 4) as u64 + (reported_index * n_vars * 4) as u64;
        self.read_vars_at(offset, n_vars)
    }

    pub fn read_link_results(&mut self, period: u64, reported_index: usize) -> Result<Vec<f32>, SwmmError> {
        let n_subcatch_vars = self.layout.subcatch_names.len() * self.layout.n_subcatch_vars();
        let n_node_vars = self.layout.node_names.len() * self.layout.n_node_vars();
        let n_vars = self.layout.n_link_vars();
        let offset = self.period_offset(period)
            + 8
            + (n_subcatch_vars * 4) as u64
            + (n_node_vars * 4) as u64
            + (reported_index * n_vars * 4) as u64;
        self.read_vars_at(offset, n_vars)
    }

    pub fn read_system_results(&mut self, period: u64) -> Result<[f32; MAX_SYS_RESULTS], SwmmError> {
        let n_subcatch_vars = self.layout.subcatch_names.len() * self.layout.n_subcatch_vars();
        let n_node_vars = self.layout.node_names.len() * self.layout.n_node_vars();
        let n_link_vars = self.layout.link_names.len() * self.layout.n_link_vars();
        let offset =
            self.period_offset(period) + 8 + ((n_subcatch_vars + n_node_vars + n_link_vars) * 4) as u64;
        let values = self.read_vars_at(offset, MAX_SYS_RESULTS)?;
        let mut out = [0.0f32; MAX_SYS_RESULTS];
        out.copy_from_slice(&values);
        Ok(out)
    }
}

/// Per-period system-wide aggregation (§4.2): area-weighted means of rainfall,
/// evaporation, infiltration, and snow depth over subcatchments, guarded against a
/// zero total reported area (§8 boundary behavior: "Total reported area = 0 -> system-
/// wide means report zero, not NaN").
pub fn area_weighted_mean(values_and_areas: &[(f64, f64)]) -> f64 {
    let total_area: f64 = values_and_areas.iter().map(|(_, a)| a).sum();
    if total_area <= 0.0 {
        return 0.0;
    }
    values_and_areas.iter().map(|(v, a)| v * a).sum::<f64>() / total_area
}

/// System storage volume (§4.2): sum of node volumes plus the link-average volume
/// `(1-f)*oldVolume + f*newVolume` for every link, `f` the fraction of the routing
/// step already elapsed when the period is reported.
pub fn system_storage_volume(node_volumes: &[f64], link_old_volumes: &[f64], link_new_volumes: &[f64], f: f64) -> f64 {
    let node_total: f64 = node_volumes.iter().sum();
    let link_total: f64 = link_old_volumes
        .iter()
        .zip(link_new_volumes.iter())
        .map(|(&old, &new)| (1.0 - f) * old + f * new)
        .sum();
    node_total + link_total
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn test_layout() -> ResultsLayout {
        ResultsLayout {
            flow_unit_code: 0,
            n_pollutants: 1,
            subcatch_names: vec!["S1".to_string()],
            node_names: vec!["N1".to_string(), "N2".to_string()],
            link_names: vec!["L1".to_string()],
        }
    }

    #[test]
    fn test_bytes_per_period_matches_written_size() {
        let layout = test_layout();
        let expected = 8 + (layout.n_subcatch_vars() + 2 * layout.n_node_vars() + layout.n_link_vars() + MAX_SYS_RESULTS) * 4;
        assert_eq!(layout.bytes_per_period(), expected as u64);
    }

    #[test]
    fn test_close_then_reopen_reads_back_periods() {
        let layout = test_layout();
        let cursor = Cursor::new(Vec::new());
        let mut writer = ResultsWriter::open(cursor, layout.clone(), 2).unwrap();

        let subcatch = vec![1.5f32];
        let node = vec![10.0f32, 11.0, 12.0, 13.0, 14.0, 15.0, 0.0, 20.0, 21.0, 22.0, 23.0, 24.0, 25.0, 0.0];
        let link = vec![5.0f32, 0.1, 0.2, 0.3, 0.4, 0.0];
        let mut system = [0.0f32; MAX_SYS_RESULTS];
        system[1] = 1.5;

        writer.write_period(100.0, &subcatch, &node, &link, &system).unwrap();
        writer.write_period(101.0, &subcatch, &node, &link, &system).unwrap();
        let cursor = writer.close(0).unwrap();

        let mut reader = ResultsReader::open(cursor).unwrap();
        assert_eq!(reader.n_periods, 2);
        assert_eq!(reader.error_code, 0);
        assert_eq!(reader.read_date_time(0).unwrap(), 100.0);
        assert_eq!(reader.read_date_time(1).unwrap(), 101.0);

        let node_1 = reader.read_node_results(0, 1).unwrap();
        assert_eq!(node_1[0], 20.0);

        let link_0 = reader.read_link_results(0, 0).unwrap();
        assert_eq!(link_0[0], 5.0);

        let sys = reader.read_system_results(0).unwrap();
        assert_eq!(sys[1], 1.5);
    }

    #[test]
    fn test_area_weighted_mean_zero_area_returns_zero() {
        assert_eq!(area_weighted_mean(&[]), 0.0);
        assert_eq!(area_weighted_mean(&[(5.0, 0.0), (3.0, 0.0)]), 0.0);
    }

    #[test]
    fn test_area_weighted_mean_weights_by_area() {
        let mean = area_weighted_mean(&[(1.0, 1.0), (3.0, 3.0)]);
        assert!((mean - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_system_storage_volume_interpolates_link_volume() {
        let v = system_storage_volume(&[100.0], &[10.0], &[20.0], 0.5);
        assert!((v - 115.0).abs() < 1e-9);
    }
}
