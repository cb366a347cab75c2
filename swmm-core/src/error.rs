//! Crate-wide error type.
//!
//! One variant per failure mode named in spec.md §6/§7, in the shape of the teacher's
//! `PywrError`: a flat `thiserror` enum with `#[from]` conversions at the I/O boundary.
//! Numeric SWMM-style error codes are preserved via [`SwmmError::code`] because the
//! results-file epilogue (§4.2) carries the terminal error code as a raw integer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwmmError {
    #[error("node index not found")]
    NodeIndexNotFound,
    #[error("link index not found")]
    LinkIndexNotFound,
    #[error("subcatchment index not found")]
    SubcatchmentIndexNotFound,
    #[error("gage index not found")]
    GageIndexNotFound,
    #[error("node with name `{0}` not found")]
    NodeNotFound(String),
    #[error("divider node `{0}` has more than two outgoing links")]
    DividerTooManyOutlets(String),
    #[error("non-storage, non-outfall node `{0}` has more than one outgoing link")]
    MultiOutletNode(String),
    #[error("regulator link `{0}` does not originate at a storage node")]
    RegulatorNotAtStorage(String),
    #[error("conduit `{0}` has negative slope")]
    NegativeSlope(String),
    #[error("the conveyance network contains a cycle and cannot be routed as a tree")]
    NotATree,
    #[error("no outfall is defined in a network with routing active")]
    NoOutlets,
    #[error("dummy link `{0}` is not permitted here")]
    DummyLink(String),
    #[error("sum of sub-area fractions for subcatchment `{0}` is {1}, expected 1.0")]
    SubAreaFractionsInvalid(String, f64),
    #[error("hotstart file open failed: {0}")]
    HotstartFileOpen(String),
    #[error("hotstart file format is not recognised or does not match the current project")]
    HotstartFileFormat,
    #[error("hotstart file contained a NaN value and could not be fully read")]
    HotstartFileRead,
    #[error("error writing results file: {0}")]
    OutWrite(String),
    #[error("results file is malformed: {0}")]
    OutFile(String),
    #[error("projected results file size exceeds the maximum addressable offset")]
    FileSize,
    #[error("memory allocation failed: {0}")]
    Memory(String),
    #[error("ODE solver failed to converge")]
    OdeSolver,
    #[error("runoff interface file open failed: {0}")]
    RunoffFileOpen(String),
    #[error("runoff interface file format is invalid")]
    RunoffFileFormat,
    #[error("unexpected end of runoff interface file")]
    RunoffFileEnd,
    #[error("error reading runoff interface file: {0}")]
    RunoffFileRead(String),
    #[error("time step error: {0}")]
    Timestep(#[from] crate::timestep::ClockError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwmmError {
    /// The legacy integer error code carried in the results-file epilogue (§4.2, §7).
    /// Zero means "no error"; this is never returned for an `Ok` run.
    pub fn code(&self) -> i32 {
        match self {
            SwmmError::HotstartFileOpen(_) => 305,
            SwmmError::HotstartFileFormat => 306,
            SwmmError::HotstartFileRead => 307,
            SwmmError::OutWrite(_) => 308,
            SwmmError::OutFile(_) => 309,
            SwmmError::FileSize => 310,
            SwmmError::Memory(_) => 311,
            SwmmError::OdeSolver => 312,
            SwmmError::RunoffFileOpen(_) => 313,
            SwmmError::RunoffFileFormat => 314,
            SwmmError::RunoffFileEnd => 315,
            SwmmError::RunoffFileRead(_) => 316,
            SwmmError::NotATree | SwmmError::MultiOutletNode(_) => 317,
            SwmmError::DividerTooManyOutlets(_) => 318,
            SwmmError::NoOutlets => 319,
            SwmmError::NegativeSlope(_) => 320,
            SwmmError::RegulatorNotAtStorage(_) => 321,
            SwmmError::DummyLink(_) => 322,
            _ => 399,
        }
    }
}
