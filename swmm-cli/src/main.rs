mod tracing;

use crate::tracing::setup_tracing;
use ::tracing::info;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use swmm_core::catalog::Catalog;
use swmm_core::gage::RainRecord;
use swmm_core::node::NodeIndex;
use swmm_core::results::{ResultsLayout, ResultsWriter, MAX_SYS_RESULTS};
use swmm_core::routing::RoutingModel;
use swmm_core::runoff_step::{ConstantEvaporation, RunoffStepController};
use swmm_core::storage_curve::{FunctionalStorageCurve, StorageCurveModel};
use swmm_core::subcatchment::{RouteTo, SubArea, SubAreaKind};
use swmm_core::timestep::{Clock, SimDuration};
use swmm_core::Project;

#[derive(Copy, Clone, ValueEnum)]
enum Scenario {
    /// A single subcatchment draining straight to an outfall.
    Outfall,
    /// A subcatchment draining into a storage node with an outlet link.
    Storage,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Turn debugging information on
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and run one of the built-in demonstration scenarios to completion.
    Run {
        #[arg(value_enum)]
        scenario: Scenario,
        /// Write a binary results file here on completion.
        #[arg(long)]
        results: Option<PathBuf>,
        /// Write a hotstart snapshot of the final state here on completion.
        #[arg(long)]
        hotstart: Option<PathBuf>,
    },
}

fn flat_sub_areas() -> [SubArea; 3] {
    [
        SubArea::new(SubAreaKind::Imperv0, 0.015, 0.0, 1.0, 5.0, RouteTo::Outlet, 1.0),
        SubArea::new(SubAreaKind::Imperv1, 0.015, 0.0, 0.0, 5.0, RouteTo::Outlet, 1.0),
        SubArea::new(SubAreaKind::Perv, 0.25, 0.0, 0.0, 1.0, RouteTo::Outlet, 1.0),
    ]
}

fn dt(s: &str) -> chrono::NaiveDateTime {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").expect("built-in demo timestamp is well-formed")
}

/// A single subcatchment draining directly to an outfall under constant rain.
fn build_outfall_scenario() -> Result<Project> {
    let mut catalog = Catalog::new(0, 0);
    let gage = catalog.gages.push(
        "G1",
        vec![RainRecord {
            start: dt("2021-01-01 00:00:00"),
            intensity: 2.0,
        }],
    );
    let sc = catalog
        .subcatchments
        .push("S1", 43560.0, 1.0, 500.0, 0.01, 100.0, flat_sub_areas(), 0, 0)
        .context("building demo subcatchment")?;
    let out = catalog.nodes.push_outfall("OUT1", 0.0, 0);
    {
        let s = catalog.subcatchments.get_mut(&sc)?;
        s.gage = Some(gage);
        s.outlet_node = Some(out);
    }

    let clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-01 04:00:00"));
    let runoff = RunoffStepController::new(SimDuration::from_seconds(60.0), SimDuration::from_seconds(3600.0));
    let project = Project::open(
        catalog,
        clock,
        RoutingModel::Steady,
        SimDuration::from_seconds(60.0),
        runoff,
        Box::new(ConstantEvaporation::zero()),
        0,
    )?;
    Ok(project)
}

/// A subcatchment draining into a storage node that discharges through an outlet link
/// to a downstream outfall.
fn build_storage_scenario() -> Result<Project> {
    let mut catalog = Catalog::new(0, 0);
    let storage = catalog.nodes.push_storage(
        "ST1",
        0.0,
        20.0,
        10000.0,
        StorageCurveModel::Functional(FunctionalStorageCurve::new(500.0, 1.0)),
        0,
    );
    let out: NodeIndex = catalog.nodes.push_outfall("OUT1", 0.0, 0);
    catalog.links.push_outlet("OL1", storage, out, 2.0, 2.0, 0);

    let sc = catalog
        .subcatchments
        .push("S1", 43560.0, 1.0, 500.0, 0.01, 100.0, flat_sub_areas(), 0, 0)
        .context("building demo subcatchment")?;
    let gage = catalog.gages.push(
        "G1",
        vec![RainRecord {
            start: dt("2021-01-01 00:00:00"),
            intensity: 1.0,
        }],
    );
    {
        let s = catalog.subcatchments.get_mut(&sc)?;
        s.gage = Some(gage);
        s.outlet_node = Some(storage);
    }

    let clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-01 06:00:00"));
    let runoff = RunoffStepController::new(SimDuration::from_seconds(60.0), SimDuration::from_seconds(1800.0));
    let project = Project::open(
        catalog,
        clock,
        RoutingModel::Steady,
        SimDuration::from_seconds(60.0),
        runoff,
        Box::new(ConstantEvaporation::zero()),
        0,
    )?;
    Ok(project)
}

fn results_layout(project: &Project, flow_unit_code: i32) -> ResultsLayout {
    ResultsLayout {
        flow_unit_code,
        n_pollutants: project.catalog.n_pollutants,
        subcatch_names: project.catalog.subcatchments.iter().map(|s| s.name.clone()).collect(),
        node_names: project.catalog.nodes.iter().map(|n| n.name().to_string()).collect(),
        link_names: project.catalog.links.iter().map(|l| l.name().to_string()).collect(),
    }
}

fn run_scenario(scenario: Scenario, results: Option<PathBuf>, hotstart: Option<PathBuf>) -> Result<()> {
    let mut project = match scenario {
        Scenario::Outfall => build_outfall_scenario()?,
        Scenario::Storage => build_storage_scenario()?,
    };

    let mut writer = match results {
        Some(path) => {
            let layout = results_layout(&project, project.flow_unit_code);
            let file = File::create(&path).with_context(|| format!("creating results file {}", path.display()))?;
            Some(ResultsWriter::open(file, layout, 200)?)
        }
        None => None,
    };

    let mut steps = 0u64;
    loop {
        if project.is_finished() {
            break;
        }
        let tstep = project.run_step()?;
        if tstep.is_zero() {
            break;
        }
        steps += 1;
        info!(step = steps, seconds = tstep.seconds(), "ran runoff+routing step");

        if let Some(w) = writer.as_mut() {
            let subcatch: Vec<f32> = project
                .catalog
                .subcatchments
                .iter()
                .flat_map(|s| [0.0, 0.0, 0.0, 0.0, s.new_runoff as f32, 0.0, 0.0, 0.0])
                .collect();
            let node: Vec<f32> = project
                .catalog
                .nodes
                .iter()
                .flat_map(|n| {
                    let s = n.state();
                    [
                        s.new_depth as f32,
                        (n.invert() + s.new_depth) as f32,
                        s.new_volume as f32,
                        s.lateral_inflow as f32,
                        s.inflow as f32,
                        s.overflow as f32,
                    ]
                })
                .collect();
            let link: Vec<f32> = project
                .catalog
                .links
                .iter()
                .flat_map(|l| {
                    let s = l.state();
                    [s.new_flow as f32, s.new_depth as f32, 0.0, s.new_volume as f32, 0.0]
                })
                .collect();
            let mut system = [0.0f32; MAX_SYS_RESULTS];
            system[1] = project.total_rainfall_volume() as f32;
            system[11] = project.total_runoff_volume() as f32;
            system[12] = project.system_storage_volume() as f32;
            w.write_period(project.clock.now().and_utc().timestamp() as f64, &subcatch, &node, &link, &system)?;
        }
    }

    if let Some(w) = writer {
        w.close(0)?;
    }

    if let Some(path) = hotstart {
        let mut file = File::create(&path).with_context(|| format!("creating hotstart file {}", path.display()))?;
        project.write_hotstart(&mut file)?;
    }

    println!("ran {steps} steps to {}", project.clock.now());
    println!("total rainfall volume: {:.3} ft^3", project.total_rainfall_volume());
    println!("total runoff volume:   {:.3} ft^3", project.total_runoff_volume());
    println!("system storage volume: {:.3} ft^3", project.system_storage_volume());

    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.debug).expect("Could not setup tracing");

    match cli.command {
        Commands::Run { scenario, results, hotstart } => run_scenario(scenario, results, hotstart),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
