use std::path::PathBuf;

use anyhow::Context;
use serde::Serialize;
use structopt::StructOpt;

use fabric::{
    analysis::{Comparison, RunSummary},
    config::{read_config, ExperimentConfig},
    planner::EcmpPlanner,
    report::ExperimentReport,
    topology::Topology,
};

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "fabric", about = "ECMP and adaptive routing for leaf-spine fabrics")]
enum Opt {
    /// Plan the static ECMP forwarding tables of a fabric
    Plan {
        /// Experiment configuration file, defaults apply without one
        #[structopt(short = "c", long = "config")]
        config: Option<PathBuf>,
        /// Print the ovs-ofctl rules of every switch
        #[structopt(long)]
        rules: bool,
        /// Print the topology in graphviz dot format
        #[structopt(long)]
        dot: bool,
        /// Write the forwarding tables as JSON
        #[structopt(short = "o", long = "output")]
        output: Option<PathBuf>,
    },
    /// Summarize one run
    Analyze {
        /// Result file of the run
        report: PathBuf,
    },
    /// Compare an ECMP run against an adaptive one
    Compare {
        /// Result file of the ECMP run
        ecmp: PathBuf,
        /// Result file of the adaptive run
        adaptive: PathBuf,
        /// Write both summaries and the comparison as JSON
        #[structopt(short = "o", long = "output")]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct ComparisonOutput {
    ecmp: RunSummary,
    adaptive: RunSummary,
    comparison: Comparison,
}

fn load_summary(path: &PathBuf) -> anyhow::Result<RunSummary> {
    let report = ExperimentReport::load(path)
        .with_context(|| format!("failed to load results from {}", path.display()))?;
    Ok(RunSummary::from_report(&report))
}

fn plan(config: Option<PathBuf>, rules: bool, dot: bool, output: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => read_config(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ExperimentConfig::default(),
    };
    log::info!("config: {:?}", config);

    let dims = config.topology.dims();
    let topo = Topology::leaf_spine(dims, config.topology.link_capacity())?;
    topo.validate()?;
    if dot {
        println!("{}", topo.to_dot());
    }

    let fibs = EcmpPlanner::new(&topo, dims).build()?;
    for table in fibs.iter() {
        let multipath = table.entries().filter(|(_, e)| e.is_multipath()).count();
        println!(
            "{}: {} entries, {} multipath",
            table.switch,
            table.len(),
            multipath
        );
        if rules {
            for rule in table.rules() {
                println!("  {}", rule);
            }
        }
    }

    if let Some(path) = output {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &fibs)?;
        log::info!("forwarding tables written to {}", path.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    logging::init_log();

    let opt = Opt::from_args();
    log::debug!("options: {:?}", opt);

    match opt {
        Opt::Plan {
            config,
            rules,
            dot,
            output,
        } => plan(config, rules, dot, output)?,
        Opt::Analyze { report } => {
            println!("{}", load_summary(&report)?);
        }
        Opt::Compare {
            ecmp,
            adaptive,
            output,
        } => {
            let ecmp = load_summary(&ecmp)?;
            let adaptive = load_summary(&adaptive)?;
            let comparison = Comparison::between(&ecmp, &adaptive);
            println!("ECMP vs ADAPTIVE ROUTING COMPARISON");
            println!("{}", comparison);

            if let Some(path) = output {
                let out = ComparisonOutput {
                    ecmp,
                    adaptive,
                    comparison,
                };
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                serde_json::to_writer_pretty(std::io::BufWriter::new(file), &out)?;
                log::info!("comparison written to {}", path.display());
            }
        }
    }

    Ok(())
}
