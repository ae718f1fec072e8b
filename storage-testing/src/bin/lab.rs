use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use storage_testing::image_lab::{self, Execution};

#[derive(Debug, Parser)]
#[command(name = "lab")]
#[command(about = "Build and remove loop-backed LVM fixtures")]
struct LabCli {
    #[command(subcommand)]
    command: LabCommand,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Phase {
    Setup,
    Teardown,
}

#[derive(Debug, Subcommand)]
enum LabCommand {
    /// Print the commands a phase would run
    Plan { spec_name: String, phase: Phase },
    /// Run a phase against the host
    Run {
        spec_name: String,
        phase: Phase,
        #[arg(long)]
        dry_run: bool,
    },
}

fn print_execution(execution: &Execution) {
    for outcome in &execution.outcomes {
        println!("{}", outcome.command);
    }
    for (name, device) in &execution.bindings {
        println!("{name} = {device}");
    }
}

fn main() -> Result<()> {
    let cli = LabCli::parse();
    match cli.command {
        LabCommand::Plan { spec_name, phase } => {
            let plan = match phase {
                Phase::Setup => image_lab::plan_setup(&spec_name, true)?,
                Phase::Teardown => image_lab::plan_teardown(&spec_name, true)?,
            };
            for step in plan.rendered() {
                println!("{step}");
            }
        }
        LabCommand::Run {
            spec_name,
            phase,
            dry_run,
        } => {
            let execution = match phase {
                Phase::Setup => image_lab::setup(&spec_name, dry_run)?,
                Phase::Teardown => image_lab::teardown(&spec_name, dry_run)?,
            };
            print_execution(&execution);
        }
    }
    Ok(())
}
