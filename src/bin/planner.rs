#![allow(warnings)]
use std::path::PathBuf;

use crate::deps::{
    golem::{
        addr::WorkerId,
        config::{
            Config,
            Role,
        },
        error::Error,
        pipeline::{
            Pipeline,
            PlannerOptions,
        },
        programs::{
            self,
            ProgramOptions,
        },
        protocol::plaintext_operand_size,
    },
    log::debug,
    structopt::StructOpt,
};

pub mod deps {
    pub(crate) use env_logger;
    pub(crate) use log;
    pub(crate) use serde_json;
    pub(crate) use structopt;

    pub(crate) use golem;
}


#[derive(Debug, StructOpt)]
#[structopt(name = "planner", about = "memory-aware planning for secure computation bytecode")]
struct Args {
    #[structopt(short, long)]
    debug: bool,

    /// Dump the planning statistics as JSON on success.
    #[structopt(long)]
    stats_json: bool,

    program_name: String,

    config: PathBuf,

    /// garbler or evaluator
    role: Role,

    worker_index: WorkerId,

    problem_size: u64,
}


fn print_valid_program_names() {
    eprintln!("Valid program names:");
    for program in programs::registry() {
        eprintln!("  {} - {}", program.name, program.description);
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let program = match programs::look_up(&args.program_name) {
        Some(program) => program,
        None => {
            eprintln!("{} is not a valid program name. ", args.program_name);
            print_valid_program_names();
            std::process::exit(1);
        }
    };

    let config = Config::load(&args.config)?;
    let party = config.party(args.role)?;
    let worker = config.worker(args.role, args.worker_index)?;

    let options = ProgramOptions {
        worker_index: args.worker_index,
        num_workers:  party.workers.len() as WorkerId,
        problem_size: args.problem_size,
    };

    let problem_name =
        golem::paths::problem_name(&args.program_name, args.problem_size, args.worker_index);
    let mut pipeline = Pipeline::new(problem_name, PlannerOptions::from_worker(worker));
    pipeline.plan(plaintext_operand_size, "plaintext", |p| (program.run)(p, &options))?;

    if args.stats_json {
        println!(
            "{}",
            crate::deps::serde_json::to_string_pretty(pipeline.stats())
                .expect("statistics serialize to json")
        );
    } else {
        let stats = pipeline.stats();
        println!(
            "Planned {} instructions: {} swapouts, {} swapins, {} left synchronous",
            stats.num_instructions,
            stats.num_swapouts,
            stats.num_swapins,
            stats.num_synchronous_swapins
        );
        println!(
            "Phase times (ms): {} {} {}",
            stats.placement_ms, stats.replacement_ms, stats.scheduling_ms
        );
    }
    Ok(())
}

fn main() {
    let args = Args::from_args();
    if args.debug {
        crate::deps::env_logger::builder()
            .filter_level(crate::deps::log::LevelFilter::Debug)
            .init();
    } else {
        crate::deps::env_logger::builder()
            .filter_level(crate::deps::log::LevelFilter::Warn)
            .init();
    }

    debug!("program arguments: {:#?}", args);

    if let Err(err) = run(&args) {
        eprintln!("planning failed: {}", err);
        std::process::exit(1);
    }
}
