#![allow(warnings)]
use std::path::PathBuf;

use crate::deps::{
    golem::{
        addr::WorkerId,
        cluster::ClusterNetwork,
        config::{
            Config,
            Role,
        },
        engine::Engine,
        error::Error,
        protocol::PlaintextProtocol,
    },
    log::{
        debug,
        info,
    },
    structopt::StructOpt,
};

pub mod deps {
    pub(crate) use env_logger;
    pub(crate) use log;
    pub(crate) use structopt;

    pub(crate) use golem;
}


#[derive(Debug, StructOpt)]
#[structopt(name = "engine", about = "executes a planned memory program")]
struct Args {
    #[structopt(short, long)]
    debug: bool,

    program_name: String,

    config: PathBuf,

    /// garbler or evaluator
    role: Role,

    worker_index: WorkerId,

    problem_size: u64,

    /// This party's input bit stream; defaults to <problem_name>.input
    #[structopt(long, parse(from_os_str))]
    input: Option<PathBuf>,

    /// The other party's input bit stream (the plaintext backend reads
    /// both); defaults to <problem_name>.peer_input
    #[structopt(long, parse(from_os_str))]
    peer_input: Option<PathBuf>,

    /// Revealed output bit stream; defaults to <problem_name>.output
    #[structopt(long, parse(from_os_str))]
    output: Option<PathBuf>,
}


fn run(args: &Args) -> Result<(), Error> {
    let config = Config::load(&args.config)?;
    let party = config.party(args.role)?;
    let worker = config.worker(args.role, args.worker_index)?;

    let problem_name =
        golem::paths::problem_name(&args.program_name, args.problem_size, args.worker_index);
    let memprog = golem::paths::memory_program_path(&problem_name);

    let own_input = args
        .input
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.input", problem_name)));
    let peer_input = args
        .peer_input
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.peer_input", problem_name)));
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.output", problem_name)));

    let (garbler_input, evaluator_input) = match args.role {
        Role::Garbler => (&own_input, &peer_input),
        Role::Evaluator => (&peer_input, &own_input),
    };
    let protocol = PlaintextProtocol::new(garbler_input, evaluator_input, &output)?;

    let cluster = ClusterNetwork::establish(args.worker_index, party)?;
    let mut engine = Engine::new(&memprog, &worker.storage_path, cluster, protocol)?;
    engine.execute_program()?;
    engine.into_protocol().finish()?;

    info!("execution complete; output written to {:?}", output);
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
        eprintln!("execution failed: {}", err);
        std::process::exit(1);
    }
}
