//! End-to-end runs of the planning pipeline and the engine with the
//! plaintext backend: plan a program under a tight frame budget so the plan
//! really swaps, execute the memory program against a swap file, and check
//! the revealed outputs. The backdating scheduler's output must be
//! observationally identical to the stall-on-every-swap baseline.

use std::path::PathBuf;

use golem::{
    cluster::ClusterNetwork,
    config::{
        PartyConfig,
        WorkerConfig,
    },
    engine::Engine,
    pipeline::{
        Pipeline,
        PlannerOptions,
    },
    programs::{
        self,
        ProgramOptions,
    },
    protocol::{
        plaintext_operand_size,
        BitFileReader,
        BitFileWriter,
        PlaintextProtocol,
    },
    schedule::NopScheduler,
};


struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn new(tag: &str) -> Self {
        let mut root = std::env::temp_dir();
        root.push(format!("golem-e2e-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    fn path(
        &self,
        name: &str,
    ) -> PathBuf {
        self.root.join(name)
    }

    // Planner file names derive from the problem name, so pointing the
    // problem name into the workspace keeps every stage file here too.
    fn problem_name(
        &self,
        name: &str,
    ) -> String {
        self.path(name).display().to_string()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}


fn write_input_bits(
    path: &std::path::Path,
    values: &[u64],
    width: u16,
) {
    let mut writer = BitFileWriter::create(path).unwrap();
    for value in values {
        for bit in 0..width {
            writer.write1(((value >> bit) & 0x1) as u8).unwrap();
        }
    }
    writer.finish().unwrap();
}

fn read_output_values(
    path: &std::path::Path,
    count: usize,
    width: u16,
) -> Vec<u64> {
    let mut reader = BitFileReader::open(path).unwrap();
    (0..count)
        .map(|_| {
            let mut value = 0u64;
            for bit in 0..width {
                value |= (reader.read1().unwrap() as u64) << bit;
            }
            value
        })
        .collect()
}

fn lone_worker(storage_path: PathBuf) -> PartyConfig {
    PartyConfig {
        workers: vec![WorkerConfig {
            internal_host:        "127.0.0.1".to_string(),
            internal_port:        1,
            external_host:        None,
            external_port:        None,
            storage_path,
            page_shift:           5,
            num_pages:            4,
            prefetch_buffer_size: 2,
            prefetch_lookahead:   4,
            oblivious_transfer:   None,
        }],
    }
}

fn execute(
    memprog: &std::path::Path,
    storage: PathBuf,
    garbler_input: &std::path::Path,
    evaluator_input: &std::path::Path,
    output: &std::path::Path,
    party: &PartyConfig,
) {
    let protocol = PlaintextProtocol::new(garbler_input, evaluator_input, output).unwrap();
    let cluster = ClusterNetwork::establish(0, party).unwrap();
    let mut engine = Engine::new(memprog, &storage, cluster, protocol).unwrap();
    engine.execute_program().unwrap();
    engine.into_protocol().finish().unwrap();
}


// Plans inner_product under a three-frame budget (the working set is
// larger, so pages provably travel through the swap file) and compares the
// revealed value against the cleartext inner product.
#[test]
fn inner_product_end_to_end() {
    let workspace = Workspace::new("inner-product");
    let width = programs::INT_WIDTH;
    let problem_size = 8u64;

    let garbler_values: Vec<u64> = (1..=problem_size).collect();
    let evaluator_values: Vec<u64> = vec![2; problem_size as usize];
    let expected: u64 = garbler_values
        .iter()
        .zip(evaluator_values.iter())
        .map(|(g, e)| g * e)
        .sum();

    let program = programs::look_up("inner_product").unwrap();
    let options = ProgramOptions {
        worker_index: 0,
        num_workers:  1,
        problem_size,
    };

    let problem_name = workspace.problem_name("inner_product_8_0");
    let mut pipeline = Pipeline::new(
        problem_name.clone(),
        PlannerOptions {
            page_shift:           5, // one 32-bit value per page
            num_pages:            3,
            prefetch_buffer_size: 2,
            prefetch_lookahead:   4,
        },
    );
    pipeline
        .plan(plaintext_operand_size, "plaintext", |p| (program.run)(p, &options))
        .unwrap();

    let stats = pipeline.stats().clone();
    assert!(stats.num_swapins > 0, "a three-frame budget must force swapping");
    assert!(stats.num_swapouts > 0);

    let garbler_input = workspace.path("garbler.input");
    let evaluator_input = workspace.path("evaluator.input");
    write_input_bits(&garbler_input, &garbler_values, width);
    write_input_bits(&evaluator_input, &evaluator_values, width);

    let memprog = golem::paths::memory_program_path(&problem_name);
    let output = workspace.path("inner_product.output");
    let party = lone_worker(workspace.path("swapfile"));
    execute(
        &memprog,
        workspace.path("swapfile"),
        &garbler_input,
        &evaluator_input,
        &output,
        &party,
    );

    assert_eq!(read_output_values(&output, 1, width), vec![expected]);
}

// Property check for the scheduler: the backdated memory program and the
// stall-on-every-swap baseline reveal identical outputs.
#[test]
fn backdated_schedule_matches_synchronous_baseline() {
    let workspace = Workspace::new("equivalence");
    let width = programs::INT_WIDTH;
    let problem_size = 6u64;

    let garbler_values: Vec<u64> = vec![5, 900, 31, 2, 77, 41];
    let evaluator_values: Vec<u64> = vec![88, 3, 1000, 4, 6, 1];

    let program = programs::look_up("running_max").unwrap();
    let options = ProgramOptions {
        worker_index: 0,
        num_workers:  1,
        problem_size: problem_size * 2,
    };

    let problem_name = workspace.problem_name("running_max_12_0");
    let mut pipeline = Pipeline::new(
        problem_name.clone(),
        PlannerOptions {
            page_shift:           5,
            num_pages:            4,
            prefetch_buffer_size: 1,
            prefetch_lookahead:   3,
        },
    );
    pipeline
        .plan(plaintext_operand_size, "plaintext", |p| (program.run)(p, &options))
        .unwrap();

    // Re-schedule the same physical bytecode with the baseline scheduler.
    let repprog = golem::paths::physical_program_path(&problem_name);
    let baseline_memprog = workspace.path("baseline.memprog");
    let mut nop = NopScheduler::new(&repprog, &baseline_memprog).unwrap();
    nop.schedule().unwrap();
    nop.finish().unwrap();

    let garbler_input = workspace.path("garbler.input");
    let evaluator_input = workspace.path("evaluator.input");
    write_input_bits(&garbler_input, &garbler_values, width);
    write_input_bits(&evaluator_input, &evaluator_values, width);

    let party = lone_worker(workspace.path("swapfile"));
    let backdated_output = workspace.path("backdated.output");
    execute(
        &golem::paths::memory_program_path(&problem_name),
        workspace.path("swapfile"),
        &garbler_input,
        &evaluator_input,
        &backdated_output,
        &party,
    );

    let baseline_output = workspace.path("baseline.output");
    execute(
        &baseline_memprog,
        workspace.path("baseline.swapfile"),
        &garbler_input,
        &evaluator_input,
        &baseline_output,
        &party,
    );

    let expected = garbler_values
        .iter()
        .chain(evaluator_values.iter())
        .copied()
        .max()
        .unwrap();
    assert_eq!(read_output_values(&backdated_output, 1, width), vec![expected]);
    assert_eq!(
        std::fs::read(&backdated_output).unwrap(),
        std::fs::read(&baseline_output).unwrap()
    );
}

// The element-wise sum reveals one value per iteration; recycling keeps the
// whole run inside two live pages.
#[test]
fn sum_end_to_end() {
    let workspace = Workspace::new("sum");
    let width = programs::INT_WIDTH;
    let problem_size = 5u64;

    let garbler_values: Vec<u64> = vec![10, 20, 30, 40, u32::max_value() as u64];
    let evaluator_values: Vec<u64> = vec![1, 2, 3, 4, 1];

    let program = programs::look_up("sum").unwrap();
    let options = ProgramOptions {
        worker_index: 0,
        num_workers:  1,
        problem_size,
    };

    let problem_name = workspace.problem_name("sum_5_0");
    let mut pipeline = Pipeline::new(
        problem_name.clone(),
        PlannerOptions {
            page_shift:           6,
            num_pages:            4,
            prefetch_buffer_size: 1,
            prefetch_lookahead:   2,
        },
    );
    pipeline
        .plan(plaintext_operand_size, "plaintext", |p| (program.run)(p, &options))
        .unwrap();

    let garbler_input = workspace.path("garbler.input");
    let evaluator_input = workspace.path("evaluator.input");
    write_input_bits(&garbler_input, &garbler_values, width);
    write_input_bits(&evaluator_input, &evaluator_values, width);

    let output = workspace.path("sum.output");
    let party = lone_worker(workspace.path("swapfile"));
    execute(
        &golem::paths::memory_program_path(&problem_name),
        workspace.path("swapfile"),
        &garbler_input,
        &evaluator_input,
        &output,
        &party,
    );

    // The last sum wraps at 32 bits.
    let expected: Vec<u64> = vec![11, 22, 33, 44, 0];
    assert_eq!(read_output_values(&output, problem_size as usize, width), expected);
}
