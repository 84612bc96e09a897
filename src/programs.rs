//! Nameable DSL programs for the planner binary. Each entry drives the
//! program writer through the typed front-end; the problem size scales the
//! input count.

use crate::{
    addr::WorkerId,
    dsl::SecretInt,
    error::Error,
    program::Program,
};

pub const INT_WIDTH: u16 = 32;


#[derive(Debug, Clone, Copy)]
pub struct ProgramOptions {
    pub worker_index: WorkerId,
    pub num_workers:  WorkerId,
    pub problem_size: u64,
}

pub type ProgramFn = fn(&mut Program, &ProgramOptions) -> Result<(), Error>;

pub struct RegisteredProgram {
    pub name:        &'static str,
    pub description: &'static str,
    pub run:         ProgramFn,
}

pub fn registry() -> &'static [RegisteredProgram] {
    &[
        RegisteredProgram {
            name:        "sum",
            description: "adds the garbler's and the evaluator's input vectors element-wise",
            run:         sum,
        },
        RegisteredProgram {
            name:        "inner_product",
            description: "inner product of the two parties' input vectors",
            run:         inner_product,
        },
        RegisteredProgram {
            name:        "running_max",
            description: "largest element of the interleaved input vectors",
            run:         running_max,
        },
    ]
}

pub fn look_up(name: &str) -> Option<&'static RegisteredProgram> {
    registry().iter().find(|program| program.name == name)
}


// out[i] = g[i] + e[i], one element revealed per iteration.
fn sum(
    program: &mut Program,
    options: &ProgramOptions,
) -> Result<(), Error> {
    for _ in 0..options.problem_size {
        let g = SecretInt::input(program, INT_WIDTH, false)?;
        let e = SecretInt::input(program, INT_WIDTH, true)?;
        let total = SecretInt::add(program, &g, &e)?;
        total.output(program)?;
        g.recycle(program)?;
        e.recycle(program)?;
        total.recycle(program)?;
    }
    Ok(())
}

// sum(g[i] * e[i]); only the accumulated total is revealed. Wrapped in a
// timer so the engine reports the time spent in the reduction.
fn inner_product(
    program: &mut Program,
    options: &ProgramOptions,
) -> Result<(), Error> {
    program.start_timer()?;
    let mut accumulator = SecretInt::constant(program, INT_WIDTH, 0)?;
    for _ in 0..options.problem_size {
        let g = SecretInt::input(program, INT_WIDTH, false)?;
        let e = SecretInt::input(program, INT_WIDTH, true)?;
        let term = SecretInt::multiply(program, &g, &e)?;
        g.recycle(program)?;
        e.recycle(program)?;

        let next = SecretInt::add(program, &accumulator, &term)?;
        term.recycle(program)?;
        accumulator.recycle(program)?;
        accumulator = next;
    }
    accumulator.output(program)?;
    accumulator.recycle(program)?;
    program.stop_timer()?;
    program.print_stats()?;
    Ok(())
}

// Largest element of the interleaved inputs, kept oblivious with a select
// per element.
fn running_max(
    program: &mut Program,
    options: &ProgramOptions,
) -> Result<(), Error> {
    let mut best = SecretInt::constant(program, INT_WIDTH, 0)?;
    for index in 0..options.problem_size {
        let candidate = SecretInt::input(program, INT_WIDTH, index % 2 == 1)?;
        let improves = SecretInt::less(program, &best, &candidate)?;
        let next = SecretInt::select(program, &improves, &candidate, &best)?;
        improves.recycle(program)?;
        candidate.recycle(program)?;
        best.recycle(program)?;
        best = next;
    }
    best.output(program)?;
    best.recycle(program)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup() {
        assert!(look_up("sum").is_some());
        assert!(look_up("inner_product").is_some());
        assert!(look_up("no_such_program").is_none());
        assert!(registry().iter().all(|p| !p.description.is_empty()));
    }
}
