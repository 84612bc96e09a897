use std::path::PathBuf;

use crate::addr::WorkerId;


/// The planner names its outputs `<program>_<size>_<index>.<stage suffix>`
/// so that workers planning the same program at different sizes or indices
/// never collide.
pub fn problem_name(
    program: &str,
    problem_size: u64,
    worker_index: WorkerId,
) -> String {
    format!("{}_{}_{}", program, problem_size, worker_index)
}


pub fn virtual_program_path(problem_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.prog", problem_name))
}

pub fn annotations_path(problem_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.ann", problem_name))
}

/// Scratch file holding the annotations in reverse order, before the
/// forward rewrite; removed once the `.ann` file exists.
pub fn reverse_annotations_path(problem_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.revann", problem_name))
}

pub fn physical_program_path(problem_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.repprog", problem_name))
}

pub fn memory_program_path(problem_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.memprog", problem_name))
}
