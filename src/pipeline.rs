//! The four-stage offline planning pipeline: placement, annotation,
//! replacement, scheduling. Each stage streams its predecessor's output
//! file and writes its own; the pipeline wires the file names together and
//! collects stage statistics.

use std::time::Instant;

use crate::{
    deps::log::{
        info,
        warn,
    },
    error::Error,
    program::Program,
    protocol::PlacementPlugin,
    replace::BeladyAllocator,
    schedule::BackdatingScheduler,
};


#[derive(Debug, Clone, serde::Serialize)]
pub struct PlannerOptions {
    pub page_shift:           u8,
    pub num_pages:            u64,
    pub prefetch_buffer_size: u64,
    pub prefetch_lookahead:   u64,
}

impl PlannerOptions {
    pub fn from_worker(worker: &crate::config::WorkerConfig) -> Self {
        Self {
            page_shift:           worker.page_shift,
            num_pages:            worker.num_pages,
            prefetch_buffer_size: worker.prefetch_buffer_size,
            prefetch_lookahead:   worker.prefetch_lookahead,
        }
    }
}


#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct PipelineStats {
    pub num_instructions:           u64,
    pub max_working_set:            u64,
    pub num_swapouts:               u64,
    pub num_swapins:                u64,
    pub num_storage_frames:         u64,
    pub num_prefetch_alloc_failures: u64,
    pub num_synchronous_swapins:    u64,
    pub num_elided_swaps:           u64,

    pub placement_ms:   u64,
    pub replacement_ms: u64,
    pub scheduling_ms:  u64,
}


pub struct Pipeline {
    problem_name: String,
    options:      PlannerOptions,
    stats:        PipelineStats,
}

impl Pipeline {
    pub fn new(
        problem_name: String,
        options: PlannerOptions,
    ) -> Self {
        Self {
            problem_name,
            options,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Runs the whole pipeline: executes the DSL closure against a fresh
    /// program writer, then annotates, replaces and schedules the result.
    pub fn plan<F>(
        &mut self,
        sizer: PlacementPlugin,
        protocol_name: &'static str,
        dsl_program: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(&mut Program) -> Result<(), Error>,
    {
        let prog_file = crate::paths::virtual_program_path(&self.problem_name);
        let ann_file = crate::paths::annotations_path(&self.problem_name);
        let revann_file = crate::paths::reverse_annotations_path(&self.problem_name);
        let repprog_file = crate::paths::physical_program_path(&self.problem_name);
        let memprog_file = crate::paths::memory_program_path(&self.problem_name);

        let placement_start = Instant::now();
        {
            let mut program =
                Program::create(&prog_file, self.options.page_shift, sizer, protocol_name)?;
            dsl_program(&mut program)?;
            self.stats.num_instructions = program.num_instructions();
            program.finish()?;
        }
        self.stats.placement_ms = placement_start.elapsed().as_millis() as u64;
        info!(
            "placement: {} instructions in {} ms",
            self.stats.num_instructions, self.stats.placement_ms
        );

        let replacement_start = Instant::now();
        self.stats.max_working_set = crate::annotate::annotate_program(
            &ann_file,
            &revann_file,
            &prog_file,
            self.options.page_shift,
        )?;
        if self.stats.max_working_set > self.options.num_pages {
            // Not necessarily fatal: only an instruction's own pages must be
            // simultaneously resident. Replacement raises the error if the
            // budget really is too small.
            warn!(
                "maximum working set ({} pages) exceeds the frame budget ({} pages)",
                self.stats.max_working_set, self.options.num_pages
            );
        }

        let mut allocator =
            BeladyAllocator::new(&repprog_file, &prog_file, &ann_file, self.options.num_pages)?;
        allocator.allocate()?;
        let (_, replacement_stats) = allocator.finish()?;
        self.stats.num_swapouts = replacement_stats.num_swapouts;
        self.stats.num_swapins = replacement_stats.num_swapins;
        self.stats.num_storage_frames = replacement_stats.num_storage_frames;
        self.stats.replacement_ms = replacement_start.elapsed().as_millis() as u64;
        info!(
            "replacement: {} swapouts, {} swapins, {} storage frames in {} ms",
            self.stats.num_swapouts,
            self.stats.num_swapins,
            self.stats.num_storage_frames,
            self.stats.replacement_ms
        );

        let scheduling_start = Instant::now();
        let mut scheduler = BackdatingScheduler::new(
            &repprog_file,
            &memprog_file,
            self.options.prefetch_lookahead,
            self.options.prefetch_buffer_size,
        )?;
        scheduler.schedule()?;
        let (_, scheduling_stats) = scheduler.finish()?;
        self.stats.num_prefetch_alloc_failures = scheduling_stats.num_allocation_failures;
        self.stats.num_synchronous_swapins = scheduling_stats.num_synchronous_swapins;
        self.stats.num_elided_swaps = scheduling_stats.num_elided_swaps;
        self.stats.scheduling_ms = scheduling_start.elapsed().as_millis() as u64;
        info!(
            "scheduling: {} allocation failures, {} synchronous swapins, {} elisions in {} ms",
            self.stats.num_prefetch_alloc_failures,
            self.stats.num_synchronous_swapins,
            self.stats.num_elided_swaps,
            self.stats.scheduling_ms
        );

        Ok(())
    }
}
