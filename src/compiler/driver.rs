//! Parallel compilation of independent graphs.

use std::sync::Arc;

use log::debug;
use rayon::prelude::*;

use crate::{
    compiler::{manager::PassManager, manager::PipelineReport, passes::standard_pipeline},
    config::CompilerConfig,
    ir::Graph,
    Result,
};

/// Runs the standard pipeline over every graph, in parallel.
///
/// Each graph gets its own [`PassManager`]; graphs are never shared between
/// workers, and the pass objects and configuration are only read. Results
/// are returned in the order of `graphs`. A failing graph does not stop the
/// others.
pub fn compile_all(
    graphs: &mut [Graph],
    config: &Arc<CompilerConfig>,
) -> Vec<Result<PipelineReport>> {
    let passes = standard_pipeline();
    debug!("compiling {} graphs for {}", graphs.len(), config.arch);

    graphs
        .par_iter_mut()
        .map(|graph| {
            let mut manager = PassManager::new(Arc::clone(config));
            manager.run_passes(graph, &passes)
        })
        .collect()
}
