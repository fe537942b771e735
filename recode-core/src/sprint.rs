//! Sprint-wise execution of processing steps.
//!
//! A sprint is one generation of runnable steps. The first sprint holds
//! only the base step; every later sprint holds exactly the steps the
//! previous one spawned. Steps within a sprint are independent, so their
//! execution order does not matter; sprints themselves are strictly
//! ordered.


use tracing::{debug, info};

use crate::probe::MediaFile;
use crate::step::{ProcessingStep, StepError};

/// Runs a step and everything it spawns, sprint by sprint.
///
/// Returns the output artifacts of the final sprint; artifacts produced
/// in earlier sprints are intermediates by construction and are
/// discarded at each sprint boundary. The first failing step aborts the
/// loop.
pub fn execute(base_step: Box<dyn ProcessingStep>) -> Result<Vec<MediaFile>, StepError> {
    let mut current: Vec<Box<dyn ProcessingStep>> = vec![base_step];
    let mut outputs: Vec<MediaFile> = Vec::new();
    let mut sprint_id = 0usize;

    while !current.is_empty() {
        info!("processing sprint {sprint_id} ({} steps)", current.len());
        if !outputs.is_empty() {
            info!("discarding intermediate output files from the previous sprint: {outputs:?}");
            outputs.clear();
        }
        let mut next: Vec<Box<dyn ProcessingStep>> = Vec::new();
        for mut step in current {
            debug!("running step: {step:?}");
            step.run()?;
            let result = step.take_result()?;
            next.extend(result.next_sprint_steps);
            if let Some(file) = result.output_media_file {
                outputs.push(file);
            }
        }
        current = next;
        sprint_id += 1;
    }

    info!("processing finished with output files: {outputs:?}");
    Ok(outputs)
}
