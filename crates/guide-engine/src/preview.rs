use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PlanError, PlanResult, Stage};
use crate::imaging::resize_to_width;
use crate::models::ImageSynthesizer;
use crate::prompts::preview_prompt;

/// Asks the synthesizer to render `step_text` applied to the annotated
/// highlight image. `Ok(None)` when the model returned no decodable image.
pub fn synthesize_preview(
    synthesizer: &dyn ImageSynthesizer,
    step_text: &str,
    annotated_path: &Path,
    output_path: &Path,
    width: u32,
) -> PlanResult<Option<PathBuf>> {
    let annotated = image::open(annotated_path).map_err(|err| PlanError::image(annotated_path, err))?;
    let resized = resize_to_width(&annotated, width);
    let prompt = preview_prompt(step_text);

    let generated = synthesizer
        .synthesize(&prompt, &resized)
        .map_err(|source| PlanError::Model {
            stage: Stage::Preview,
            source,
        })?;
    let Some(generated) = generated else {
        debug!(model = synthesizer.name(), "synthesizer returned no image");
        return Ok(None);
    };

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|err| PlanError::io(parent, err))?;
    }
    generated
        .save(output_path)
        .map_err(|err| PlanError::image(output_path, err))?;
    Ok(Some(output_path.to_path_buf()))
}
