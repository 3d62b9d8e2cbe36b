//! Moment 0 and moment 8 images over the continuum channels of a cube.

use crate::controller::naming::moment_name;
use crate::models::{ImagingResult, MomentProduct};
use crate::services::{
    EngineError, ImagingEngine, MomentRequest, continuum_channel_ranges, format_channel_ranges,
};
use camino::Utf8PathBuf;

/// Create `<image>.mom0_fc` and `<image>.mom8_fc` from the non primary beam
/// corrected image of the last pass and record them in `result`.
///
/// Returns `false` without calling the engine when there are no usable
/// continuum ranges. Engine failures propagate.
pub async fn create_moment_maps<E: ImagingEngine>(
    engine: &E,
    result: &mut ImagingResult,
    continuum_ranges: Option<&str>,
) -> Result<bool, EngineError> {
    let Some((iteration, products)) = result
        .iterations
        .iter()
        .next_back()
        .map(|(iteration, record)| (*iteration, record.products.clone()))
    else {
        return Ok(false);
    };

    let ranges = match continuum_ranges {
        Some(selection) => match continuum_channel_ranges(selection, products.spectral_axis.as_ref()) {
            Ok(ranges) => ranges,
            Err(e) => {
                tracing::warn!("Ignoring continuum ranges of {}: {}", result.context, e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    if ranges.is_empty() {
        tracing::warn!(
            "Cannot create MOM0_FC / MOM8_FC images for intent \"{}\", field {}, spw {}, no continuum ranges found.",
            result.context.intent,
            result.context.field,
            result.context.spw
        );
        return Ok(false);
    }

    let image = products.nonpbcor_image();
    let chans = format_channel_ranges(&ranges);

    for moment in [0u8, 8] {
        let request = MomentRequest {
            imagename: image.clone(),
            moment,
            outfile: Utf8PathBuf::from(moment_name(image.as_str(), moment)),
            chans: chans.clone(),
        };
        let path = engine.make_moment(&request).await?;
        tracing::info!("Created moment {} image {} over channels {}", moment, path, chans);

        let product = MomentProduct {
            iteration,
            moment,
            path,
        };
        if moment == 0 {
            result.mom0_fc = Some(product);
        } else {
            result.mom8_fc = Some(product);
        }
    }

    Ok(true)
}
