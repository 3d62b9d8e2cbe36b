//! Product names derived from the naming root and the iteration number.
//!
//! Every function here is pure: the same inputs always give the same name.

use crate::models::MaskingMode;

/// Summary plot the engine leaves in the working directory after a pass.
pub const ENGINE_SUMMARY_PLOT: &str = "summaryplot_1.png";

/// `<root>.iter<N>`
pub fn iter_root(root: &str, iteration: u32) -> String {
    format!("{}.iter{}", root, iteration)
}

/// Mask for pass `iteration`: engine-grown `.mask` for automasking, the user
/// mask for manual masking, and a PB-derived `.cleanmask` otherwise.
pub fn mask_name(root: &str, iteration: u32, masking: MaskingMode, user_mask: Option<&str>) -> String {
    match masking {
        MaskingMode::Auto => format!("{}.mask", iter_root(root, iteration)),
        MaskingMode::Manual => user_mask.unwrap_or_default().to_string(),
        _ => format!("{}.cleanmask", iter_root(root, iteration)),
    }
}

/// Everything produced by pass `iteration`, for stale-product cleanup.
pub fn iteration_pattern(root: &str, iteration: u32) -> String {
    format!("{}*", iter_root(root, iteration))
}

/// Every pass of an image, for cleanup before a run starts.
pub fn all_iterations_pattern(imagename: &str) -> String {
    format!("{}*.iter*", imagename)
}

pub fn summary_plot_name(root: &str, iteration: u32) -> String {
    format!("{}.summaryplot.png", iter_root(root, iteration))
}

/// `<image>.mom0_fc` / `<image>.mom8_fc`
pub fn moment_name(image: &str, moment: u8) -> String {
    format!("{}.mom{}_fc", image, moment)
}
