//! Dumping of a memory image into an in-memory copy of its source image.

use alloc::{vec, vec::Vec};

use log::{debug, info};

use crate::{analysis::*, copier::*, errors::*, image::*, memory::*, patch::*};

/// Dump the live data and bss contents of `memory` into a copy of the `source` image.
///
/// The uninitialized data sections of the copy grow to hold the bss contents and are marked as
/// initialized, all later sections move accordingly and the headers are patched to match.
///
/// # Returns
/// Returns the dumped image, or an error if the source is not a valid image or the memory image
/// does not fit it. Nothing is produced on error.
pub fn dump_image(
    source: &[u8], memory: &dyn MemoryImage, options: &DumpOptions,
) -> Result<Vec<u8>, DumpError> {
    let image = Image::parse(source).map_err(|error| DumpError::invalid_image("source", error))?;
    let analysis = Analysis::analyze(&image, memory, options)?;

    let mut output = vec![0; analysis.output_size as usize];
    let (headers, size) = copy_image(&image, memory, &analysis, &mut output)?;
    if size != output.len() as u64 {
        debug!("resizing output from {:#x?} to {:#x?}", output.len(), size);
        output.resize(size as usize, 0);
    }
    patch_headers(&mut output, &image, headers, options)?;

    info!("dumped image size: {:#x?}", output.len());
    Ok(output)
}
