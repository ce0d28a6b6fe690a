//! CPU side of frame materialization: copying mapped surface rows into a
//! packed pixel buffer with crop and vertical flip, plus channel swizzles.

mod parallel;
mod scalar;

use parallel::{install_conversion_pool, should_parallelize};
use rayon::prelude::*;

use crate::backend::MappedSurface;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::PixelFormat;
use crate::region::CropRect;

/// Pre-initialize the row-copy thread pool so the first capture doesn't
/// pay the cost. Safe to call multiple times.
pub fn warmup() {
    parallel::warmup_pool(ROW_COPY_PARALLEL_MAX_WORKERS);
}

/// Rows are only split across workers once a frame is large enough for
/// the copy to dominate rayon's scheduling cost (roughly 720p and up).
const ROW_COPY_PARALLEL_MIN_PIXELS: usize = 921_600;
const ROW_COPY_PARALLEL_MIN_CHUNK_PIXELS: usize = 131_072;
const ROW_COPY_PARALLEL_MAX_WORKERS: usize = 8;

/// Copy the `crop` sub-rectangle of `src` into `dst`, packed at
/// `crop.width * 4` bytes per row.
///
/// With `flip_vertical`, output row `i` receives source row
/// `crop.y + crop.height - 1 - i`. Each row copies
/// `min(output_pitch, source_pitch - crop_offset)` bytes so alignment
/// padding in the source never reads past a row; any remainder of the
/// destination row stays as it was.
pub(crate) fn copy_rows(
    src: &MappedSurface<'_>,
    crop: CropRect,
    flip_vertical: bool,
    dst: &mut [u8],
) -> CaptureResult<()> {
    if crop.right() > src.width || crop.bottom() > src.height {
        return Err(CaptureError::InvalidConfig(format!(
            "crop {}x{}+{}+{} exceeds mapped surface {}x{}",
            crop.width, crop.height, crop.x, crop.y, src.width, src.height
        )));
    }

    let bpp = PixelFormat::BYTES_PER_PIXEL;
    let out_pitch = (crop.width as usize)
        .checked_mul(bpp)
        .ok_or(CaptureError::BufferOverflow)?;
    let out_len = out_pitch
        .checked_mul(crop.height as usize)
        .ok_or(CaptureError::BufferOverflow)?;
    if dst.len() != out_len {
        return Err(CaptureError::BufferOverflow);
    }
    if out_len == 0 {
        return Ok(());
    }

    let x_offset = crop.x as usize * bpp;
    let copy_len = out_pitch.min(src.row_pitch.saturating_sub(x_offset));
    let last_src_row = (crop.bottom() - 1) as usize;
    let required = last_src_row
        .checked_mul(src.row_pitch)
        .and_then(|base| base.checked_add(x_offset))
        .and_then(|base| base.checked_add(copy_len))
        .ok_or(CaptureError::BufferOverflow)?;
    if required > src.data.len() {
        return Err(CaptureError::BufferOverflow);
    }

    let first_src_row = crop.y as usize;
    let rows = crop.height as usize;
    let data = src.data;
    let row_pitch = src.row_pitch;
    let copy_row = |(out_row, dst_row): (usize, &mut [u8])| {
        let src_row = if flip_vertical {
            first_src_row + (rows - 1 - out_row)
        } else {
            first_src_row + out_row
        };
        let start = src_row * row_pitch + x_offset;
        dst_row[..copy_len].copy_from_slice(&data[start..start + copy_len]);
    };

    let pixel_count = crop.width as usize * rows;
    if should_parallelize(
        pixel_count,
        ROW_COPY_PARALLEL_MIN_PIXELS,
        ROW_COPY_PARALLEL_MIN_CHUNK_PIXELS,
        ROW_COPY_PARALLEL_MAX_WORKERS,
    ) {
        install_conversion_pool(ROW_COPY_PARALLEL_MAX_WORKERS, || {
            dst.par_chunks_exact_mut(out_pitch)
                .enumerate()
                .for_each(copy_row);
        });
    } else {
        dst.chunks_exact_mut(out_pitch).enumerate().for_each(copy_row);
    }
    Ok(())
}

/// Write the rows of `src` into `dst` in reverse order.
pub(crate) fn reverse_rows(src: &[u8], dst: &mut [u8], stride: usize) {
    if stride == 0 {
        return;
    }
    for (dst_row, src_row) in dst
        .chunks_exact_mut(stride)
        .zip(src.chunks_exact(stride).rev())
    {
        dst_row.copy_from_slice(src_row);
    }
}

/// Swap red and blue in place, turning BGRA8 into RGBA8 and back.
pub(crate) fn swizzle_bgra_rgba_in_place(bytes: &mut [u8]) {
    scalar::swizzle_in_place(bytes);
}
