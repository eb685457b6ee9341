/// Call-boundary helpers wrapped around module entry points
use candle_core::Device;

use crate::data::TensorBatch;

/// Run `f` on a copy of `tensors` placed on `device`
///
/// Relocation is skipped when every tensor is already on `device`, so
/// wrapping an already-placed batch is free.
pub fn auto_move_data<T, F>(device: &Device, tensors: &TensorBatch, f: F) -> crate::Result<T>
where
    F: FnOnce(&TensorBatch) -> crate::Result<T>,
{
    if tensors.is_on(device) {
        return f(tensors);
    }

    log::trace!("Moving batch of {} cells to {:?}", tensors.len(), device);
    let moved = tensors.to_device(device)?;
    f(&moved)
}
