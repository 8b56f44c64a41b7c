//! Builder image composition.

mod assembler;
mod overlay;

pub use assembler::{create_build_image, BuilderAssembler};
pub use overlay::{apply_module, overlay_module, ModuleKind};
