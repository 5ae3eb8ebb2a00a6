//! Slots: per-(scope, type) storage cells and the handles callers receive

mod handle;
mod instance;
pub(crate) mod slot_data;

pub use handle::{ErasedHandle, Handle, ReadHandle};
pub use instance::{AssignRejected, ErasedInstance, InstanceCell, Storable};
pub use slot_data::SlotState;
pub(crate) use slot_data::{Slot, SlotStorage};
