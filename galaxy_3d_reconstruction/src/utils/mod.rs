mod atomic;
mod pending;

pub(crate) use atomic::as_atomic_u32;
pub use pending::PendingResult;
