pub mod lifecycle;
pub mod policy;
pub mod store;

pub use store::{AppointmentHooks, AppointmentStore, StoreSettings};
