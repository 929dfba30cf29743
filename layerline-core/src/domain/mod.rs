pub mod audit;
pub mod error;
pub mod job;
pub mod load_mode;
pub mod mapping;
pub mod reject;
pub mod run_state;
pub mod scd;
pub mod value;

pub use error::DomainError;
