pub mod cancel;
pub mod job_orchestrator;
pub mod metadata;
pub mod print_coordinator;
pub mod remote;
#[cfg(feature = "http")]
pub mod rest;

pub use cancel::*;
pub use job_orchestrator::*;
pub use metadata::{ServiceInfo, ServiceParameter};
pub use print_coordinator::*;
pub use remote::*;
#[cfg(feature = "http")]
pub use rest::RestClient;
