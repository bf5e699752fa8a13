pub mod jupyter_kernel_busyness;
pub mod liveness;
pub mod num_of_requests;

pub use jupyter_kernel_busyness::JupyterKernelBusynessHandler;
pub use liveness::{LivenessMonitor, LivenessOutcome};
pub use num_of_requests::NumOfRequestsHandler;
