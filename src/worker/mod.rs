// Background cache worker and its message protocol
// Author: kelexine (https://github.com/kelexine)

pub mod handle;
pub mod protocol;
pub mod task;

pub use handle::WorkerHandle;
pub use protocol::{Command, DebugReport, Reply, ReplyError, Request, RequestId, Response, StoreReport};
pub use task::CacheWorker;
