// Prioritized loading and preloading on top of the cache client
// Author: kelexine (https://github.com/kelexine)

pub mod preload;
pub mod queue;

pub use preload::{preload, PreloadSummary};
pub use queue::{LoadQueue, Priority};
