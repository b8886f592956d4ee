pub mod assistant;
pub mod config;
pub mod decision;
pub mod dedup;
pub mod dispatch;
pub mod interceptor;
pub mod outbound;
pub mod processor;
pub mod tools;
pub mod worker;

pub use assistant::*;
pub use config::*;
pub use decision::*;
pub use dedup::*;
pub use dispatch::*;
pub use interceptor::*;
pub use outbound::*;
pub use processor::*;
pub use tools::*;
pub use worker::*;
