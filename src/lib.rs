pub mod cli;
pub mod config;
pub mod consent;
pub mod history;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod util;
