pub mod aggregator;
pub mod cli;
pub mod constants;
pub mod format;
pub mod logging;
pub mod model;
pub mod snapshot;
pub mod symbols;
pub mod tail;
pub mod upstream;
