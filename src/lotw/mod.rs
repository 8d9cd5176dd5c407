pub mod adif;
pub mod audit;
pub mod backup;
pub mod config;
pub mod fetch;
pub mod merge;
pub mod paths;
pub mod snapshot;
pub mod stats;
pub mod strategy;
pub mod timestamps;
pub mod updater;
pub mod util;
