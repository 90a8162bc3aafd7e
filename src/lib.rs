pub mod config;
pub mod db;
pub mod dedup;
pub mod deploy;
pub mod disqus;
pub mod generate;
pub mod markup;
pub mod migrate;
pub mod model;
pub mod outbox;
pub mod paths;
pub mod publish;
pub mod queue;
pub mod regen;
pub mod scan;
pub mod store;
