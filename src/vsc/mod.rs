pub mod audit;
pub mod changeset;
pub mod config;
pub mod health;
pub mod lock;
pub mod model;
pub mod paths;
pub mod policy;
pub mod project;
pub mod provision;
pub mod report;
pub mod state;
pub mod user;
pub mod util;
pub mod vo;
