pub mod classify;
pub mod cluster;
pub mod export;
pub mod import;
pub mod resolve;
pub mod status;
