pub mod audio;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod region;
pub mod session;
