//! JuriCast: a terminal client for a catalog of legal-education podcast
//! episodes, with a persistent player that remembers listening progress.

pub mod catalog;
pub mod config;
pub mod error;
pub mod player;
pub mod store;
pub mod ui;
