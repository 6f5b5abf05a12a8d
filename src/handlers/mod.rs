//! API Handlers

pub mod health;
pub mod orders;
pub mod returns;
pub mod shipping;
