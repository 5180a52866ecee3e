//! Manager process: container lifecycle, health reconciliation, and the
//! HTTP control surface.

pub mod api;
pub mod health;
pub mod lifecycle;
pub mod ports;
pub mod proxy;
