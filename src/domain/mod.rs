//! Domain types and the ports the application layer talks to.

pub mod cart;
pub mod catalog;
pub mod gateway;
pub mod identity;
pub mod money;
pub mod notification;
pub mod order;
pub mod ports;
pub mod pricing;
