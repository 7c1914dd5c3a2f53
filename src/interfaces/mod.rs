pub mod csv;
pub mod webhook;
