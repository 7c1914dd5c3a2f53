//! Application layer: the cart, pricing, checkout and reconciliation services.
//!
//! Services hold shared port handles (`Arc<dyn Port>`) and are cheap to clone; each
//! call takes the identity and session it acts on explicitly.

pub mod cart;
pub mod checkout;
pub mod pricing;
pub mod reconcile;
