//! Game-world state and transactional flows
//!
//! Everything above the wire: players, inventories, and the request-based
//! flows (trade, enchant, invitations) that mutate them.

pub mod enchant;
pub mod invite;
pub mod item;
pub mod player;
pub mod request;
pub mod trade;
