//! Domain models for tempvoice.
//!
//! # Core Concepts
//!
//! - [`GuildPolicy`]: Per-guild configuration. Names the creator channel whose
//!   join spawns a temporary channel, and the defaults new channels get.
//! - [`TempResource`]: A live temporary channel and its current owner.
//! - [`PermissionGrant`]: An owner's allow/deny decision for a member.
//! - [`PresenceTransition`]: A member moving between voice channels, split into
//!   leave and join [`PresenceEffect`]s.

mod grant;
mod ids;
mod policy;
mod presence;
mod resource;

pub use grant::*;
pub use ids::*;
pub use policy::*;
pub use presence::*;
pub use resource::*;
