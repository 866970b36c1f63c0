// # Collaborator Implementations
//
// In-memory implementations of the post store, engagement store and
// identity traits. They carry the same contracts a managed backend would.

pub mod engagement;
pub mod identity;
pub mod posts;

pub use engagement::MemoryEngagementStore;
pub use identity::StaticIdentity;
pub use posts::MemoryPostStore;
