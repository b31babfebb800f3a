// ─── Quote refresh: Refetcher → Store actors ───
pub mod error;
pub mod messages;
pub mod refetch;
pub mod store;
pub mod updater;

// ─── Shared types ───
pub mod types;
