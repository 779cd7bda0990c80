pub mod competition;
pub mod events;
pub mod health;
pub mod sse;
pub mod submission;
pub mod validation;
pub mod ws;
