/// Competition lifecycle operations: create, join, start, end, delete, invitations and chat.
pub mod competition_service;
/// Background task ending overdue competitions.
pub mod deadline_sweeper;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Typed broadcast helpers for competition rooms.
pub mod room_events;
/// Solution scoring collaborator.
pub mod scoring;
/// Server-Sent Events streaming of room events.
pub mod sse_service;
/// Storage connection supervisor with backoff and degraded mode.
pub mod storage_supervisor;
/// Submission bookkeeping, winner derivation and leaderboard.
pub mod submission_service;
/// WebSocket room subscription and chat service.
pub mod websocket_service;
