//! Channel names shared by every display instance of a device.
//!
//! `CONTENT_ASSIGNMENT` and `SECONDARY_CLOSE` are persisted so an instance
//! created after a publish can still catch up via `read_last`. `IDENTIFY`
//! is transient: meaningful only to instances subscribed at the moment the
//! event fires.

/// Persisted. Payload: [`crate::ContentAssignment`].
pub const CONTENT_ASSIGNMENT: &str = "content.assignment";

/// Persisted. Payload: `{ "closed_at": <millis> }`. Any secondary instance
/// observing this shuts down.
pub const SECONDARY_CLOSE: &str = "secondary.close";

/// Transient. Payload: `{ "show": bool, "display_time": <seconds> }`.
pub const IDENTIFY: &str = "identify";
