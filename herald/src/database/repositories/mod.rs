//! Repository layer.
//!
//! Each entity gets an `async_trait` repository trait (the seam the handler
//! and tests depend on) and a sqlx implementation over a `SqlitePool`.

pub mod alert;
pub mod idempotency;
pub mod notification;
pub mod notification_log;
pub mod receiver;
pub mod silence;
pub mod subscription;

pub use alert::*;
pub use idempotency::*;
pub use notification::*;
pub use notification_log::*;
pub use receiver::*;
pub use silence::*;
pub use subscription::*;
