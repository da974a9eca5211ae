//! Shared test fixtures and mocks for the Chronicle CQRS runtime.

mod clock;
mod handling;
mod sender;
mod user;

pub use clock::{FixedClock, fixed_clock};
pub use handling::{CountingHandler, FailingHandler, RecordingInterceptor};
pub use sender::{FailingSender, FixedRoutingKeyProvider, RecordingSender, StaticMetadataProvider};
pub use user::{ChangePassword, RegisterUser, UserAccount, UserEvent};
