//! Wire types exchanged with a supervised model process.
//!
//! Inbound traffic is a stream of line-delimited JSON [`Envelope`]s; outbound
//! traffic is one [`InputEnvelope`] per turn.

mod envelope;
mod input;

pub use envelope::AssistantEnvelope;
pub use envelope::AssistantMessage;
pub use envelope::ContentBlock;
pub use envelope::Envelope;
pub use envelope::MessageStart;
pub use envelope::ResultEnvelope;
pub use envelope::StreamDelta;
pub use envelope::StreamEvent;
pub use envelope::StreamEventEnvelope;
pub use envelope::SystemEnvelope;
pub use envelope::Usage;
pub use envelope::COMPACT_BOUNDARY_SUBTYPE;
pub use input::InputEnvelope;
pub use input::Role;
pub use input::UserMessage;
