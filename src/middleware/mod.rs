pub mod session;

pub use session::{SessionId, session_middleware};
