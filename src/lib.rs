pub mod archive;
pub mod config;
pub mod error;
pub mod history;
pub mod logger;
pub mod media;
pub mod peer;
pub mod reconnect;
pub mod recorder;
pub mod session;
pub mod signaling;
pub mod status;
pub mod utils;

pub use archive::{LocalArchive, LocalRecording, RecordingSummary};
pub use config::LinkConfig;
pub use error::{LinkError, Result};
pub use session::{EngineDeps, LinkEngine};
pub use status::{ConnState, LinkStatus, Mode};
