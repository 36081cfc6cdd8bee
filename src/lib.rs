//! Blocking client for the GTmetrix page performance API.
//!
//! A [`TestSession`] queues a test, polls its state at a fixed cadence and
//! hands back the final [`ResultSnapshot`]:
//!
//! ```rust,no_run
//! use gtmetrix::{ClientSettings, TestSession, WaitOptions};
//!
//! # fn main() -> Result<(), gtmetrix::SessionError> {
//! let mut settings = ClientSettings::default();
//! settings.username = Some("me@example.com".into());
//! settings.api_key = Some("0123456789abcdef".into());
//!
//! let session = TestSession::from_settings(&settings)?;
//! let snapshot = session.submit_and_wait("https://example.com", WaitOptions::default())?;
//! if let Some((metrics, _)) = snapshot.completed_results() {
//!     println!("fully loaded in {} ms", metrics.fully_loaded_time);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use config::{ClientSettings, DecodePolicy};
pub use error::{SessionError, SessionResult, TransportError};
pub use model::{MetricsBlock, ResourcesBlock, ResultSnapshot, TestReference, TestState};
pub use session::{CancelToken, TestSession, WaitOptions};
pub use transport::{BlockingTransport, Credentials, HttpReply, Transport};
