//! rollcall-client: operator console logic for the Rollcall attendance server.
//!
//! Everything here talks to the server through [`api::ApiClient`]; a 401 on
//! any call ends the session. Controllers publish their state on `watch`
//! channels and report failures through the [`dialog::Dialogs`] queue, so a
//! front end only renders state and presents dialogs.

pub mod api;
pub mod cache;
pub mod capture;
pub mod config;
pub mod dashboard;
pub mod dialog;
pub mod engine;
pub mod enrollment;
pub mod monitoring;
pub mod navigation;
pub mod poller;
pub mod reports;
pub mod shell;
pub mod token;

#[cfg(test)]
mod test_util;

pub use api::{ApiClient, ApiError};
pub use config::Config;
pub use dialog::{DialogKind, DialogPresenter, DialogRequest, Dialogs};
pub use engine::{spawn_engine, EngineHandle, FrameSource};
pub use enrollment::{EnrollmentController, EnrollmentForm};
pub use monitoring::{CameraSource, MonitoringController};
pub use navigation::{Navigator, Route};
pub use shell::{Shell, Tab};
pub use token::TokenStore;
