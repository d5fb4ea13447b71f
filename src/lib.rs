//! Scripted exploration of SaaS sites for documentation.
//!
//! A session opens the site in a remote browser, walks it through three
//! fixed phases (homepage, sign-in flow, features), pauses for a human to
//! sign in when a login wall shows up, and captures screenshots along the
//! way. Progress is published through a shared [`ProgressRegistry`] and the
//! finished [`ExplorationResult`] is handed to a [`DocumentationWriter`].

pub mod auth;
pub mod capture;
pub mod chrome;
pub mod config;
pub mod dom;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod page;
pub mod phases;
pub mod planner;
pub mod progress;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

pub use auth::{AuthWaiter, KeywordClassifier, PageClassifier};
pub use chrome::ChromeLauncher;
pub use config::{ChromeConfig, ExplorerConfig, PlannerConfig, Settings};
pub use error::{BrowserError, ExplorerError, Result};
pub use executor::TaskExecutor;
pub use orchestrator::Orchestrator;
pub use page::{BrowserLauncher, Page, PageLease};
pub use planner::ActPlanner;
pub use progress::{ProgressRegistry, spawn_sweeper};
pub use storage::{DocumentationWriter, OutputStore};
pub use types::{
    ExplorationResult, ExploreTarget, SessionProgress, SessionStatus, Task, TaskResult,
};
