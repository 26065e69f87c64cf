//! Collection side: the Source boundary and the per-entity state machine

pub mod error_handler;
pub mod machine;
pub mod source;
pub mod webdriver;

pub use machine::{CollectError, CollectorSettings, EntityCollector, Phase, StepOutcome};
pub use source::{Locator, Source, SourceError, SourceFactory};
pub use webdriver::{WebDriverFactory, WebDriverSource};
