//! Opaque boundary to the browser-rendered results feed
//!
//! Everything the collector knows about the page goes through these five
//! primitives. The concrete adapter (WebDriver here, or anything else that
//! can navigate/click/read) is interchangeable behind this trait, which is
//! also what makes the state machine testable with a scripted fake.

use async_trait::async_trait;

/// Handle to something locatable on the rendered page
///
/// The string form is adapter-specific (the WebDriver adapter treats it as
/// an XPath expression); the collector only builds and passes them around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator(pub String);

impl Locator {
    pub fn new(expr: impl Into<String>) -> Self {
        Locator(expr.into())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub enum SourceError {
    /// The feed or a required element cannot be reached at all
    Unavailable(String),
    /// The interaction ran past its deadline
    Timeout(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Unavailable(msg) => write!(f, "source unavailable: {}", msg),
            SourceError::Timeout(msg) => write!(f, "source timeout: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Primitive capabilities of the rendered results feed
///
/// Send + Sync so a boxed source can live inside a collector that tokio
/// moves between worker threads.
#[async_trait]
pub trait Source: Send + Sync {
    /// Load a page, replacing the current view
    async fn navigate(&mut self, url: &str) -> Result<(), SourceError>;

    /// Whether the located element is currently displayed
    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, SourceError>;

    /// Click the located element
    async fn click(&mut self, locator: &Locator) -> Result<(), SourceError>;

    /// Visible text of the located element
    async fn read_text(&mut self, locator: &Locator) -> Result<String, SourceError>;

    /// All elements whose text matches, exactly or by containment
    async fn locate_by_text(
        &mut self,
        text: &str,
        exact: bool,
    ) -> Result<Vec<Locator>, SourceError>;
}

/// Builds a fresh Source per entity task
///
/// Each collector owns its own session; sharing one browser view between
/// entities would have them fighting over navigation.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn create(&self, entity: &str) -> Result<Box<dyn Source>, SourceError>;
}
