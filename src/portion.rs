//! Addressable decoding units.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bytes::ByteRange;
use crate::cache::{CancelToken, LoadStatus};
use crate::error::Result;
use crate::interpreters::{DecodeCache, Dependency, Interpreter, Translated};
use crate::translation::Translation;

/// One independently cached piece of the file: the header, a load command,
/// a section, a linkedit blob.
///
/// Decoding starts on a background thread as soon as the portion is
/// created; readers wait on the cache.
pub struct Portion {
    title: String,
    subtitle: Option<String>,
    range: ByteRange,
    runtime_size: Option<u64>,
    cache: Arc<DecodeCache>,
}

impl fmt::Debug for Portion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Portion")
            .field("title", &self.title)
            .field("subtitle", &self.subtitle)
            .field("range", &self.range)
            .field("status", &self.status())
            .finish()
    }
}

impl Portion {
    /// Create the portion and start its producer.
    pub(crate) fn start(
        title: impl Into<String>,
        subtitle: Option<String>,
        range: ByteRange,
        runtime_size: Option<u64>,
        interpreter: Interpreter,
        poll_interval: Duration,
    ) -> Result<Arc<Self>> {
        let title = title.into();
        let name = match &subtitle {
            Some(subtitle) => format!("{title} ({subtitle})"),
            None => title.clone(),
        };
        let cache = DecodeCache::new(name, poll_interval);
        let interpreter = Arc::new(interpreter);
        let translator = Arc::clone(&interpreter);
        cache.start_loading(
            move || interpreter.initialize(),
            move |initialized| translator.translate(initialized),
        )?;
        debug!(portion = %cache.name(), %range, "portion started");
        Ok(Arc::new(Self {
            title,
            subtitle,
            range,
            runtime_size,
            cache,
        }))
    }

    /// Display title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Optional detail, e.g. a segment or dylib name.
    pub fn subtitle(&self) -> Option<&str> {
        self.subtitle.as_deref()
    }

    /// File bytes covered. Zero-length for zero-fill sections.
    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// In-memory size of zero-fill sections.
    pub fn runtime_size(&self) -> Option<u64> {
        self.runtime_size
    }

    /// Current decode state.
    pub fn status(&self) -> LoadStatus {
        self.cache.status()
    }

    /// The portion's cache.
    pub fn cache(&self) -> &Arc<DecodeCache> {
        &self.cache
    }

    /// Wait for the decoded fields.
    pub fn await_translate_result(&self, cancel: &CancelToken) -> Result<Arc<Translated>> {
        self.cache.await_translate_result(cancel)
    }

    /// Decoded fields if already available.
    pub fn translate_result(&self) -> Option<Arc<Translated>> {
        self.cache.translate_result()
    }

    /// Wait for the decoded fields and find the one covering `offset`.
    pub fn search(&self, offset: u64, cancel: &CancelToken) -> Result<Option<Translation>> {
        Ok(self.await_translate_result(cancel)?.search(offset))
    }

    pub(crate) fn dependency(&self) -> Dependency {
        Dependency::new(Arc::clone(&self.cache))
    }
}

/// A range-search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub portion: Arc<Portion>,
    pub translation: Translation,
}
