//! Embedded static HTML pages served by the web UI.
//!
//! The pages are kept as `&'static str` so they ship inside the binary without
//! filesystem lookups.

mod full_body;
mod index;

pub use full_body::FULL_BODY_HTML;
pub use index::INDEX_HTML;
