//! The library code for `teizan`, the publishing pipeline of a static hiking
//! blog about low mountains. The pipeline has four stages, each runnable on
//! its own:
//!
//! 1. Merging incoming mountain records into the record store
//!    ([`crate::store`])
//! 2. Rendering records into pages under the output directory
//!    ([`crate::render`] for the fragments, [`crate::write`] for placing them
//!    into pages on disk)
//! 3. Patching generated pages in place: the affiliate block and stylesheet
//!    cache-busting ([`crate::sync`])
//! 4. Mirroring the output directory to the web host over FTP
//!    ([`crate::push`])
//!
//! Stages 2 and 3 edit HTML through [`crate::document`], which locates
//! elements structurally and splices text into them without touching the
//! rest of the page. Because of this, pages that were edited by hand after
//! generation survive re-rendering.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod config;
pub mod document;
pub mod mountain;
pub mod push;
pub mod render;
pub mod store;
pub mod sync;
pub mod theme;
pub mod value;
pub mod write;
