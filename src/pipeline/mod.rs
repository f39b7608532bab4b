//! Pipeline stages for Markdown-to-PNG diagram conversion.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the renderer can be swapped without touching extraction.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ materialize ──▶ render
//! (path)    (FSM scan)   (diagram_N.mmd)  (mmdc → diagram_N.png)
//! ```
//!
//! 1. [`input`]       — validate the document path and decode its text
//! 2. [`extract`]     — lazily yield fenced diagram blocks in document order
//! 3. [`materialize`] — write each block to a deterministically named file
//! 4. [`render`]      — preflight the renderer, then run it once per file
//!    under a timeout; the only stage that spawns processes

pub mod extract;
pub mod input;
pub mod materialize;
pub mod render;
