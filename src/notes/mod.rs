//! The notes API that sits behind the admission gate.
//!
//! Notes live in a [`NoteStore`]; the bundled [`MemoryNoteStore`] keeps them in
//! process memory.

mod routes;
mod store;

pub use routes::{router, SharedStore};
pub use store::{MemoryNoteStore, Note, NoteStore, StoreError};
