//! scrapeflow-exposition — turns a scraped `/metrics` body into metric families.
//!
//! Two steps, kept separate so a single bad family never spoils the rest:
//!
//! ```text
//! text ──parse()──► Exposition (families of raw series lines)
//!      ──aggregate()──► Aggregation { families, skipped }
//! ```
//!
//! `parse` only groups lines; it never fails. All value, label and type
//! interpretation happens in `aggregate`, which drops malformed families
//! individually and reports them in `skipped`.

pub mod aggregate;
pub mod error;
pub mod parser;

pub use aggregate::{Aggregation, SkippedFamily, aggregate};
pub use error::ExpositionError;
pub use parser::{ExposedFamily, ExposedSeries, Exposition, parse};
