//! Pipeline stages for scan preparation.
//!
//! Each submodule implements one step. The editor and the normalizer both
//! sit on top of [`raster`]; nothing else touches codecs directly.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ UploadSet ──▶ (editor: enhance + bake) ──▶ normalize ──▶ submit
//! (paths/URLs)                                          (bound+encode) (multipart)
//! ```
//!
//! 1. [`input`]     — read local files or download URLs, enforce the allow-list
//!    and size limit, sniff MIME types
//! 2. [`raster`]    — decode/encode bytes on the blocking pool
//! 3. [`enhance`]   — luminance statistics, auto-enhance estimate, colour bake
//! 4. [`normalize`] — bound every entry to the maximum dimension and re-encode,
//!    committing all-or-nothing
//! 5. [`submit`]    — the [`submit::Submitter`] boundary and its HTTP implementation

pub mod enhance;
pub mod input;
pub mod normalize;
pub mod raster;
pub mod submit;
