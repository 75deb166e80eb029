//! Backend resolution subsystem.
//!
//! # Data Flow
//! ```text
//! [upstream] config section
//!     → resolver.rs (validate host, scheme, addressing style)
//!     → target.rs (UpstreamTarget, immutable)
//!     → Arc<UpstreamTarget> handed to the rewriter and dispatcher
//! ```

pub mod resolver;
pub mod target;

pub use resolver::resolve;
pub use target::{AddressingStyle, Endpoint, UpstreamScheme, UpstreamTarget};
